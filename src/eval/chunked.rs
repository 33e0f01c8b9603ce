//! Concurrent saturation of negation-free programs.
//!
//! Every new fact becomes part of a chunk, and every chunk is a job on a
//! [`WorkStealingPool`]. A job runs, for each fact of its chunk, every rule
//! variant whose pivot has the fact's predicate, joining the remaining body
//! atoms against the whole store. Facts the [`FactTrie`] accepts as new are
//! stored and collected into fresh chunks. Because a fact is stored before
//! its own job is queued, any join between two facts is found by the job of
//! whichever of them was stored last.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, trace};

use super::{
    clause::ClauseEvaluator,
    indexer::{FactIndexer, QueueIndexer, SetIndexer},
    matches_any,
    pool::{BarrierGuard, CountingBarrier, WorkStealingPool},
    provenance::ProvenanceStore,
    seminaive_rule::{annotate_flat, SemiNaiveClause},
    trie::FactTrie,
    EvalManager, FactListener, FactStore, Listeners, SharedMetrics,
};
use crate::{
    ast::{Annotation, Atom, Clause, PredicateSym},
    config::{EvalConfig, EvalStrategy, IndexerKind},
    error::{Result, ValidationError},
    program::StratifiedProgram,
    unify::Substitution,
};

/// What a job produced: new facts not yet submitted, and how many facts of
/// each predicate it derived.
#[derive(Default)]
struct Batch {
    facts: Vec<Atom>,
    derived: HashMap<PredicateSym, usize>,
}

struct Saturation {
    /// Rule variants keyed by the predicate of their pivot.
    variants: HashMap<PredicateSym, Vec<SemiNaiveClause>>,
    unpivoted: Vec<SemiNaiveClause>,
    trie: FactTrie,
    facts: Arc<dyn FactIndexer>,
    provenance: Option<Arc<ProvenanceStore>>,
    listeners: Listeners,
    barrier: Arc<CountingBarrier>,
    metrics: SharedMetrics,
    chunk_size: usize,
    pool: WorkStealingPool,
}

impl Saturation {
    /// Stores `fact` if the trie accepts it as new. Returns whether it did.
    fn accept(&self, fact: &Atom, justification: Option<Clause>) -> bool {
        if !self.trie.insert(fact) {
            return false;
        }
        if let (Some(clause), Some(provenance)) = (justification, &self.provenance) {
            provenance.record(fact.clone(), clause);
        }
        self.facts.add(fact.clone());
        self.listeners.notify(fact);
        true
    }

    fn submit(self: &Arc<Self>, chunk: Vec<Atom>) {
        if chunk.is_empty() {
            return;
        }
        self.barrier.increment();
        let saturation = Arc::clone(self);
        self.pool.submit(Box::new(move || saturation.run_job(chunk)));
    }

    fn submit_chunks(self: &Arc<Self>, facts: Vec<Atom>) -> usize {
        let mut chunks = 0;
        for chunk in facts.chunks(self.chunk_size) {
            self.submit(chunk.to_vec());
            chunks += 1;
        }
        chunks
    }

    /// Runs `clause` and stores its new head facts into `batch`, submitting
    /// the buffered facts whenever they fill a chunk.
    fn fire(
        self: &Arc<Self>,
        clause: &SemiNaiveClause,
        pivot_fact: Option<&Atom>,
        batch: &mut Batch,
    ) {
        let report_fact = |fact: Atom, subst: &Substitution| {
            if !self.accept(&fact, Some(clause.source.apply(subst))) {
                return;
            }
            trace!("New fact {}", fact);
            *batch.derived.entry(fact.pred.clone()).or_default() += 1;
            batch.facts.push(fact);
            if batch.facts.len() >= self.chunk_size {
                self.submit(std::mem::take(&mut batch.facts));
            }
        };
        let facts = self.facts.as_ref();
        let get_facts =
            |atom: &Atom, _: Annotation, subst: &Substitution| facts.index_into(atom, subst);
        let is_known = |atom: &Atom, subst: &Substitution| matches_any(facts, atom, subst);

        let mut evaluator = ClauseEvaluator::new(clause, report_fact, get_facts, is_known);
        match pivot_fact {
            Some(fact) => evaluator.evaluate(fact),
            None => evaluator.evaluate_unpivoted(),
        }
    }

    /// Submits what is left of `batch` and reports its counts.
    fn finish(self: &Arc<Self>, batch: Batch) {
        self.submit(batch.facts);
        for (pred, count) in &batch.derived {
            self.metrics.on_facts_derived(pred, *count);
        }
    }

    fn run_job(self: Arc<Self>, chunk: Vec<Atom>) {
        let _done = BarrierGuard(Arc::clone(&self.barrier));
        let mut batch = Batch::default();
        let mut memo: HashMap<&PredicateSym, &[SemiNaiveClause]> = HashMap::new();
        for fact in &chunk {
            let variants = *memo.entry(&fact.pred).or_insert_with(|| {
                self.variants
                    .get(&fact.pred)
                    .map(Vec::as_slice)
                    .unwrap_or_default()
            });
            for clause in variants {
                self.fire(clause, Some(fact), &mut batch);
            }
        }
        self.finish(batch);
        self.metrics.on_job(chunk.len());
    }
}

pub struct ChunkedEvalManager {
    saturation: Arc<Saturation>,
    given: Vec<Atom>,
    seeded: bool,
    started: Option<Instant>,
}

impl ChunkedEvalManager {
    pub fn new(
        program: StratifiedProgram,
        config: &EvalConfig,
        metrics: SharedMetrics,
    ) -> Result<Self, ValidationError> {
        if let Some(rule) = program.rules.iter().find(|r| r.has_negation()) {
            return Err(ValidationError::NegationUnsupported(rule.clause().clone()));
        }

        let mut variants: HashMap<PredicateSym, Vec<SemiNaiveClause>> = HashMap::new();
        let mut unpivoted = Vec::new();
        for clause in program.rules.iter().flat_map(annotate_flat) {
            match clause.pivot_predicate().cloned() {
                Some(pred) => variants.entry(pred).or_default().push(clause),
                None => unpivoted.push(clause),
            }
        }

        let facts: Arc<dyn FactIndexer> = match config.indexer {
            IndexerKind::Queue => Arc::new(QueueIndexer::new(config)),
            IndexerKind::Set => Arc::new(SetIndexer::new(config)),
        };
        debug!(
            "Chunked evaluation of {} rules on {} workers (chunk size {}, {} indexer)",
            program.rules.len(),
            config.parallelism,
            config.chunk_size,
            config.indexer
        );

        Ok(Self {
            saturation: Arc::new(Saturation {
                variants,
                unpivoted,
                trie: FactTrie::new(config),
                facts,
                provenance: config
                    .track_provenance
                    .then(|| Arc::new(ProvenanceStore::new())),
                listeners: Listeners::default(),
                barrier: Arc::new(CountingBarrier::new()),
                metrics,
                chunk_size: config.chunk_size.max(1),
                pool: WorkStealingPool::new(config.parallelism),
            }),
            given: program.facts,
            seeded: false,
            started: None,
        })
    }

    fn seed(&mut self) {
        let saturation = &self.saturation;
        let given = std::mem::take(&mut self.given);
        let new: Vec<Atom> = given
            .into_iter()
            .filter(|fact| saturation.accept(fact, None))
            .collect();
        let chunks = saturation.submit_chunks(new);

        let mut batch = Batch::default();
        for clause in &saturation.unpivoted {
            saturation.fire(clause, None, &mut batch);
        }
        saturation.finish(batch);
        debug!("Seeded {} chunks of given facts", chunks);
        self.seeded = true;
    }

    /// Waits for quiescence and stops the worker threads.
    pub fn shutdown(&self) {
        self.saturation.barrier.wait();
        self.saturation.pool.shutdown();
    }
}

impl EvalManager for ChunkedEvalManager {
    fn strategy(&self) -> EvalStrategy {
        EvalStrategy::Chunked
    }

    fn add_fact(&self, fact: Atom) -> Result<()> {
        if self.saturation.accept(&fact, None) {
            self.saturation.submit(vec![fact]);
        }
        Ok(())
    }

    fn on_new_fact(&self, pred: PredicateSym, listener: FactListener) {
        self.saturation.listeners.register(pred, listener);
    }

    fn eval_to_fixpoint(&mut self) -> Result<FactStore> {
        let started = *self.started.get_or_insert_with(Instant::now);
        if !self.seeded {
            self.seed();
        }
        self.saturation.barrier.wait();

        let elapsed: Duration = started.elapsed();
        self.saturation.metrics.on_finish(elapsed);
        debug!(
            "Saturated with {} facts in {:?}",
            self.saturation.facts.len(),
            elapsed
        );
        Ok(FactStore::new(
            Arc::clone(&self.saturation.facts),
            self.saturation.provenance.clone(),
        ))
    }
}

impl Drop for ChunkedEvalManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::{Premise, Term},
        error::Error,
        metrics::CountingMetrics,
        program::{validate_and_stratify, Program},
    };

    fn var_atom(name: &str, vars: &[&str]) -> Atom {
        Atom::from_parts(name, vars.iter().map(|v| Term::var(v)).collect::<Vec<_>>())
    }

    fn closure_program(n: usize) -> Program {
        Program::new()
            .rule(Clause::new(
                var_atom("path", &["X", "Y"]),
                vec![Premise::Positive(var_atom("edge", &["X", "Y"]))],
            ))
            .rule(Clause::new(
                var_atom("path", &["X", "Z"]),
                vec![
                    Premise::Positive(var_atom("path", &["X", "Y"])),
                    Premise::Positive(var_atom("edge", &["Y", "Z"])),
                ],
            ))
            .facts((0..n as i64).map(|i| Atom::fact("edge", [i, i + 1])))
            .extendible(PredicateSym::new("edge", 2))
    }

    fn manager(program: &Program, config: EvalConfig) -> ChunkedEvalManager {
        manager_with_metrics(program, config, Arc::new(CountingMetrics::new()))
    }

    fn manager_with_metrics(
        program: &Program,
        config: EvalConfig,
        metrics: Arc<CountingMetrics>,
    ) -> ChunkedEvalManager {
        let _ = env_logger::builder().is_test(true).try_init();
        ChunkedEvalManager::new(validate_and_stratify(program).unwrap(), &config, metrics).unwrap()
    }

    fn paths(store: &FactStore) -> BTreeSet<Atom> {
        store
            .facts(&PredicateSym::new("path", 2))
            .into_iter()
            .collect()
    }

    #[test]
    fn saturates_a_chain_for_every_chunk_size() {
        let expected: BTreeSet<Atom> = (0..10i64)
            .flat_map(|i| (i + 1..=10).map(move |j| Atom::fact("path", [i, j])))
            .collect();
        for chunk_size in [1, 4, 10] {
            for indexer in [IndexerKind::Queue, IndexerKind::Set] {
                let config = EvalConfig {
                    indexer,
                    ..EvalConfig::default().chunked().with_chunk_size(chunk_size).with_parallelism(4)
                };
                let mut manager = manager(&closure_program(10), config);
                let store = manager.eval_to_fixpoint().unwrap();
                assert_eq!(paths(&store), expected, "chunk size {}", chunk_size);
                assert_eq!(store.len(), 10 + expected.len());
            }
        }
    }

    #[test]
    fn added_facts_extend_a_saturated_store() {
        let mut manager = manager(&closure_program(3), EvalConfig::default().chunked());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on_new_fact(
            PredicateSym::new("path", 2),
            Arc::new(move |fact: &Atom| sink.lock().push(fact.clone())),
        );
        assert_eq!(paths(&manager.eval_to_fixpoint().unwrap()).len(), 6);

        manager.add_fact(Atom::fact("edge", [3i64, 4])).unwrap();
        // Duplicates are ignored.
        manager.add_fact(Atom::fact("edge", [3i64, 4])).unwrap();
        let store = manager.eval_to_fixpoint().unwrap();
        assert_eq!(paths(&store).len(), 10);
        assert!(store.contains(&Atom::fact("path", [0i64, 4])));

        let seen: BTreeSet<Atom> = seen.lock().iter().cloned().collect();
        assert_eq!(seen, paths(&store));
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn derivations_are_counted_once_per_fact() {
        let metrics = Arc::new(CountingMetrics::new());
        let config = EvalConfig::default().chunked().with_chunk_size(2).with_parallelism(4);
        let mut manager = manager_with_metrics(&closure_program(10), config, metrics.clone());
        let store = manager.eval_to_fixpoint().unwrap();

        let stats = metrics.stats();
        assert_eq!(stats.facts_derived, paths(&store).len());
        assert_eq!(
            stats.facts_derived_per_predicate.get(&PredicateSym::new("path", 2)),
            Some(&55)
        );
        assert!(stats.jobs >= 5);
        assert!(stats.evaluation_time.is_some());
    }

    #[test]
    fn derived_facts_are_justified() {
        let mut manager = manager(&closure_program(2), EvalConfig::default().chunked().with_provenance());
        let store = manager.eval_to_fixpoint().unwrap();
        let clause = store.justification(&Atom::fact("path", [0i64, 2])).unwrap();
        assert_eq!(clause.head, Atom::fact("path", [0i64, 2]));
        assert_eq!(store.justification(&Atom::fact("edge", [0i64, 1])), None);
        let proof = store.proof(&Atom::fact("path", [0i64, 2])).unwrap().unwrap();
        assert_eq!(proof.size(), 4);
    }

    #[test]
    fn negation_is_rejected() {
        let program = Program::new().rule(Clause::new(
            var_atom("p", &["X"]),
            vec![
                Premise::Positive(var_atom("q", &["X"])),
                Premise::Negated(var_atom("r", &["X"])),
            ],
        ));
        let result = ChunkedEvalManager::new(
            validate_and_stratify(&program).unwrap(),
            &EvalConfig::default().chunked(),
            Arc::new(CountingMetrics::new()),
        );
        assert!(matches!(
            result.map_err(Error::from),
            Err(Error::Validation(ValidationError::NegationUnsupported(_)))
        ));
    }
}
