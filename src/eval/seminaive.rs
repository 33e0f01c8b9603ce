//! Sequential, stratified semi-naive evaluation.
//!
//! Strata are evaluated strictly in order, so every predicate a stratum reads
//! from an earlier stratum (positively or under negation) is complete before
//! the stratum starts. Within a stratum, evaluation proceeds in rounds:
//!
//! 1. Seed: the given facts of the stratum's predicates form the first delta.
//! 2. First round: rules that do not mention the stratum's own predicates
//!    run once against the full store.
//! 3. Delta rounds: the rule variants produced by
//!    [`annotate`](super::seminaive_rule::annotate) run with their pivot
//!    bound to each fact of the latest delta, until a round derives nothing.
//!
//! A derived fact enters the full store immediately, and the next delta if
//! it was not known before.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use log::{debug, trace};
use parking_lot::Mutex;

use super::{
    clause::ClauseEvaluator,
    indexer::{FactIndexer, SetIndexer},
    matches_any,
    provenance::ProvenanceStore,
    seminaive_rule::{annotate, SemiNaiveClause},
    EvalManager, FactListener, FactStore, Listeners, SharedMetrics,
};
use crate::{
    ast::{Annotation, Atom, PredicateSym},
    config::{EvalConfig, EvalStrategy},
    error::{Result, UsageError},
    program::StratifiedProgram,
    unify::Substitution,
    validate::stratify::Stratum,
};

/// The variants of a stratum's rules, keyed by the predicate of their pivot.
#[derive(Debug, Default)]
struct StratumPlan {
    first_round: BTreeMap<PredicateSym, Vec<SemiNaiveClause>>,
    unpivoted: Vec<SemiNaiveClause>,
    later_rounds: BTreeMap<PredicateSym, Vec<SemiNaiveClause>>,
}

impl StratumPlan {
    fn new(program: &StratifiedProgram, stratum: &Stratum) -> Self {
        let mut plan = Self::default();
        for rule in program.rules_in_stratum(stratum.index) {
            let annotated = annotate(rule, &stratum.predicates);
            for clause in annotated.first_round {
                match clause.pivot_predicate().cloned() {
                    Some(pred) => plan.first_round.entry(pred).or_default().push(clause),
                    None => plan.unpivoted.push(clause),
                }
            }
            for clause in annotated.later_rounds {
                if let Some(pred) = clause.pivot_predicate().cloned() {
                    plan.later_rounds.entry(pred).or_default().push(clause);
                }
            }
        }
        plan
    }
}

/// The fact sets a stratum reads and writes besides the full store.
struct RoundStores {
    /// In-stratum facts as they were before the current delta.
    prev: SetIndexer,
    delta: SetIndexer,
    next: SetIndexer,
}

impl RoundStores {
    fn new(config: &EvalConfig) -> Self {
        Self {
            prev: SetIndexer::new(config),
            delta: SetIndexer::new(config),
            next: SetIndexer::new(config),
        }
    }

    /// Folds the delta into `prev` and promotes the next delta.
    fn advance(&mut self, config: &EvalConfig) {
        for pred in self.delta.predicates() {
            self.prev.add_all(self.delta.facts(&pred));
        }
        self.delta = std::mem::replace(&mut self.next, SetIndexer::new(config));
    }
}

pub struct SemiNaiveEvalManager {
    program: StratifiedProgram,
    config: EvalConfig,
    full: Arc<SetIndexer>,
    provenance: Option<Arc<ProvenanceStore>>,
    listeners: Listeners,
    /// Facts supplied through `add_fact` before evaluation.
    pending: Mutex<Vec<Atom>>,
    metrics: SharedMetrics,
    evaluated: bool,
}

impl SemiNaiveEvalManager {
    pub fn new(program: StratifiedProgram, config: EvalConfig, metrics: SharedMetrics) -> Self {
        let provenance = config
            .track_provenance
            .then(|| Arc::new(ProvenanceStore::new()));
        Self {
            full: Arc::new(SetIndexer::new(&config)),
            program,
            config,
            provenance,
            listeners: Listeners::default(),
            pending: Mutex::new(Vec::new()),
            metrics,
            evaluated: false,
        }
    }

    /// Stores a given fact, notifying listeners if it is new.
    fn store_given(&self, fact: Atom) {
        if self.full.add(fact.clone()) {
            self.listeners.notify(&fact);
        }
    }

    /// Runs `clause` with its pivot bound to `pivot_fact`, or from the empty
    /// substitution if it has no pivot. Returns the number of new facts.
    fn fire(&self, clause: &SemiNaiveClause, pivot_fact: Option<&Atom>, stores: &RoundStores) -> usize {
        let full = self.full.as_ref();
        let mut derived = 0;
        let report_fact = |fact: Atom, subst: &Substitution| {
            if !full.add(fact.clone()) {
                return;
            }
            trace!("New fact {}", fact);
            derived += 1;
            self.metrics.on_facts_derived(&fact.pred, 1);
            if let Some(provenance) = &self.provenance {
                provenance.record(fact.clone(), clause.source.apply(subst));
            }
            self.listeners.notify(&fact);
            stores.next.add(fact);
        };
        let get_facts = |atom: &Atom, annotation: Annotation, subst: &Substitution| match annotation {
            Annotation::Edb | Annotation::Idb => full.index_into(atom, subst),
            Annotation::IdbPrev => stores.prev.index_into(atom, subst),
            Annotation::Delta => stores.delta.index_into(atom, subst),
        };
        let is_known = |atom: &Atom, subst: &Substitution| matches_any(full, atom, subst);

        let mut evaluator = ClauseEvaluator::new(clause, report_fact, get_facts, is_known);
        match pivot_fact {
            Some(fact) => evaluator.evaluate(fact),
            None => evaluator.evaluate_unpivoted(),
        }
        drop(evaluator);
        derived
    }

    fn evaluate_stratum(&self, stratum: &Stratum) {
        let plan = StratumPlan::new(&self.program, stratum);
        let mut stores = RoundStores::new(&self.config);
        debug!(
            "Evaluating stratum {} ({} predicates, recursive: {})",
            stratum.index,
            stratum.predicates.len(),
            stratum.recursive
        );

        // Seed.
        for pred in &stratum.predicates {
            stores.next.add_all(self.full.facts(pred));
        }

        // First round.
        let mut derived = 0;
        for (pred, clauses) in &plan.first_round {
            for fact in self.full.facts(pred) {
                for clause in clauses {
                    derived += self.fire(clause, Some(&fact), &stores);
                }
            }
        }
        for clause in &plan.unpivoted {
            derived += self.fire(clause, None, &stores);
        }
        self.metrics.on_round(stratum.index, 0, stores.next.len());
        trace!("Stratum {} round 0 derived {} facts", stratum.index, derived);

        // Delta rounds.
        let mut round = 0;
        while !stores.next.is_empty() && !plan.later_rounds.is_empty() {
            round += 1;
            stores.advance(&self.config);
            let mut derived = 0;
            for pred in stores.delta.predicates() {
                let Some(clauses) = plan.later_rounds.get(&pred) else {
                    continue;
                };
                for fact in stores.delta.facts(&pred) {
                    for clause in clauses {
                        derived += self.fire(clause, Some(&fact), &stores);
                    }
                }
            }
            self.metrics
                .on_round(stratum.index, round, stores.delta.len());
            trace!(
                "Stratum {} round {}: delta {} derived {}",
                stratum.index,
                round,
                stores.delta.len(),
                derived
            );
        }

        self.metrics.on_stratum_done(stratum.index, round + 1);
        debug!(
            "Stratum {} reached its fixpoint after {} rounds",
            stratum.index,
            round + 1
        );
    }
}

impl EvalManager for SemiNaiveEvalManager {
    fn strategy(&self) -> EvalStrategy {
        EvalStrategy::SemiNaive
    }

    fn add_fact(&self, fact: Atom) -> Result<()> {
        if self.evaluated {
            return Err(UsageError::UnsupportedStrategy(
                "adding facts after evaluation",
                "SemiNaive",
            )
            .into());
        }
        self.pending.lock().push(fact);
        Ok(())
    }

    fn on_new_fact(&self, pred: PredicateSym, listener: FactListener) {
        self.listeners.register(pred, listener);
    }

    fn eval_to_fixpoint(&mut self) -> Result<FactStore> {
        if self.evaluated {
            return Err(UsageError::AlreadyEvaluated.into());
        }
        let start = Instant::now();

        let given: Vec<Atom> = self
            .program
            .facts
            .iter()
            .cloned()
            .chain(std::mem::take(&mut *self.pending.lock()))
            .collect();
        debug!(
            "Starting evaluation of {} rules over {} given facts in {} strata",
            self.program.rules.len(),
            given.len(),
            self.program.stratification.len()
        );
        for fact in given {
            self.store_given(fact);
        }

        for stratum in &self.program.stratification.strata {
            self.evaluate_stratum(stratum);
        }

        self.evaluated = true;
        let elapsed = start.elapsed();
        self.metrics.on_finish(elapsed);
        debug!(
            "Fixpoint reached with {} facts in {:?}",
            self.full.len(),
            elapsed
        );
        Ok(FactStore::new(
            Arc::clone(&self.full) as Arc<dyn FactIndexer>,
            self.provenance.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::{Clause, Premise, Term},
        metrics::CountingMetrics,
        program::{validate_and_stratify, Program},
    };

    fn atom(name: &str, args: &[&str]) -> Atom {
        Atom::from_parts(
            name,
            args.iter()
                .map(|a| {
                    if a.chars().next().is_some_and(char::is_uppercase) {
                        Term::var(a)
                    } else {
                        Term::sym(a)
                    }
                })
                .collect::<Vec<_>>(),
        )
    }

    fn evaluate(program: Program, config: EvalConfig) -> (FactStore, Arc<CountingMetrics>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let metrics = Arc::new(CountingMetrics::new());
        let mut manager = SemiNaiveEvalManager::new(
            validate_and_stratify(&program).unwrap(),
            config,
            metrics.clone(),
        );
        (manager.eval_to_fixpoint().unwrap(), metrics)
    }

    fn names(store: &FactStore, pred: &str, arity: usize) -> BTreeSet<String> {
        store
            .facts(&PredicateSym::new(pred, arity))
            .iter()
            .map(|f| f.to_string())
            .collect()
    }

    fn transitive_closure() -> Program {
        Program::new()
            .rule(Clause::new(
                atom("path", &["X", "Y"]),
                vec![Premise::Positive(atom("edge", &["X", "Y"]))],
            ))
            .rule(Clause::new(
                atom("path", &["X", "Z"]),
                vec![
                    Premise::Positive(atom("path", &["X", "Y"])),
                    Premise::Positive(atom("path", &["Y", "Z"])),
                ],
            ))
    }

    #[test]
    fn transitive_closure_of_a_chain() {
        let program = transitive_closure().facts(
            [["a", "b"], ["b", "c"], ["c", "d"]].map(|e| Atom::fact("edge", e)),
        );
        let (store, metrics) = evaluate(program, EvalConfig::default());
        assert_eq!(
            names(&store, "path", 2),
            [
                "path(a, b)", "path(a, c)", "path(a, d)", "path(b, c)", "path(b, d)",
                "path(c, d)",
            ]
            .into_iter()
            .map(String::from)
            .collect()
        );
        let stats = metrics.stats();
        assert_eq!(stats.facts_derived, 6);
        assert_eq!(stats.rounds_per_stratum.len(), 1);
        assert!(stats.evaluation_time.is_some());
    }

    #[test]
    fn negation_reads_a_completed_lower_stratum() {
        // reachable from a, and unreachable nodes.
        let program = Program::new()
            .rule(Clause::new(
                atom("reach", &["X"]),
                vec![Premise::Positive(atom("start", &["X"]))],
            ))
            .rule(Clause::new(
                atom("reach", &["Y"]),
                vec![
                    Premise::Positive(atom("reach", &["X"])),
                    Premise::Positive(atom("edge", &["X", "Y"])),
                ],
            ))
            .rule(Clause::new(
                atom("unreached", &["X"]),
                vec![
                    Premise::Positive(atom("node", &["X"])),
                    Premise::Negated(atom("reach", &["X"])),
                ],
            ))
            .fact(Atom::fact("start", ["a"]))
            .facts([["a", "b"], ["b", "c"], ["d", "e"]].map(|e| Atom::fact("edge", e)))
            .facts(["a", "b", "c", "d", "e"].map(|n| Atom::fact("node", [n])));
        let (store, _) = evaluate(program, EvalConfig::default());
        assert_eq!(
            names(&store, "unreached", 1),
            BTreeSet::from(["unreached(d)".to_string(), "unreached(e)".to_string()])
        );
    }

    #[test]
    fn given_idb_facts_seed_their_stratum() {
        let program = transitive_closure()
            .fact(Atom::fact("edge", ["a", "b"]))
            .fact(Atom::fact("path", ["b", "c"]));
        let (store, _) = evaluate(program, EvalConfig::default().with_provenance());
        assert!(store.contains(&Atom::fact("path", ["a", "c"])));
        assert_eq!(store.justification(&Atom::fact("path", ["b", "c"])), None);
        assert_eq!(
            store
                .justification(&Atom::fact("path", ["a", "c"]))
                .map(|c| c.to_string()),
            Some("path(a, c) :- path(a, b), path(b, c).".to_string())
        );
    }

    #[test]
    fn listeners_see_each_new_fact_once() {
        let program = transitive_closure()
            .facts([["a", "b"], ["b", "a"]].map(|e| Atom::fact("edge", e)));
        let metrics = Arc::new(CountingMetrics::new());
        let mut manager = SemiNaiveEvalManager::new(
            validate_and_stratify(&program).unwrap(),
            EvalConfig::default(),
            metrics,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on_new_fact(
            PredicateSym::new("path", 2),
            Arc::new(move |fact: &Atom| sink.lock().push(fact.to_string())),
        );
        manager.eval_to_fixpoint().unwrap();
        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["path(a, a)", "path(a, b)", "path(b, a)", "path(b, b)"]);
        assert!(matches!(
            manager.eval_to_fixpoint(),
            Err(crate::error::Error::Usage(UsageError::AlreadyEvaluated))
        ));
    }
}
