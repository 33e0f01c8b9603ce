//! Thread-safe, per-predicate fact storage with substitution-directed lookup.
//!
//! Each predicate owns a [`Relation`]: its facts in insertion order plus one
//! exact-match index per column. [`FactIndexer::index_into`] uses the most
//! selective bound column to pick candidates and filters them on the other
//! bound columns, so the result is exactly the set of facts that agree with
//! the pattern on every bound position.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::{
    ast::{Atom, Constant, PredicateSym, Term},
    config::EvalConfig,
    unify::Substitution,
};

pub trait FactIndexer: Send + Sync {
    /// Stores a ground fact. Returns whether it was stored as new.
    fn add(&self, fact: Atom) -> bool;

    /// Stores every fact, returning how many were new.
    fn add_all(&self, facts: Vec<Atom>) -> usize {
        facts.into_iter().filter(|f| self.add(f.clone())).count()
    }

    /// The stored facts matching `pattern` at every position that is a
    /// constant or a variable bound by `subst`.
    fn index_into(&self, pattern: &Atom, subst: &Substitution) -> Vec<Atom>;

    /// Every stored fact of `pred`.
    fn facts(&self, pred: &PredicateSym) -> Vec<Atom>;

    /// Predicates with at least one stored fact, sorted.
    fn predicates(&self) -> Vec<PredicateSym>;

    fn contains(&self, fact: &Atom) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Relation {
    facts: Vec<Atom>,
    /// Present only for deduplicating relations.
    members: Option<HashSet<Atom>>,
    columns: Vec<HashMap<Constant, Vec<usize>>>,
}

impl Relation {
    fn new(arity: usize, dedup: bool) -> Self {
        Self {
            facts: Vec::new(),
            members: dedup.then(HashSet::new),
            columns: vec![HashMap::new(); arity],
        }
    }

    fn insert(&mut self, fact: Atom) -> bool {
        if let Some(members) = &mut self.members {
            if !members.insert(fact.clone()) {
                return false;
            }
        }
        let idx = self.facts.len();
        for (col, term) in fact.args.iter().enumerate() {
            if let Term::Const(c) = term {
                self.columns[col].entry(c.clone()).or_default().push(idx);
            }
        }
        self.facts.push(fact);
        true
    }

    fn contains(&self, fact: &Atom) -> bool {
        match &self.members {
            Some(members) => members.contains(fact),
            None => !self.select(fact, &Substitution::new()).is_empty(),
        }
    }

    fn select(&self, pattern: &Atom, subst: &Substitution) -> Vec<Atom> {
        let bound: SmallVec<[(usize, &Constant); 4]> = pattern
            .args
            .iter()
            .enumerate()
            .filter_map(|(col, t)| subst.lookup(t).map(|c| (col, c)))
            .collect();
        if bound.is_empty() {
            return self.facts.clone();
        }

        let mut best: Option<&Vec<usize>> = None;
        for &(col, c) in &bound {
            match self.columns[col].get(c) {
                None => return Vec::new(),
                Some(postings) => {
                    if best.map_or(true, |b| postings.len() < b.len()) {
                        best = Some(postings);
                    }
                }
            }
        }
        let Some(postings) = best else {
            return Vec::new();
        };
        postings
            .iter()
            .map(|&i| &self.facts[i])
            .filter(|f| {
                bound
                    .iter()
                    .all(|&(col, c)| f.args[col].as_const() == Some(c))
            })
            .cloned()
            .collect()
    }
}

/// Shared bucket storage behind both indexer flavours.
struct Buckets {
    relations: DashMap<PredicateSym, Arc<RwLock<Relation>>>,
    dedup: bool,
    count: AtomicUsize,
}

impl Buckets {
    fn new(config: &EvalConfig, dedup: bool) -> Self {
        Self {
            relations: DashMap::with_shard_amount(config.shard_amount()),
            dedup,
            count: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, pred: &PredicateSym) -> Arc<RwLock<Relation>> {
        if let Some(existing) = self.relations.get(pred) {
            return Arc::clone(existing.value());
        }
        let dedup = self.dedup;
        Arc::clone(
            self.relations
                .entry(pred.clone())
                .or_insert_with(|| Arc::new(RwLock::new(Relation::new(pred.arity(), dedup))))
                .value(),
        )
    }

    fn existing(&self, pred: &PredicateSym) -> Option<Arc<RwLock<Relation>>> {
        self.relations.get(pred).map(|r| Arc::clone(r.value()))
    }

    fn add(&self, fact: Atom) -> bool {
        debug_assert!(fact.is_ground(), "indexing non-ground fact {}", fact);
        let bucket = self.bucket(&fact.pred);
        let added = bucket.write().insert(fact);
        if added {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        added
    }

    fn index_into(&self, pattern: &Atom, subst: &Substitution) -> Vec<Atom> {
        self.existing(&pattern.pred)
            .map(|r| r.read().select(pattern, subst))
            .unwrap_or_default()
    }

    fn facts(&self, pred: &PredicateSym) -> Vec<Atom> {
        self.existing(pred)
            .map(|r| r.read().facts.clone())
            .unwrap_or_default()
    }

    fn predicates(&self) -> Vec<PredicateSym> {
        let mut preds: Vec<PredicateSym> = self
            .relations
            .iter()
            .filter(|r| !r.value().read().facts.is_empty())
            .map(|r| r.key().clone())
            .collect();
        preds.sort();
        preds
    }

    fn contains(&self, fact: &Atom) -> bool {
        self.existing(&fact.pred)
            .is_some_and(|r| r.read().contains(fact))
    }
}

/// Deduplicating indexer: [`FactIndexer::add`] is the point where a fact
/// becomes known.
pub struct SetIndexer(Buckets);

impl SetIndexer {
    pub fn new(config: &EvalConfig) -> Self {
        Self(Buckets::new(config, true))
    }
}

impl Default for SetIndexer {
    fn default() -> Self {
        Self::new(&EvalConfig::default())
    }
}

impl FactIndexer for SetIndexer {
    fn add(&self, fact: Atom) -> bool {
        self.0.add(fact)
    }

    fn index_into(&self, pattern: &Atom, subst: &Substitution) -> Vec<Atom> {
        self.0.index_into(pattern, subst)
    }

    fn facts(&self, pred: &PredicateSym) -> Vec<Atom> {
        self.0.facts(pred)
    }

    fn predicates(&self) -> Vec<PredicateSym> {
        self.0.predicates()
    }

    fn contains(&self, fact: &Atom) -> bool {
        self.0.contains(fact)
    }

    fn len(&self) -> usize {
        self.0.count.load(Ordering::Relaxed)
    }
}

/// Append-only indexer that keeps insertion order and never deduplicates;
/// callers filter duplicates beforehand, typically through a `FactTrie`.
pub struct QueueIndexer(Buckets);

impl QueueIndexer {
    pub fn new(config: &EvalConfig) -> Self {
        Self(Buckets::new(config, false))
    }
}

impl FactIndexer for QueueIndexer {
    fn add(&self, fact: Atom) -> bool {
        self.0.add(fact)
    }

    fn index_into(&self, pattern: &Atom, subst: &Substitution) -> Vec<Atom> {
        self.0.index_into(pattern, subst)
    }

    fn facts(&self, pred: &PredicateSym) -> Vec<Atom> {
        self.0.facts(pred)
    }

    fn predicates(&self) -> Vec<PredicateSym> {
        self.0.predicates()
    }

    fn contains(&self, fact: &Atom) -> bool {
        self.0.contains(fact)
    }

    fn len(&self) -> usize {
        self.0.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use itertools::Itertools;

    use super::*;
    use crate::ast::Variable;

    fn config() -> EvalConfig {
        EvalConfig::default().with_parallelism(2)
    }

    fn grid(indexer: &dyn FactIndexer, n: i64) {
        for a in 0..n {
            for b in 0..n {
                indexer.add(Atom::fact("r", [Constant::Int(a), Constant::Int(b), Constant::Int(a + b)]));
            }
        }
    }

    #[test]
    fn set_indexer_deduplicates() {
        let indexer = SetIndexer::new(&config());
        assert!(indexer.add(Atom::fact("edge", ["a", "b"])));
        assert!(!indexer.add(Atom::fact("edge", ["a", "b"])));
        assert_eq!(indexer.len(), 1);
        assert_eq!(
            indexer.add_all(vec![Atom::fact("edge", ["a", "b"]), Atom::fact("edge", ["b", "c"])]),
            1
        );
        assert!(indexer.contains(&Atom::fact("edge", ["b", "c"])));
        assert!(!indexer.contains(&Atom::fact("edge", ["c", "b"])));
    }

    #[test]
    fn queue_indexer_keeps_duplicates_in_order() {
        let indexer = QueueIndexer::new(&config());
        indexer.add(Atom::fact("p", ["b"]));
        indexer.add(Atom::fact("p", ["a"]));
        indexer.add(Atom::fact("p", ["b"]));
        let pred = PredicateSym::new("p", 1);
        assert_eq!(
            indexer.facts(&pred),
            vec![Atom::fact("p", ["b"]), Atom::fact("p", ["a"]), Atom::fact("p", ["b"])]
        );
        assert_eq!(indexer.len(), 3);
        assert!(indexer.contains(&Atom::fact("p", ["a"])));
    }

    #[test]
    fn index_into_returns_exactly_the_matching_facts() {
        let indexer = SetIndexer::new(&config());
        grid(&indexer, 6);
        let all = indexer.facts(&PredicateSym::new("r", 3));

        // Every combination of bound columns.
        for mask in 0..8u8 {
            let x = Variable::named("X");
            let y = Variable::named("Y");
            let pattern = Atom::from_parts(
                "r",
                [Term::Var(x.clone()), Term::Var(y.clone()), Term::var("Z")],
            );
            let mut subst = Substitution::new();
            if mask & 1 != 0 {
                subst = subst.extend(x, Constant::Int(2));
            }
            if mask & 2 != 0 {
                subst = subst.extend(y, Constant::Int(3));
            }
            let pattern = if mask & 4 != 0 {
                Atom::from_parts(
                    "r",
                    [pattern.args[0].clone(), pattern.args[1].clone(), Term::int(5)],
                )
            } else {
                pattern
            };

            let expected: Vec<Atom> = all
                .iter()
                .filter(|f| subst.unify_atom(&pattern, f).is_some())
                .cloned()
                .sorted()
                .collect();
            let got: Vec<Atom> = indexer.index_into(&pattern, &subst).into_iter().sorted().collect();
            assert_eq!(got, expected, "mask {}", mask);
        }
    }

    #[test]
    fn unknown_predicate_is_empty() {
        let indexer = SetIndexer::new(&config());
        let pattern = Atom::from_parts("nothing", [Term::var("X")]);
        assert!(indexer.index_into(&pattern, &Substitution::new()).is_empty());
        assert!(indexer.predicates().is_empty());
        assert!(indexer.is_empty());
    }

    #[test]
    fn concurrent_adds_do_not_lose_or_duplicate_facts() {
        let indexer = Arc::new(SetIndexer::new(&config()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let indexer = Arc::clone(&indexer);
                thread::spawn(move || {
                    for i in 0..500i64 {
                        // Half of the facts are shared between threads.
                        let owner = if i % 2 == 0 { 0 } else { t };
                        indexer.add(Atom::fact("n", [Constant::Int(owner), Constant::Int(i)]));
                        let pattern = Atom::from_parts("n", [Term::int(0), Term::var("I")]);
                        let _ = indexer.index_into(&pattern, &Substitution::new());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 250 shared even facts, plus the odd facts of threads 0..4.
        assert_eq!(indexer.len(), 250 + 4 * 250);
    }
}
