//! Bottom-up evaluation of stratified programs.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    ast::{Atom, Clause, PredicateSym},
    config::EvalStrategy,
    error::Result,
    metrics::MetricsSink,
    unify::Substitution,
};

pub mod chunked;
pub mod clause;
pub mod indexer;
pub mod pool;
pub mod provenance;
pub mod seminaive;
pub mod seminaive_rule;
pub mod trie;

use indexer::FactIndexer;
use provenance::{Proof, ProofReconstructor, ProvenanceStore};

/// Callback invoked with every new fact of the predicate it is registered for.
pub type FactListener = Arc<dyn Fn(&Atom) + Send + Sync>;

/// Metrics shared between the engine and the threads of an evaluation.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// The common interface of the fixpoint drivers.
pub trait EvalManager: Send + Sync {
    fn strategy(&self) -> EvalStrategy;

    /// Supplies a ground fact of an extendible predicate.
    fn add_fact(&self, fact: Atom) -> Result<()>;

    fn on_new_fact(&self, pred: PredicateSym, listener: FactListener);

    /// Derives every consequence of the facts supplied so far.
    fn eval_to_fixpoint(&mut self) -> Result<FactStore>;
}

/// Whether some fact of `store` matches `atom` under `subst`. Unbound
/// variables of `atom` match anything.
pub(crate) fn matches_any(store: &dyn FactIndexer, atom: &Atom, subst: &Substitution) -> bool {
    store
        .index_into(atom, subst)
        .iter()
        .any(|fact| subst.unify_atom(atom, fact).is_some())
}

#[derive(Default)]
pub(crate) struct Listeners {
    by_predicate: RwLock<HashMap<PredicateSym, Vec<FactListener>>>,
}

impl Listeners {
    pub(crate) fn register(&self, pred: PredicateSym, listener: FactListener) {
        self.by_predicate.write().entry(pred).or_default().push(listener);
    }

    pub(crate) fn notify(&self, fact: &Atom) {
        let listeners = match self.by_predicate.read().get(&fact.pred) {
            Some(listeners) => listeners.clone(),
            None => return,
        };
        for listener in listeners {
            listener(fact);
        }
    }
}

/// The facts known at the end of an evaluation, with their justifications if
/// provenance was tracked.
#[derive(Clone)]
pub struct FactStore {
    facts: Arc<dyn FactIndexer>,
    provenance: Option<Arc<ProvenanceStore>>,
}

impl FactStore {
    pub(crate) fn new(facts: Arc<dyn FactIndexer>, provenance: Option<Arc<ProvenanceStore>>) -> Self {
        Self { facts, provenance }
    }

    pub fn indexer(&self) -> &dyn FactIndexer {
        self.facts.as_ref()
    }

    pub fn facts(&self, pred: &PredicateSym) -> Vec<Atom> {
        self.facts.facts(pred)
    }

    pub fn predicates(&self) -> Vec<PredicateSym> {
        self.facts.predicates()
    }

    pub fn contains(&self, fact: &Atom) -> bool {
        self.facts.contains(fact)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn tracks_provenance(&self) -> bool {
        self.provenance.is_some()
    }

    /// The grounded rule instance that derived `fact`. `None` for given facts,
    /// unknown facts, and when provenance is not tracked.
    pub fn justification(&self, fact: &Atom) -> Option<Clause> {
        self.provenance.as_ref()?.justification(fact)
    }

    /// The full derivation tree of `fact`, if it is stored and provenance is
    /// tracked.
    pub fn proof(&self, fact: &Atom) -> Result<Option<Proof>> {
        let Some(provenance) = &self.provenance else {
            return Ok(None);
        };
        ProofReconstructor::new(self.facts.as_ref(), provenance).build(fact)
    }
}

impl std::fmt::Debug for FactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactStore")
            .field("facts", &self.facts.len())
            .field("tracks_provenance", &self.tracks_provenance())
            .finish()
    }
}
