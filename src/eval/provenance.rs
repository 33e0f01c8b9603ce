//! Justifications of derived facts and the proof trees rebuilt from them.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use dashmap::DashMap;

use super::indexer::FactIndexer;
use crate::{
    ast::{Atom, Clause},
    error::{Error, Result},
};

/// Maps each derived fact to the grounded rule instance that first derived it.
/// Facts that were given rather than derived have no entry.
#[derive(Debug, Default)]
pub struct ProvenanceStore {
    justifications: DashMap<Atom, Clause>,
}

impl ProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `clause` as the justification of `fact` unless one exists.
    pub fn record(&self, fact: Atom, clause: Clause) {
        self.justifications.entry(fact).or_insert(clause);
    }

    pub fn justification(&self, fact: &Atom) -> Option<Clause> {
        self.justifications.get(fact).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.justifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.justifications.is_empty()
    }
}

/// The derivation tree of a single fact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub root: Arc<ProofNode>,
}

/// A proven fact and how it was proven.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofNode {
    pub conclusion: Atom,
    pub justification: Justification,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Justification {
    /// The conclusion was given as a fact.
    Fact,
    /// The conclusion is the head of this grounded rule instance, whose
    /// positive premises are proven by the child nodes.
    Rule(Clause, Vec<Arc<ProofNode>>),
}

impl Proof {
    /// Number of nodes in the tree, counting shared subproofs once per use.
    pub fn size(&self) -> usize {
        let mut size = 0;
        let mut stack = vec![self.root.as_ref()];
        while let Some(node) = stack.pop() {
            size += 1;
            if let Justification::Rule(_, children) = &node.justification {
                stack.extend(children.iter().map(|c| c.as_ref()));
            }
        }
        size
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self.root.as_ref(), 0)];
        while let Some((node, depth)) = stack.pop() {
            let indent = "  ".repeat(depth);
            match &node.justification {
                Justification::Fact => writeln!(f, "{}{}.", indent, node.conclusion)?,
                Justification::Rule(clause, children) => {
                    writeln!(f, "{}{}  [by {}]", indent, node.conclusion, clause)?;
                    stack.extend(children.iter().rev().map(|c| (c.as_ref(), depth + 1)));
                }
            }
        }
        Ok(())
    }
}

impl Drop for ProofNode {
    // Unlinks the subtree node by node so long chains do not recurse.
    fn drop(&mut self) {
        let Justification::Rule(_, children) = &mut self.justification else {
            return;
        };
        let mut stack = std::mem::take(children);
        while let Some(child) = stack.pop() {
            if let Ok(mut node) = Arc::try_unwrap(child) {
                if let Justification::Rule(_, grandchildren) = &mut node.justification {
                    stack.append(grandchildren);
                }
            }
        }
    }
}

/// A node whose premises are still being proven.
struct Frame {
    conclusion: Atom,
    clause: Clause,
    premises: Vec<Atom>,
    children: Vec<Arc<ProofNode>>,
}

enum Step {
    Proven(Arc<ProofNode>),
    Expand(Frame),
}

/// Turns a derived fact back into a [`ProofNode`] tree by following the
/// justifications recorded in a [`ProvenanceStore`].
pub struct ProofReconstructor<'a> {
    facts: &'a dyn FactIndexer,
    provenance: &'a ProvenanceStore,
    /// Facts on the current path, to detect cyclic justifications.
    in_progress: HashSet<Atom>,
    proven: HashMap<Atom, Arc<ProofNode>>,
}

impl<'a> ProofReconstructor<'a> {
    pub fn new(facts: &'a dyn FactIndexer, provenance: &'a ProvenanceStore) -> Self {
        Self {
            facts,
            provenance,
            in_progress: HashSet::new(),
            proven: HashMap::new(),
        }
    }

    /// Builds the proof of `fact`, or `None` if the fact is not stored.
    pub fn build(mut self, fact: &Atom) -> Result<Option<Proof>> {
        if !self.facts.contains(fact) {
            return Ok(None);
        }
        let root = self.prove(fact)?;
        Ok(Some(Proof { root }))
    }

    fn open(&mut self, fact: &Atom) -> Result<Step> {
        if let Some(node) = self.proven.get(fact) {
            return Ok(Step::Proven(Arc::clone(node)));
        }
        let Some(clause) = self.provenance.justification(fact) else {
            let node = Arc::new(ProofNode {
                conclusion: fact.clone(),
                justification: Justification::Fact,
            });
            self.proven.insert(fact.clone(), Arc::clone(&node));
            return Ok(Step::Proven(node));
        };
        if !self.in_progress.insert(fact.clone()) {
            return Err(Error::internal(format!(
                "cyclic justification through {}",
                fact
            )));
        }
        let premises: Vec<Atom> = clause
            .body
            .iter()
            .filter_map(|p| p.positive_atom())
            .cloned()
            .collect();
        if let Some(missing) = premises.iter().find(|p| !self.facts.contains(p)) {
            return Err(Error::internal(format!(
                "premise {} of {} is not a stored fact",
                missing, fact
            )));
        }
        Ok(Step::Expand(Frame {
            conclusion: fact.clone(),
            clause,
            children: Vec::with_capacity(premises.len()),
            premises,
        }))
    }

    /// Depth-first over premises with an explicit stack of open frames.
    fn prove(&mut self, fact: &Atom) -> Result<Arc<ProofNode>> {
        let mut stack = match self.open(fact)? {
            Step::Proven(node) => return Ok(node),
            Step::Expand(frame) => vec![frame],
        };
        while let Some(top) = stack.last_mut() {
            if let Some(premise) = top.premises.get(top.children.len()).cloned() {
                match self.open(&premise)? {
                    Step::Proven(node) => top.children.push(node),
                    Step::Expand(frame) => stack.push(frame),
                }
                continue;
            }

            let Some(frame) = stack.pop() else { break };
            self.in_progress.remove(&frame.conclusion);
            let node = Arc::new(ProofNode {
                conclusion: frame.conclusion.clone(),
                justification: Justification::Rule(frame.clause, frame.children),
            });
            self.proven.insert(frame.conclusion, Arc::clone(&node));
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => return Ok(node),
            }
        }
        Err(Error::internal(format!("no proof built for {}", fact)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::Premise,
        eval::indexer::SetIndexer,
    };

    #[test]
    fn first_justification_wins() {
        let store = ProvenanceStore::new();
        let fact = Atom::fact("p", ["a"]);
        let first = Clause::new(fact.clone(), vec![Premise::Positive(Atom::fact("q", ["a"]))]);
        let second = Clause::new(fact.clone(), vec![Premise::Positive(Atom::fact("r", ["a"]))]);
        store.record(fact.clone(), first.clone());
        store.record(fact.clone(), second);
        assert_eq!(store.justification(&fact), Some(first));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reconstructs_a_chain() {
        let facts = SetIndexer::default();
        let provenance = ProvenanceStore::new();
        let e = Atom::fact("edge", ["a", "b"]);
        let p = Atom::fact("path", ["a", "b"]);
        let q = Atom::fact("reach", ["b"]);
        for f in [&e, &p, &q] {
            facts.add(f.clone());
        }
        provenance.record(p.clone(), Clause::new(p.clone(), vec![Premise::Positive(e.clone())]));
        provenance.record(q.clone(), Clause::new(q.clone(), vec![Premise::Positive(p.clone())]));

        let proof = ProofReconstructor::new(&facts, &provenance)
            .build(&q)
            .unwrap()
            .unwrap();
        assert_eq!(proof.size(), 3);
        assert_eq!(proof.root.conclusion, q);
        let Justification::Rule(_, children) = &proof.root.justification else {
            panic!("expected a rule justification");
        };
        assert_eq!(children[0].conclusion, p);
        assert_eq!(
            proof.to_string(),
            "reach(b)  [by reach(b) :- path(a, b).]\n  path(a, b)  [by path(a, b) :- edge(a, b).]\n    edge(a, b).\n"
        );

        assert!(ProofReconstructor::new(&facts, &provenance)
            .build(&Atom::fact("reach", ["z"]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn long_chains_do_not_recurse() {
        const STEPS: i64 = 100_000;
        let facts = SetIndexer::default();
        let provenance = ProvenanceStore::new();
        facts.add(Atom::fact("reach", [0i64]));
        for i in 0..STEPS {
            let edge = Atom::fact("edge", [i, i + 1]);
            let next = Atom::fact("reach", [i + 1]);
            facts.add(edge.clone());
            facts.add(next.clone());
            provenance.record(
                next.clone(),
                Clause::new(
                    next,
                    vec![
                        Premise::Positive(Atom::fact("reach", [i])),
                        Premise::Positive(edge),
                    ],
                ),
            );
        }

        let proof = ProofReconstructor::new(&facts, &provenance)
            .build(&Atom::fact("reach", [STEPS]))
            .unwrap()
            .unwrap();
        assert_eq!(proof.size(), 2 * STEPS as usize + 1);
        assert_eq!(proof.root.conclusion, Atom::fact("reach", [STEPS]));
    }

    #[test]
    fn shared_premises_are_proven_once() {
        let facts = SetIndexer::default();
        let provenance = ProvenanceStore::new();
        let q = Atom::fact("q", ["a"]);
        let r = Atom::fact("r", ["a"]);
        let p = Atom::fact("p", ["a"]);
        for f in [&q, &r, &p] {
            facts.add(f.clone());
        }
        provenance.record(r.clone(), Clause::new(r.clone(), vec![Premise::Positive(q.clone())]));
        provenance.record(
            p.clone(),
            Clause::new(
                p.clone(),
                vec![Premise::Positive(r.clone()), Premise::Positive(r.clone())],
            ),
        );

        let proof = ProofReconstructor::new(&facts, &provenance)
            .build(&p)
            .unwrap()
            .unwrap();
        let Justification::Rule(_, children) = &proof.root.justification else {
            panic!("expected a rule justification");
        };
        assert!(Arc::ptr_eq(&children[0], &children[1]));
        assert_eq!(proof.size(), 5);
    }

    #[test]
    fn cyclic_justification_is_an_error() {
        let facts = SetIndexer::default();
        let provenance = ProvenanceStore::new();
        let p = Atom::fact("p", ["a"]);
        facts.add(p.clone());
        provenance.record(p.clone(), Clause::new(p.clone(), vec![Premise::Positive(p.clone())]));
        assert!(ProofReconstructor::new(&facts, &provenance).build(&p).is_err());
    }
}
