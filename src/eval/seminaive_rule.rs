//! Rewrites validated rules into the annotated clauses the fixpoint drivers
//! evaluate.
//!
//! A rule whose body mentions no predicate of its own stratum can only fire
//! on facts that are complete before the stratum starts, so it runs once in
//! the first round. Every other rule is split into one variant per
//! in-stratum body atom `b_i`: `b_i` reads the current delta, the in-stratum
//! atoms before it read the full store and the ones after it read the store
//! as it was before the latest delta. A join in which several atoms matched
//! new facts is then found exactly once, by the variant pivoting on the last
//! of them.

use std::{collections::BTreeSet, fmt};

use crate::{
    ast::{Annotation, Atom, Clause, PredicateSym, Premise},
    validate::ValidRule,
};

/// One evaluable variant of a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemiNaiveClause {
    pub head: Atom,
    /// The validated body with its positive atoms annotated.
    pub body: Vec<Premise>,
    /// Index into `body` of the atom that is matched against the driving fact.
    pub pivot: Option<usize>,
    /// The rule this variant came from, used for provenance.
    pub source: Clause,
}

impl SemiNaiveClause {
    pub fn pivot_atom(&self) -> Option<&Atom> {
        self.pivot.and_then(|i| self.body[i].positive_atom())
    }

    pub fn pivot_predicate(&self) -> Option<&PredicateSym> {
        self.pivot_atom().map(|a| &a.pred)
    }
}

impl fmt::Display for SemiNaiveClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Clause::new(self.head.clone(), self.body.clone()))
    }
}

/// The variants of a rule within the stratum whose predicates are
/// `stratum_preds`, split by the round they run in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotatedRule {
    pub first_round: Vec<SemiNaiveClause>,
    pub later_rounds: Vec<SemiNaiveClause>,
}

fn annotated(body: &[Premise], annotation_of: impl Fn(usize) -> Option<Annotation>) -> Vec<Premise> {
    body.iter()
        .enumerate()
        .map(|(i, premise)| match (premise.positive_atom(), annotation_of(i)) {
            (Some(atom), Some(annotation)) => Premise::Annotated(atom.clone(), annotation),
            _ => premise.clone(),
        })
        .collect()
}

pub fn annotate(rule: &ValidRule, stratum_preds: &BTreeSet<PredicateSym>) -> AnnotatedRule {
    let body = rule.body();
    let in_stratum: Vec<usize> = body
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            p.positive_atom()
                .is_some_and(|a| stratum_preds.contains(&a.pred))
        })
        .map(|(i, _)| i)
        .collect();

    if in_stratum.is_empty() {
        let pivot = body.iter().position(|p| p.positive_atom().is_some());
        return AnnotatedRule {
            first_round: vec![SemiNaiveClause {
                head: rule.head().clone(),
                body: annotated(body, |_| Some(Annotation::Edb)),
                pivot,
                source: rule.clause().clone(),
            }],
            later_rounds: Vec::new(),
        };
    }

    let later_rounds = in_stratum
        .iter()
        .map(|&pivot| SemiNaiveClause {
            head: rule.head().clone(),
            body: annotated(body, |i| {
                Some(if !in_stratum.contains(&i) {
                    Annotation::Edb
                } else if i == pivot {
                    Annotation::Delta
                } else if i < pivot {
                    Annotation::Idb
                } else {
                    Annotation::IdbPrev
                })
            }),
            pivot: Some(pivot),
            source: rule.clause().clone(),
        })
        .collect();
    AnnotatedRule {
        first_round: Vec::new(),
        later_rounds,
    }
}

/// One variant per positive atom, every other atom reading the full store.
pub fn annotate_flat(rule: &ValidRule) -> Vec<SemiNaiveClause> {
    let body = rule.body();
    let variants: Vec<SemiNaiveClause> = body
        .iter()
        .enumerate()
        .filter(|(_, p)| p.positive_atom().is_some())
        .map(|(pivot, _)| SemiNaiveClause {
            head: rule.head().clone(),
            body: annotated(body, |i| {
                Some(if i == pivot {
                    Annotation::Delta
                } else {
                    Annotation::Edb
                })
            }),
            pivot: Some(pivot),
            source: rule.clause().clone(),
        })
        .collect();
    if variants.is_empty() {
        vec![SemiNaiveClause {
            head: rule.head().clone(),
            body: body.to_vec(),
            pivot: None,
            source: rule.clause().clone(),
        }]
    } else {
        variants
    }
}
