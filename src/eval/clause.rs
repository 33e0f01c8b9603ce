use log::trace;

use super::seminaive_rule::SemiNaiveClause;
use crate::{
    ast::{Annotation, Atom, Premise},
    unify::Substitution,
};

/// Runs one annotated clause by nested-loop join, reporting every head
/// instance it derives.
///
/// The evaluator does not own any facts. Candidates for a body atom come from
/// `get_facts`, negated atoms are checked with `is_known`, and derived head
/// facts go to `report_fact` together with the substitution that produced
/// them.
pub struct ClauseEvaluator<'c, R, G, K> {
    clause: &'c SemiNaiveClause,
    report_fact: R,
    get_facts: G,
    is_known: K,
}

impl<'c, R, G, K> ClauseEvaluator<'c, R, G, K>
where
    R: FnMut(Atom, &Substitution),
    G: Fn(&Atom, Annotation, &Substitution) -> Vec<Atom>,
    K: Fn(&Atom, &Substitution) -> bool,
{
    pub fn new(clause: &'c SemiNaiveClause, report_fact: R, get_facts: G, is_known: K) -> Self {
        Self {
            clause,
            report_fact,
            get_facts,
            is_known,
        }
    }

    /// Evaluates the clause for every join that matches `pivot_fact` against
    /// the pivot atom.
    pub fn evaluate(&mut self, pivot_fact: &Atom) {
        let Some(pivot) = self.clause.pivot_atom() else {
            return;
        };
        if let Some(subst) = Substitution::new().unify_atom(pivot, pivot_fact) {
            self.extend(0, subst);
        }
    }

    /// Evaluates a clause without a pivot, starting from the empty substitution.
    pub fn evaluate_unpivoted(&mut self) {
        self.extend(0, Substitution::new());
    }

    fn extend(&mut self, position: usize, subst: Substitution) {
        let clause = self.clause;
        if position == clause.body.len() {
            let fact = clause.head.apply(&subst);
            trace!("{} derived by `{}` under {}", fact, clause, subst);
            (self.report_fact)(fact, &subst);
            return;
        }
        if clause.pivot == Some(position) {
            self.extend(position + 1, subst);
            return;
        }

        match &clause.body[position] {
            Premise::Positive(atom) => self.join(position, atom, Annotation::Edb, &subst),
            Premise::Annotated(atom, annotation) => self.join(position, atom, *annotation, &subst),
            Premise::Negated(atom) => {
                if !(self.is_known)(atom, &subst) {
                    self.extend(position + 1, subst);
                }
            }
            Premise::Unify(l, r) => {
                if let Some(next) = subst.unify_terms(l, r) {
                    self.extend(position + 1, next);
                }
            }
            Premise::Disunify(l, r) => {
                if !subst.unifiable(l, r) {
                    self.extend(position + 1, subst);
                }
            }
        }
    }

    fn join(&mut self, position: usize, atom: &Atom, annotation: Annotation, subst: &Substitution) {
        for candidate in (self.get_facts)(atom, annotation, subst) {
            if let Some(next) = subst.unify_atom(atom, &candidate) {
                self.extend(position + 1, next);
            }
        }
    }
}
