//! Static checks performed on every rule before evaluation.
//!
//! Validation also fixes the order in which a rule body is joined: positive
//! atoms keep their declared relative order, while negations, unifiers and
//! disunifiers are delayed until the variables they need are bound.

pub mod stratify;

use std::collections::HashSet;

use log::trace;

use crate::{
    ast::{Atom, Clause, Premise, PremiseHandler, Term, Variable},
    error::ValidationError,
};

/// A rule that passed validation, with its body in a safe evaluation order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValidRule {
    clause: Clause,
}

impl ValidRule {
    pub fn clause(&self) -> &Clause {
        &self.clause
    }

    pub fn head(&self) -> &Atom {
        &self.clause.head
    }

    pub fn body(&self) -> &[Premise] {
        &self.clause.body
    }

    pub fn has_negation(&self) -> bool {
        self.clause
            .body
            .iter()
            .any(|p| matches!(p, Premise::Negated(_)))
    }

    pub fn positive_atoms(&self) -> impl Iterator<Item = &Atom> {
        self.clause.body.iter().filter_map(Premise::positive_atom)
    }
}

fn term_bound(term: &Term, bound: &HashSet<Variable>) -> bool {
    match term {
        Term::Const(_) => true,
        Term::Var(v) => bound.contains(v),
    }
}

fn is_ready(premise: &Premise, bound: &HashSet<Variable>) -> bool {
    match premise {
        Premise::Positive(_) | Premise::Annotated(..) => true,
        // Anonymous variables in a negated atom are wildcards.
        Premise::Negated(atom) => atom.vars().all(|v| v.is_fresh() || bound.contains(v)),
        Premise::Unify(l, r) => term_bound(l, bound) || term_bound(r, bound),
        Premise::Disunify(l, r) => term_bound(l, bound) && term_bound(r, bound),
    }
}

/// Variables that become bound once `premise` has been evaluated.
fn bound_by(premise: &Premise) -> Vec<&Variable> {
    PremiseHandler::new(|_| Vec::new())
        .on_positive(|atom| atom.vars().collect())
        .on_annotated(|(atom, _)| atom.vars().collect())
        .on_unify(|(l, r)| l.as_var().into_iter().chain(r.as_var()).collect())
        .apply(premise)
}

fn blocked(premise: &Premise, bound: &HashSet<Variable>, rule: &Clause) -> ValidationError {
    let unbound = |t: &Term| t.as_var().filter(|v| !bound.contains(*v)).cloned();
    match premise {
        Premise::Negated(atom) => {
            let var = atom
                .vars()
                .find(|v| !v.is_fresh() && !bound.contains(*v))
                .cloned()
                .unwrap_or_else(Variable::fresh);
            ValidationError::UnboundNegatedVariable {
                var,
                atom: atom.clone(),
                rule: rule.clone(),
            }
        }
        Premise::Disunify(l, r) => ValidationError::UnboundDisunifierVariable {
            var: unbound(l)
                .or_else(|| unbound(r))
                .unwrap_or_else(Variable::fresh),
            rule: rule.clone(),
        },
        _ => ValidationError::UnboundUnifier { rule: rule.clone() },
    }
}

/// Checks that `rule` is safe and returns it with its body in evaluation order.
pub fn validate_rule(rule: &Clause) -> Result<ValidRule, ValidationError> {
    if rule.body.is_empty() {
        if !rule.head.is_ground() {
            return Err(ValidationError::NonGroundFact(rule.head.clone()));
        }
        return Ok(ValidRule {
            clause: rule.clone(),
        });
    }

    let mut bound: HashSet<Variable> = HashSet::new();
    let mut remaining: Vec<&Premise> = rule.body.iter().collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let Some(next) = remaining.iter().position(|p| is_ready(p, &bound)) else {
            return Err(blocked(remaining[0], &bound, rule));
        };
        let premise = remaining.remove(next);
        bound.extend(bound_by(premise).into_iter().cloned());
        ordered.push(premise.clone());
    }

    if let Some(var) = rule.head.vars().find(|v| !bound.contains(*v)) {
        return Err(ValidationError::NotRangeRestricted {
            var: var.clone(),
            rule: rule.clone(),
        });
    }

    let clause = Clause::new(rule.head.clone(), ordered);
    if clause != *rule {
        trace!("Reordered `{}` to `{}`", rule, clause);
    }
    Ok(ValidRule { clause })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(name: &str, args: &[&str]) -> Atom {
        Atom::from_parts(
            name,
            args.iter()
                .map(|a| {
                    if a.chars().next().is_some_and(|c| c.is_uppercase()) {
                        Term::var(a)
                    } else {
                        Term::sym(a)
                    }
                })
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn negation_is_moved_after_its_binder() {
        // p :- not q(X, b), X = a.
        let rule = Clause::new(
            atom("p", &[]),
            vec![
                Premise::Negated(atom("q", &["X", "b"])),
                Premise::Unify(Term::var("X"), Term::sym("a")),
            ],
        );
        let valid = validate_rule(&rule).unwrap();
        assert!(matches!(valid.body()[0], Premise::Unify(..)));
        assert!(matches!(valid.body()[1], Premise::Negated(_)));
        assert!(valid.has_negation());
    }

    #[test]
    fn positive_atoms_keep_their_order() {
        let rule = Clause::new(
            atom("tc", &["X", "Y"]),
            vec![
                Premise::Disunify(Term::var("X"), Term::var("Y")),
                Premise::Positive(atom("tc", &["X", "Z"])),
                Premise::Positive(atom("tc", &["Z", "Y"])),
            ],
        );
        let valid = validate_rule(&rule).unwrap();
        let atoms: Vec<String> = valid.positive_atoms().map(|a| a.to_string()).collect();
        assert_eq!(atoms, vec!["tc(X, Z)", "tc(Z, Y)"]);
        assert!(matches!(valid.body()[2], Premise::Disunify(..)));
    }

    #[test]
    fn unbound_negated_variable_is_rejected() {
        let rule = Clause::new(
            atom("p", &["X"]),
            vec![
                Premise::Positive(atom("r", &["X"])),
                Premise::Negated(atom("q", &["Y"])),
            ],
        );
        assert!(matches!(
            validate_rule(&rule),
            Err(ValidationError::UnboundNegatedVariable { .. })
        ));
    }

    #[test]
    fn anonymous_variables_in_negation_are_wildcards() {
        let rule = Clause::new(
            atom("p", &["X"]),
            vec![
                Premise::Positive(atom("r", &["X"])),
                Premise::Negated(Atom::from_parts("q", [Term::var("X"), Term::anon()])),
            ],
        );
        assert!(validate_rule(&rule).is_ok());
    }

    #[test]
    fn head_must_be_range_restricted() {
        let rule = Clause::new(
            atom("p", &["X", "Y"]),
            vec![Premise::Positive(atom("r", &["X"]))],
        );
        assert!(matches!(
            validate_rule(&rule),
            Err(ValidationError::NotRangeRestricted { .. })
        ));
    }

    #[test]
    fn unifier_between_unbound_variables_is_rejected() {
        let rule = Clause::new(
            atom("p", &["X"]),
            vec![Premise::Unify(Term::var("X"), Term::var("Y"))],
        );
        assert!(matches!(
            validate_rule(&rule),
            Err(ValidationError::UnboundUnifier { .. })
        ));
    }

    #[test]
    fn non_ground_fact_is_rejected() {
        let fact = Clause::fact(atom("p", &["X"]));
        assert!(matches!(
            validate_rule(&fact),
            Err(ValidationError::NonGroundFact(_))
        ));
    }
}
