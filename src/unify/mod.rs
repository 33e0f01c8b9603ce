//! Substitutions and flat unification.
//!
//! A [`Substitution`] is copy-on-extend: every operation that binds a
//! variable returns a new value and leaves the receiver untouched, so the join
//! can branch from a shared parent without undo bookkeeping.

use std::{collections::BTreeMap, fmt, sync::Arc};

use itertools::Itertools;
use smallvec::SmallVec;

use crate::ast::{Atom, Constant, Term, Variable};

/// A partial mapping from variables to constants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitution {
    bindings: SmallVec<[(Variable, Constant); 8]>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn get(&self, var: &Variable) -> Option<&Constant> {
        self.bindings
            .iter()
            .find_map(|(v, c)| if v == var { Some(c) } else { None })
    }

    pub fn is_bound(&self, var: &Variable) -> bool {
        self.get(var).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Constant)> {
        self.bindings.iter().map(|(v, c)| (v, c))
    }

    /// A copy of this substitution with one more binding.
    ///
    /// Panics in debug builds if `var` is already bound.
    pub fn extend(&self, var: Variable, value: Constant) -> Substitution {
        debug_assert!(!self.is_bound(&var), "rebinding {}", var);
        let mut next = self.clone();
        next.bindings.push((var, value));
        next
    }

    /// The constant a term denotes under this substitution, if any.
    pub fn lookup<'a>(&'a self, term: &'a Term) -> Option<&'a Constant> {
        match term {
            Term::Const(c) => Some(c),
            Term::Var(v) => self.get(v),
        }
    }

    pub fn resolve(&self, term: &Term) -> Term {
        match self.lookup(term) {
            Some(c) => Term::Const(c.clone()),
            None => term.clone(),
        }
    }

    /// Unifies two terms. Two distinct unbound variables cannot be unified
    /// because bindings only ever map to constants; rule validation orders
    /// bodies so this does not happen.
    pub fn unify_terms(&self, left: &Term, right: &Term) -> Option<Substitution> {
        match (self.lookup(left), self.lookup(right)) {
            (Some(l), Some(r)) => (l == r).then(|| self.clone()),
            (Some(c), None) => Some(self.extend(right.as_var()?.clone(), c.clone())),
            (None, Some(c)) => Some(self.extend(left.as_var()?.clone(), c.clone())),
            (None, None) => (left == right).then(|| self.clone()),
        }
    }

    /// Whether the two terms could be made equal without extending `self`
    /// beyond what the terms already force.
    pub fn unifiable(&self, left: &Term, right: &Term) -> bool {
        match (self.lookup(left), self.lookup(right)) {
            (Some(l), Some(r)) => l == r,
            (None, None) => left == right,
            _ => true,
        }
    }

    /// Unifies a (possibly non-ground) pattern with a ground fact.
    pub fn unify_atom(&self, pattern: &Atom, fact: &Atom) -> Option<Substitution> {
        if pattern.pred != fact.pred {
            return None;
        }
        let mut next = self.clone();
        for (term, value) in pattern.args.iter().zip(fact.args.iter()) {
            let value = value.as_const()?;
            match term {
                Term::Const(c) => {
                    if c != value {
                        return None;
                    }
                }
                Term::Var(v) => match next.get(v) {
                    Some(bound) => {
                        if bound != value {
                            return None;
                        }
                    }
                    None => next.bindings.push((v.clone(), value.clone())),
                },
            }
        }
        Some(next)
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.bindings
                .iter()
                .map(|(v, c)| format!("{} -> {}", v, c))
                .join(", ")
        )
    }
}

/// A substitution restricted to named variables, used to chain the singleton
/// queries of a conjunctive query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstOnlySubstitution {
    bindings: BTreeMap<Arc<str>, Constant>,
}

impl ConstOnlySubstitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Constant> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Constant)> {
        self.bindings.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn to_substitution(&self) -> Substitution {
        Substitution {
            bindings: self
                .bindings
                .iter()
                .map(|(k, v)| (Variable::Named(k.clone()), v.clone()))
                .collect(),
        }
    }
}

impl From<&Substitution> for ConstOnlySubstitution {
    fn from(subst: &Substitution) -> Self {
        let bindings = subst
            .iter()
            .filter_map(|(v, c)| match v {
                Variable::Named(name) => Some((name.clone(), c.clone())),
                Variable::Fresh(_) => None,
            })
            .collect();
        Self { bindings }
    }
}

impl fmt::Display for ConstOnlySubstitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.bindings
                .iter()
                .map(|(v, c)| format!("{} -> {}", v, c))
                .join(", ")
        )
    }
}
