use std::fmt;

use strum_macros::Display;

use super::{Atom, Term, Variable};
use crate::unify::Substitution;

/// Which fact set an atom in a semi-naive clause body draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Annotation {
    /// Extensional or earlier-stratum predicate: full store.
    Edb,
    /// In-stratum predicate read from the full store.
    Idb,
    /// In-stratum predicate read from the store as it was before the latest delta.
    IdbPrev,
    /// The pivot: only the facts derived in the previous round.
    Delta,
}

/// One element of a rule body.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Premise {
    Positive(Atom),
    Negated(Atom),
    Unify(Term, Term),
    Disunify(Term, Term),
    /// Only produced by the semi-naive rewriting.
    Annotated(Atom, Annotation),
}

impl Premise {
    /// The atom of a premise that binds variables by joining against facts.
    pub fn positive_atom(&self) -> Option<&Atom> {
        match self {
            Premise::Positive(a) | Premise::Annotated(a, _) => Some(a),
            _ => None,
        }
    }

    pub fn vars(&self) -> Vec<&Variable> {
        match self {
            Premise::Positive(a) | Premise::Negated(a) | Premise::Annotated(a, _) => {
                a.vars().collect()
            }
            Premise::Unify(l, r) | Premise::Disunify(l, r) => {
                l.as_var().into_iter().chain(r.as_var()).collect()
            }
        }
    }

    /// Substitutes bound variables, dropping any annotation.
    pub fn apply(&self, subst: &Substitution) -> Premise {
        match self {
            Premise::Positive(a) | Premise::Annotated(a, _) => Premise::Positive(a.apply(subst)),
            Premise::Negated(a) => Premise::Negated(a.apply(subst)),
            Premise::Unify(l, r) => Premise::Unify(subst.resolve(l), subst.resolve(r)),
            Premise::Disunify(l, r) => Premise::Disunify(subst.resolve(l), subst.resolve(r)),
        }
    }
}

impl fmt::Display for Premise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Premise::Positive(a) => write!(f, "{}", a),
            Premise::Negated(a) => write!(f, "not {}", a),
            Premise::Unify(l, r) => write!(f, "{} = {}", l, r),
            Premise::Disunify(l, r) => write!(f, "{} != {}", l, r),
            Premise::Annotated(a, ann) => write!(f, "{}@{}", a, ann),
        }
    }
}

type Handler<'a, T, R> = Option<Box<dyn FnMut(T) -> R + 'a>>;

/// Per-variant handlers over [`Premise`] with a fallback for the variants
/// that have none.
pub struct PremiseHandler<'a, R> {
    positive: Handler<'a, &'a Atom, R>,
    negated: Handler<'a, &'a Atom, R>,
    unify: Handler<'a, (&'a Term, &'a Term), R>,
    disunify: Handler<'a, (&'a Term, &'a Term), R>,
    annotated: Handler<'a, (&'a Atom, Annotation), R>,
    default: Box<dyn FnMut(&'a Premise) -> R + 'a>,
}

impl<'a, R> PremiseHandler<'a, R> {
    pub fn new(default: impl FnMut(&'a Premise) -> R + 'a) -> Self {
        Self {
            positive: None,
            negated: None,
            unify: None,
            disunify: None,
            annotated: None,
            default: Box::new(default),
        }
    }

    pub fn on_positive(mut self, f: impl FnMut(&'a Atom) -> R + 'a) -> Self {
        self.positive = Some(Box::new(f));
        self
    }

    pub fn on_negated(mut self, f: impl FnMut(&'a Atom) -> R + 'a) -> Self {
        self.negated = Some(Box::new(f));
        self
    }

    pub fn on_unify(mut self, f: impl FnMut((&'a Term, &'a Term)) -> R + 'a) -> Self {
        self.unify = Some(Box::new(f));
        self
    }

    pub fn on_disunify(mut self, f: impl FnMut((&'a Term, &'a Term)) -> R + 'a) -> Self {
        self.disunify = Some(Box::new(f));
        self
    }

    pub fn on_annotated(mut self, f: impl FnMut((&'a Atom, Annotation)) -> R + 'a) -> Self {
        self.annotated = Some(Box::new(f));
        self
    }

    pub fn apply(&mut self, premise: &'a Premise) -> R {
        match premise {
            Premise::Positive(a) => match self.positive.as_mut() {
                Some(f) => f(a),
                None => (self.default)(premise),
            },
            Premise::Negated(a) => match self.negated.as_mut() {
                Some(f) => f(a),
                None => (self.default)(premise),
            },
            Premise::Unify(l, r) => match self.unify.as_mut() {
                Some(f) => f((l, r)),
                None => (self.default)(premise),
            },
            Premise::Disunify(l, r) => match self.disunify.as_mut() {
                Some(f) => f((l, r)),
                None => (self.default)(premise),
            },
            Premise::Annotated(a, ann) => match self.annotated.as_mut() {
                Some(f) => f((a, *ann)),
                None => (self.default)(premise),
            },
        }
    }
}
