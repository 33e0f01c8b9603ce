use std::fmt;

use itertools::Itertools;

use super::{Atom, Premise};
use crate::unify::Substitution;

/// A Horn clause. A clause with an empty body and a ground head is a fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Clause {
    pub head: Atom,
    pub body: Vec<Premise>,
}

impl Clause {
    pub fn new(head: Atom, body: Vec<Premise>) -> Self {
        Self { head, body }
    }

    pub fn fact(head: Atom) -> Self {
        Self { head, body: vec![] }
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty() && self.head.is_ground()
    }

    /// Instantiates the whole clause, annotations removed.
    pub fn apply(&self, subst: &Substitution) -> Clause {
        Clause {
            head: self.head.apply(subst),
            body: self.body.iter().map(|p| p.apply(subst)).collect(),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "{}.", self.head)
        } else {
            write!(f, "{} :- {}.", self.head, self.body.iter().join(", "))
        }
    }
}
