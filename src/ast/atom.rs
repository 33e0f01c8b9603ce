use std::{fmt, sync::Arc};

use itertools::Itertools;

use super::{Constant, Term, Variable};
use crate::{error::ValidationError, unify::Substitution};

/// Identifies a relation: a name together with its arity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredicateSym {
    name: Arc<str>,
    arity: usize,
}

impl PredicateSym {
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name: Arc::from(name),
            arity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for PredicateSym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A predicate applied to a list of terms. Immutable; cloning is cheap.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom {
    pub pred: PredicateSym,
    pub args: Arc<[Term]>,
}

impl Atom {
    pub fn new(pred: PredicateSym, args: impl Into<Arc<[Term]>>) -> Result<Self, ValidationError> {
        let args = args.into();
        if pred.arity() != args.len() {
            return Err(ValidationError::WrongArgumentCount {
                pred,
                found: args.len(),
            });
        }
        Ok(Self { pred, args })
    }

    /// Builds an atom whose predicate arity is taken from the argument list.
    pub fn from_parts(name: &str, args: impl Into<Vec<Term>>) -> Self {
        let args: Vec<Term> = args.into();
        Self {
            pred: PredicateSym::new(name, args.len()),
            args: args.into(),
        }
    }

    /// A ground atom over the given constants.
    pub fn fact<C: Into<Constant>>(name: &str, values: impl IntoIterator<Item = C>) -> Self {
        let args: Vec<Term> = values.into_iter().map(|c| Term::Const(c.into())).collect();
        Self::from_parts(name, args)
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_ground)
    }

    pub fn vars(&self) -> impl Iterator<Item = &Variable> {
        self.args.iter().filter_map(Term::as_var)
    }

    /// Replaces every bound variable by its constant.
    pub fn apply(&self, subst: &Substitution) -> Atom {
        if subst.is_empty() || self.is_ground() {
            return self.clone();
        }
        let args: Vec<Term> = self.args.iter().map(|t| subst.resolve(t)).collect();
        Atom {
            pred: self.pred.clone(),
            args: args.into(),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.pred.name())
        } else {
            write!(f, "{}({})", self.pred.name(), self.args.iter().join(", "))
        }
    }
}
