use crate::ast::{Atom, Clause, PredicateSym, Variable};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Problems with a program, detected before any evaluation starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("program is not stratifiable: {predicate} depends negatively on {negated} inside a recursive component")]
    Unstratifiable {
        predicate: PredicateSym,
        negated: PredicateSym,
    },
    #[error("variable {var} of negated atom {atom} is not bound by the body of `{rule}`")]
    UnboundNegatedVariable {
        var: Variable,
        atom: Atom,
        rule: Clause,
    },
    #[error("variable {var} of a disunification is not bound by the body of `{rule}`")]
    UnboundDisunifierVariable { var: Variable, rule: Clause },
    #[error("neither side of a unification is bound in `{rule}`")]
    UnboundUnifier { rule: Clause },
    #[error("head variable {var} is not bound by the body of `{rule}`")]
    NotRangeRestricted { var: Variable, rule: Clause },
    #[error("fact {0} is not ground")]
    NonGroundFact(Atom),
    #[error("predicate {pred} takes {} arguments, got {found}", pred.arity())]
    WrongArgumentCount { pred: PredicateSym, found: usize },
    #[error("negation is not supported by the chunked evaluator: `{0}`")]
    NegationUnsupported(Clause),
    #[error("extendible predicate {0} is defined by a rule")]
    ExtendibleIsIdb(PredicateSym),
}

/// Contract violations by the caller of the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("engine has not been initialized")]
    NotInitialized,
    #[error("engine has already been initialized")]
    AlreadyInitialized,
    #[error("engine has already been evaluated to a fixpoint")]
    AlreadyEvaluated,
    #[error("predicate {0} is not declared extendible")]
    NotExtendible(PredicateSym),
    #[error("fact {0} is not ground")]
    NonGroundFact(Atom),
    #[error("{0} is not supported by the {1} strategy")]
    UnsupportedStrategy(&'static str, &'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(s: impl Into<String>) -> Self {
        Self::Internal(s.into())
    }
}
