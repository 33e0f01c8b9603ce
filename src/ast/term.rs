use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

static NEXT_FRESH_ID: AtomicU64 = AtomicU64::new(0);

/// An opaque, value-compared constant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constant {
    Int(i64),
    Symbol(Arc<str>),
}

impl Constant {
    pub fn symbol(s: &str) -> Self {
        Constant::Symbol(Arc::from(s))
    }
}

impl From<i64> for Constant {
    fn from(v: i64) -> Self {
        Constant::Int(v)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::symbol(s)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Symbol(s) => write!(f, "{}", s),
        }
    }
}

/// A logic variable.
///
/// Anonymous variables (`_` in program text) are `Fresh` and carry an id that
/// is unique for the lifetime of the process, so two of them never compare
/// equal and never share a binding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    Named(Arc<str>),
    Fresh(u64),
}

impl Variable {
    pub fn named(name: &str) -> Self {
        Variable::Named(Arc::from(name))
    }

    pub fn fresh() -> Self {
        Variable::Fresh(NEXT_FRESH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Variable::Fresh(_))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Named(name) => write!(f, "{}", name),
            Variable::Fresh(id) => write!(f, "_{}", id),
        }
    }
}

/// A flat term: there are no function symbols.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Var(Variable),
    Const(Constant),
}

impl Term {
    pub fn var(name: &str) -> Self {
        Term::Var(Variable::named(name))
    }

    /// A fresh anonymous variable, the equivalent of `_`.
    pub fn anon() -> Self {
        Term::Var(Variable::fresh())
    }

    pub fn sym(s: &str) -> Self {
        Term::Const(Constant::symbol(s))
    }

    pub fn int(v: i64) -> Self {
        Term::Const(Constant::Int(v))
    }

    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            Term::Var(v) => Some(v),
            Term::Const(_) => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Term::Const(c) => Some(c),
            Term::Var(_) => None,
        }
    }

    pub fn is_ground(&self) -> bool {
        matches!(self, Term::Const(_))
    }
}

impl From<Constant> for Term {
    fn from(c: Constant) -> Self {
        Term::Const(c)
    }
}

impl From<Variable> for Term {
    fn from(v: Variable) -> Self {
        Term::Var(v)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{}", v),
            Term::Const(c) => write!(f, "{}", c),
        }
    }
}
