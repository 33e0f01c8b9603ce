//! Immutable value types for programs: terms, atoms, premises and clauses.
//!
//! Terms are flat (constants and variables only). Everything here is created
//! once when a program is built and shared by reference afterwards.

mod atom;
mod clause;
mod premise;
mod term;

pub use atom::{Atom, PredicateSym};
pub use clause::Clause;
pub use premise::{Annotation, Premise, PremiseHandler};
pub use term::{Constant, Term, Variable};
