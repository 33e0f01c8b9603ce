pub mod ast;
pub mod config;
pub mod debug;
pub mod engine;
mod error;
pub use error::{Error, Result, UsageError, ValidationError};
pub mod eval;
pub mod metrics;
pub mod program;
pub mod query;
pub mod unify;
pub mod validate;

pub use config::{EvalConfig, EvalStrategy, IndexerKind};
pub use engine::Engine;
pub use eval::FactStore;
pub use program::{validate_and_stratify, Program, StratifiedProgram};
