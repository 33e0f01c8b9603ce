//! The engine handle: owns a fixpoint driver and guards its usage contract.

use std::{collections::BTreeSet, sync::Arc};

use log::debug;

use crate::{
    ast::{Atom, PredicateSym},
    config::{EvalConfig, EvalStrategy},
    error::{Result, UsageError},
    eval::{
        chunked::ChunkedEvalManager, seminaive::SemiNaiveEvalManager, EvalManager, FactStore,
    },
    metrics::{CountingMetrics, EvalStats},
    program::{validate_and_stratify, Program, StratifiedProgram},
};

/// Evaluates one stratified program.
///
/// ```
/// use semilog::{ast::*, Engine, EvalConfig, Program, validate_and_stratify};
///
/// let program = Program::new()
///     .rule(Clause::new(
///         Atom::from_parts("path", [Term::var("X"), Term::var("Y")]),
///         vec![Premise::Positive(Atom::from_parts("edge", [Term::var("X"), Term::var("Y")]))],
///     ))
///     .fact(Atom::fact("edge", ["a", "b"]));
///
/// let mut engine = Engine::new(EvalConfig::default());
/// engine.initialize(validate_and_stratify(&program)?)?;
/// let store = engine.eval_to_fixpoint()?;
/// assert!(store.contains(&Atom::fact("path", ["a", "b"])));
/// # Ok::<(), semilog::Error>(())
/// ```
pub struct Engine {
    config: EvalConfig,
    manager: Option<Box<dyn EvalManager>>,
    extendible: BTreeSet<PredicateSym>,
    metrics: Arc<CountingMetrics>,
}

impl Engine {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            config: config.validated(),
            manager: None,
            extendible: BTreeSet::new(),
            metrics: Arc::new(CountingMetrics::new()),
        }
    }

    /// Validates, initializes and evaluates `program` in one go.
    pub fn evaluate(program: &Program, config: EvalConfig) -> Result<FactStore> {
        let mut engine = Self::new(config);
        engine.initialize(validate_and_stratify(program)?)?;
        engine.eval_to_fixpoint()
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn strategy(&self) -> EvalStrategy {
        self.config.strategy
    }

    pub fn is_initialized(&self) -> bool {
        self.manager.is_some()
    }

    pub fn initialize(&mut self, program: StratifiedProgram) -> Result<()> {
        if self.manager.is_some() {
            return Err(UsageError::AlreadyInitialized.into());
        }
        debug!(
            "Initializing {} engine with {} rules in {} strata",
            self.config.strategy,
            program.rules.len(),
            program.stratification.len()
        );
        self.extendible = program.extendible.clone();
        let manager: Box<dyn EvalManager> = match self.config.strategy {
            EvalStrategy::SemiNaive => Box::new(SemiNaiveEvalManager::new(
                program,
                self.config.clone(),
                self.metrics.clone(),
            )),
            EvalStrategy::Chunked => Box::new(ChunkedEvalManager::new(
                program,
                &self.config,
                self.metrics.clone(),
            )?),
        };
        self.manager = Some(manager);
        Ok(())
    }

    fn manager(&self) -> Result<&dyn EvalManager> {
        self.manager
            .as_deref()
            .ok_or_else(|| UsageError::NotInitialized.into())
    }

    /// Supplies a ground fact of a predicate declared extendible.
    pub fn add_fact(&self, fact: Atom) -> Result<()> {
        let manager = self.manager()?;
        if !self.extendible.contains(&fact.pred) {
            return Err(UsageError::NotExtendible(fact.pred).into());
        }
        if !fact.is_ground() {
            return Err(UsageError::NonGroundFact(fact).into());
        }
        manager.add_fact(fact)
    }

    /// Registers `callback` for every new fact of `pred`. The chunked
    /// strategy invokes it from worker threads.
    pub fn on_new_fact(
        &self,
        pred: PredicateSym,
        callback: impl Fn(&Atom) + Send + Sync + 'static,
    ) -> Result<()> {
        self.manager()?.on_new_fact(pred, Arc::new(callback));
        Ok(())
    }

    /// Blocks until every consequence of the facts supplied so far is derived.
    pub fn eval_to_fixpoint(&mut self) -> Result<FactStore> {
        self.manager
            .as_mut()
            .ok_or(UsageError::NotInitialized)?
            .eval_to_fixpoint()
    }

    /// A snapshot of the counters recorded so far.
    pub fn stats(&self) -> EvalStats {
        self.metrics.stats()
    }

    /// Stops the engine, waiting for in-flight work to finish.
    pub fn shutdown(&mut self) {
        if let Some(manager) = self.manager.take() {
            debug!("Shutting down {} engine", manager.strategy());
        }
    }
}
