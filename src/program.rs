//! Programs as handed to the engine, and their validated, stratified form.

use std::collections::BTreeSet;

use log::debug;

use crate::{
    ast::{Atom, Clause, PredicateSym},
    error::ValidationError,
    validate::{
        stratify::{stratify, Stratification},
        validate_rule, ValidRule,
    },
};

/// Rules, facts, and the predicates whose facts may be supplied while an
/// evaluation is running.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub rules: Vec<Clause>,
    pub facts: Vec<Atom>,
    pub extendible: BTreeSet<PredicateSym>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule; a clause with an empty body is treated as a fact.
    pub fn rule(mut self, clause: Clause) -> Self {
        if clause.body.is_empty() {
            self.facts.push(clause.head);
        } else {
            self.rules.push(clause);
        }
        self
    }

    pub fn fact(mut self, fact: Atom) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn facts(mut self, facts: impl IntoIterator<Item = Atom>) -> Self {
        self.facts.extend(facts);
        self
    }

    pub fn extendible(mut self, pred: PredicateSym) -> Self {
        self.extendible.insert(pred);
        self
    }
}

/// A program that passed validation, ready to be evaluated.
#[derive(Clone, Debug)]
pub struct StratifiedProgram {
    pub rules: Vec<ValidRule>,
    pub facts: Vec<Atom>,
    pub idb: BTreeSet<PredicateSym>,
    pub extendible: BTreeSet<PredicateSym>,
    pub stratification: Stratification,
}

impl StratifiedProgram {
    pub fn has_negation(&self) -> bool {
        self.rules.iter().any(ValidRule::has_negation)
    }

    pub fn is_idb(&self, pred: &PredicateSym) -> bool {
        self.idb.contains(pred)
    }

    /// Rules whose head belongs to the given stratum.
    pub fn rules_in_stratum(&self, stratum: usize) -> impl Iterator<Item = &ValidRule> {
        self.rules.iter().filter(move |r| {
            self.stratification.stratum_of(&r.head().pred) == Some(stratum)
        })
    }
}

/// Validates every rule and fact of `program` and computes its strata.
pub fn validate_and_stratify(program: &Program) -> Result<StratifiedProgram, ValidationError> {
    let mut facts = Vec::with_capacity(program.facts.len());
    for fact in &program.facts {
        if !fact.is_ground() {
            return Err(ValidationError::NonGroundFact(fact.clone()));
        }
        facts.push(fact.clone());
    }

    let mut rules = Vec::with_capacity(program.rules.len());
    for clause in &program.rules {
        if clause.body.is_empty() {
            validate_rule(clause)?;
            facts.push(clause.head.clone());
        } else {
            rules.push(validate_rule(clause)?);
        }
    }

    let idb: BTreeSet<PredicateSym> = rules.iter().map(|r| r.head().pred.clone()).collect();
    if let Some(pred) = program.extendible.iter().find(|p| idb.contains(*p)) {
        return Err(ValidationError::ExtendibleIsIdb(pred.clone()));
    }

    let stratification = stratify(&rules)?;
    debug!(
        "Validated {} rules and {} facts ({} IDB predicates)",
        rules.len(),
        facts.len(),
        idb.len()
    );

    Ok(StratifiedProgram {
        rules,
        facts,
        idb,
        extendible: program.extendible.clone(),
        stratification,
    })
}
