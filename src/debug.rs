use std::fmt;

use itertools::Itertools;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    ast::{Atom, Constant, Term},
    eval::FactStore,
};

/// A constant as it appears in a dump.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DumpValue {
    Int(i64),
    Symbol(String),
}

impl From<&Constant> for DumpValue {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Int(i) => DumpValue::Int(*i),
            Constant::Symbol(s) => DumpValue::Symbol(s.to_string()),
        }
    }
}

impl fmt::Display for DumpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpValue::Int(i) => write!(f, "{}", i),
            DumpValue::Symbol(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RelationDump {
    pub predicate: String,
    pub arity: usize,
    /// Argument tuples, sorted.
    pub facts: Vec<Vec<DumpValue>>,
}

/// A deterministic listing of every fact in a store: relations sorted by
/// predicate, facts sorted within each relation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FactDump {
    pub relations: Vec<RelationDump>,
}

fn tuple(fact: &Atom) -> Vec<DumpValue> {
    fact.args
        .iter()
        .filter_map(Term::as_const)
        .map(DumpValue::from)
        .collect()
}

impl FactDump {
    pub fn from_store(store: &FactStore) -> Self {
        let relations = store
            .predicates()
            .into_iter()
            .map(|pred| {
                let mut facts = store.facts(&pred);
                facts.sort();
                RelationDump {
                    predicate: pred.name().to_string(),
                    arity: pred.arity(),
                    facts: facts.iter().map(tuple).collect(),
                }
            })
            .collect();
        Self { relations }
    }

    pub fn len(&self) -> usize {
        self.relations.iter().map(|r| r.facts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One `pred(a, b).` line per fact.
    pub fn lines(&self) -> Vec<String> {
        self.relations
            .iter()
            .flat_map(|relation| {
                relation.facts.iter().map(move |args| {
                    if args.is_empty() {
                        format!("{}.", relation.predicate)
                    } else {
                        format!("{}({}).", relation.predicate, args.iter().join(", "))
                    }
                })
            })
            .collect()
    }
}

impl fmt::Display for FactDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.lines().iter().try_for_each(|line| writeln!(f, "{}", line))
    }
}

pub fn print_all_facts(store: &FactStore) {
    print!("{}", FactDump::from_store(store));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::EvalConfig, engine::Engine, program::Program};

    fn dump() -> FactDump {
        let program = Program::new()
            .fact(Atom::fact("edge", ["b", "c"]))
            .fact(Atom::fact("edge", ["a", "b"]))
            .fact(Atom::fact("weight", [Constant::symbol("a"), Constant::Int(3)]))
            .fact(Atom::fact("done", Vec::<Constant>::new()));
        FactDump::from_store(&Engine::evaluate(&program, EvalConfig::default()).unwrap())
    }

    #[test]
    fn lines_are_sorted() {
        assert_eq!(
            dump().lines(),
            vec!["done.", "edge(a, b).", "edge(b, c).", "weight(a, 3)."]
        );
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(dump()).unwrap();
        assert_eq!(json["relations"][2]["facts"][0], serde_json::json!(["a", 3]));
        let back: FactDump = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 4);
    }
}
