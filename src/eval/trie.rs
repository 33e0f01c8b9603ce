//! A concurrent trie of ground facts used as the "have we seen this fact"
//! oracle of the chunked evaluator.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::{
    ast::{Atom, Constant, PredicateSym},
    config::EvalConfig,
};

#[derive(Default)]
struct TrieNode {
    children: RwLock<HashMap<Constant, Arc<TrieNode>>>,
    /// Set once the path from the root to this node has been inserted.
    terminal: AtomicBool,
}

impl TrieNode {
    fn child(&self, key: &Constant) -> Option<Arc<TrieNode>> {
        self.children.read().get(key).cloned()
    }

    fn child_or_insert(&self, key: &Constant) -> Arc<TrieNode> {
        if let Some(child) = self.child(key) {
            return child;
        }
        Arc::clone(self.children.write().entry(key.clone()).or_default())
    }
}

pub struct FactTrie {
    roots: DashMap<PredicateSym, Arc<TrieNode>>,
    count: AtomicUsize,
}

impl FactTrie {
    pub fn new(config: &EvalConfig) -> Self {
        Self {
            roots: DashMap::with_shard_amount(config.shard_amount()),
            count: AtomicUsize::new(0),
        }
    }

    /// Inserts a ground fact. Returns true for exactly one of any number of
    /// concurrent insertions of the same fact.
    pub fn insert(&self, fact: &Atom) -> bool {
        let mut node = match self.roots.get(&fact.pred) {
            Some(root) => Arc::clone(root.value()),
            None => Arc::clone(self.roots.entry(fact.pred.clone()).or_default().value()),
        };
        for arg in fact.args.iter() {
            let Some(key) = arg.as_const() else {
                debug_assert!(false, "inserting non-ground fact {} into trie", fact);
                return false;
            };
            node = node.child_or_insert(key);
        }
        let fresh = !node.terminal.swap(true, Ordering::AcqRel);
        if fresh {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    pub fn contains(&self, fact: &Atom) -> bool {
        let Some(root) = self.roots.get(&fact.pred).map(|r| Arc::clone(r.value())) else {
            return false;
        };
        let mut node = root;
        for arg in fact.args.iter() {
            let Some(next) = arg.as_const().and_then(|k| node.child(k)) else {
                return false;
            };
            node = next;
        }
        node.terminal.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
