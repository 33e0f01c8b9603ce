use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Which fixpoint driver evaluates the program.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize, JsonSchema)]
pub enum EvalStrategy {
    /// Stratified, sequential semi-naive evaluation. Supports negation.
    #[default]
    SemiNaive,
    /// Concurrent work-stealing saturation. Negation-free programs only.
    Chunked,
}

/// Backing store used by the chunked driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize, JsonSchema)]
pub enum IndexerKind {
    /// Deduplicating, set-backed buckets.
    Set,
    /// Append-only buckets; deduplication is left to the fact trie.
    #[default]
    Queue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EvalConfig {
    pub strategy: EvalStrategy,
    /// Number of worker threads; also sizes the shards of concurrent maps.
    pub parallelism: usize,
    /// Facts per unit of work in the chunked driver.
    pub chunk_size: usize,
    pub track_provenance: bool,
    pub indexer: IndexerKind,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            strategy: EvalStrategy::default(),
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            chunk_size: 64,
            track_provenance: false,
            indexer: IndexerKind::default(),
        }
    }
}

impl EvalConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<Self>(json).map(Self::validated)
    }

    /// Clamps sizes that must be non-zero.
    pub fn validated(mut self) -> Self {
        self.parallelism = self.parallelism.max(1);
        self.chunk_size = self.chunk_size.max(1);
        self
    }

    pub fn chunked(self) -> Self {
        Self {
            strategy: EvalStrategy::Chunked,
            ..self
        }
    }

    pub fn with_provenance(self) -> Self {
        Self {
            track_provenance: true,
            ..self
        }
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..self
        }
    }

    pub fn with_parallelism(self, parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            ..self
        }
    }

    /// Shard count for concurrent maps: a power of two above the worker count.
    pub fn shard_amount(&self) -> usize {
        (self.parallelism.max(1) * 4).next_power_of_two()
    }
}
