use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::ast::PredicateSym;

/// Receives evaluation events from the fixpoint drivers. Called concurrently
/// from worker threads by the chunked driver.
pub trait MetricsSink: Send + Sync {
    fn on_round(&self, _stratum: usize, _round: usize, _delta_size: usize) {}
    fn on_facts_derived(&self, _pred: &PredicateSym, _count: usize) {}
    fn on_stratum_done(&self, _stratum: usize, _rounds: usize) {}
    fn on_job(&self, _facts: usize) {}
    fn on_finish(&self, _elapsed: Duration) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsSink for NoOpMetrics {}

/// A snapshot of what an evaluation did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvalStats {
    pub rounds: usize,
    pub rounds_per_stratum: Vec<usize>,
    pub facts_derived: usize,
    pub facts_derived_per_predicate: HashMap<PredicateSym, usize>,
    pub jobs: usize,
    pub evaluation_time: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct CountingMetrics {
    rounds: AtomicUsize,
    facts_derived: AtomicUsize,
    jobs: AtomicUsize,
    facts_derived_per_predicate: DashMap<PredicateSym, usize>,
    rounds_per_stratum: Mutex<Vec<usize>>,
    evaluation_time: Mutex<Option<Duration>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> EvalStats {
        EvalStats {
            rounds: self.rounds.load(Ordering::Relaxed),
            rounds_per_stratum: self.rounds_per_stratum.lock().clone(),
            facts_derived: self.facts_derived.load(Ordering::Relaxed),
            facts_derived_per_predicate: self
                .facts_derived_per_predicate
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            jobs: self.jobs.load(Ordering::Relaxed),
            evaluation_time: *self.evaluation_time.lock(),
        }
    }
}

impl MetricsSink for CountingMetrics {
    fn on_round(&self, _stratum: usize, _round: usize, _delta_size: usize) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    fn on_facts_derived(&self, pred: &PredicateSym, count: usize) {
        self.facts_derived.fetch_add(count, Ordering::Relaxed);
        *self
            .facts_derived_per_predicate
            .entry(pred.clone())
            .or_default() += count;
    }

    fn on_stratum_done(&self, stratum: usize, rounds: usize) {
        let mut per_stratum = self.rounds_per_stratum.lock();
        if per_stratum.len() <= stratum {
            per_stratum.resize(stratum + 1, 0);
        }
        per_stratum[stratum] = rounds;
    }

    fn on_job(&self, _facts: usize) {
        self.jobs.fetch_add(1, Ordering::Relaxed);
    }

    fn on_finish(&self, elapsed: Duration) {
        *self.evaluation_time.lock() = Some(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn counts_from_many_threads() {
        let metrics = Arc::new(CountingMetrics::new());
        let edge = PredicateSym::new("edge", 2);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                let edge = edge.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.on_facts_derived(&edge, 2);
                        metrics.on_job(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        metrics.on_stratum_done(2, 5);

        let stats = metrics.stats();
        assert_eq!(stats.facts_derived, 2000);
        assert_eq!(stats.facts_derived_per_predicate.get(&edge), Some(&2000));
        assert_eq!(stats.jobs, 1000);
        assert_eq!(stats.rounds_per_stratum, vec![0, 0, 5]);
    }
}
