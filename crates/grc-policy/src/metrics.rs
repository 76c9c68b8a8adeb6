//! Per-operation decision counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::decision::EvaluationOutcome;
use crate::document::Effect;

#[derive(Debug, Default)]
struct Counters {
    evaluations: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    mutated: AtomicU64,
    fail_open: AtomicU64,
    mutation_failures: AtomicU64,
    total_micros: AtomicU64,
}

/// Decision counters keyed by `resourceType:action`.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    by_key: DashMap<String, Counters>,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one evaluation outcome.
    pub fn record(&self, key: &str, outcome: &EvaluationOutcome) {
        let counters = self.by_key.entry(key.to_string()).or_default();

        counters.evaluations.fetch_add(1, Ordering::Relaxed);
        let bucket = match outcome.final_decision.effect {
            Effect::Deny => &counters.denied,
            Effect::Mutate => &counters.mutated,
            Effect::Allow => &counters.allowed,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        if outcome.is_fail_open() {
            counters.fail_open.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .mutation_failures
            .fetch_add(outcome.mutations.failures.len() as u64, Ordering::Relaxed);
        counters.total_micros.fetch_add(
            u64::try_from(outcome.elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Counters for one key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MetricsSnapshot> {
        self.by_key.get(key).map(|c| MetricsSnapshot::from_counters(&c))
    }

    /// Counters for every key, sorted by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.by_key
            .iter()
            .map(|entry| (entry.key().clone(), MetricsSnapshot::from_counters(entry.value())))
            .collect()
    }

    pub fn reset(&self) {
        self.by_key.clear();
    }
}

/// Point-in-time copy of the counters for one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub allowed: u64,
    pub denied: u64,
    pub mutated: u64,
    pub fail_open: u64,
    pub mutation_failures: u64,
    #[serde(with = "humantime_serde")]
    pub average_duration: Duration,
}

impl MetricsSnapshot {
    fn from_counters(counters: &Counters) -> Self {
        let evaluations = counters.evaluations.load(Ordering::Relaxed);
        let total = counters.total_micros.load(Ordering::Relaxed);
        Self {
            evaluations,
            allowed: counters.allowed.load(Ordering::Relaxed),
            denied: counters.denied.load(Ordering::Relaxed),
            mutated: counters.mutated.load(Ordering::Relaxed),
            fail_open: counters.fail_open.load(Ordering::Relaxed),
            mutation_failures: counters.mutation_failures.load(Ordering::Relaxed),
            average_duration: Duration::from_micros(total.checked_div(evaluations).unwrap_or(0)),
        }
    }

    /// Fraction of evaluations that were denied.
    #[must_use]
    pub fn deny_rate(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.denied as f64 / self.evaluations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::PolicyDecision;
    use crate::document::DefaultEffect;
    use crate::mutation::MutationReport;

    fn outcome(effect: Effect, micros: u64, engine_error: Option<&str>) -> EvaluationOutcome {
        let mut final_decision = PolicyDecision::default_effect(DefaultEffect::Allow);
        final_decision.effect = effect;
        EvaluationOutcome {
            decisions: vec![],
            final_decision,
            evaluations: vec![],
            mutations: MutationReport::default(),
            engine_error: engine_error.map(str::to_string),
            policy_version: Some(1),
            elapsed: Duration::from_micros(micros),
        }
    }

    #[test]
    fn test_record_and_snapshot() {
        let metrics = EngineMetrics::new();
        metrics.record("Evidence:create", &outcome(Effect::Deny, 100, None));
        metrics.record("Evidence:create", &outcome(Effect::Allow, 300, None));
        metrics.record("Risk:update", &outcome(Effect::Allow, 10, Some("boom")));

        let evidence = metrics.get("Evidence:create").unwrap();
        assert_eq!(evidence.evaluations, 2);
        assert_eq!(evidence.denied, 1);
        assert_eq!(evidence.allowed, 1);
        assert_eq!(evidence.average_duration, Duration::from_micros(200));
        assert!((evidence.deny_rate() - 0.5).abs() < f64::EPSILON);

        let all = metrics.snapshot();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["Evidence:create", "Risk:update"]);
        assert_eq!(all["Risk:update"].fail_open, 1);

        metrics.reset();
        assert!(metrics.get("Evidence:create").is_none());
    }

    #[test]
    fn test_empty_snapshot_rates() {
        let snapshot = MetricsSnapshot::default();
        assert_eq!(snapshot.deny_rate(), 0.0);
    }
}
