//! CPU percentage from cumulative counters.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use kennel_runtime::RawStats;

#[derive(Debug, Clone, Copy)]
struct LastSample {
    cpu_total: u64,
    system_total: u64,
}

/// `(Δtotal / Δsystem) × cpus × 100`, never negative.
///
/// Returns 0 when the system counter did not advance.
pub fn cpu_percent(prev_total: u64, prev_system: u64, cur: &RawStats) -> f64 {
    let system_delta = cur.system_total as f64 - prev_system as f64;
    if system_delta <= 0.0 {
        return 0.0;
    }
    let cpu_delta = cur.cpu_total as f64 - prev_total as f64;
    let cpus = cur.online_cpus.max(1) as f64;
    (cpu_delta / system_delta * cpus * 100.0).max(0.0)
}

/// Last raw sample per container, owned by the collector.
#[derive(Debug, Default)]
pub struct CpuTracker {
    last: Mutex<HashMap<String, LastSample>>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LastSample>> {
        self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `stats` for `container_id` and return the CPU percent since the
    /// previous observation. The first observation yields 0.
    pub fn observe(&self, container_id: &str, stats: &RawStats) -> f64 {
        let mut last = self.lock();
        let percent = last
            .get(container_id)
            .map(|prev| cpu_percent(prev.cpu_total, prev.system_total, stats))
            .unwrap_or(0.0);
        last.insert(container_id.to_string(), LastSample {
            cpu_total: stats.cpu_total,
            system_total: stats.system_total,
        });
        percent
    }

    pub fn forget(&self, container_id: &str) {
        self.lock().remove(container_id);
    }

    /// Drop state for containers `keep` rejects.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.lock().retain(|id, _| keep(id));
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn stats(cpu_total: u64, system_total: u64, online_cpus: u64) -> RawStats {
        RawStats {
            cpu_total,
            system_total,
            online_cpus,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(stats(120, 1_100, 2), 40.0)]
    #[case(stats(600, 2_000, 4), 200.0)]
    #[case(stats(100, 1_000, 1), 0.0)]
    #[case(stats(50, 1_500, 1), 0.0)]
    fn delta_formula(#[case] cur: RawStats, #[case] expected: f64) {
        let got = cpu_percent(100, 1_000, &cur);
        assert!((got - expected).abs() < 1e-9, "got {got}, want {expected}");
    }

    #[test]
    fn first_sample_is_zero() {
        let tracker = CpuTracker::new();
        assert_eq!(tracker.observe("c1", &stats(5_000, 90_000, 2)), 0.0);
        let second = tracker.observe("c1", &stats(5_500, 91_000, 2));
        assert!((second - 100.0).abs() < 1e-9);
    }

    #[test]
    fn counters_going_backwards_clamp_to_zero() {
        let tracker = CpuTracker::new();
        tracker.observe("c1", &stats(5_000, 90_000, 2));
        // Container restarted: counters reset.
        assert_eq!(tracker.observe("c1", &stats(10, 100, 2)), 0.0);
    }

    #[test]
    fn containers_are_independent() {
        let tracker = CpuTracker::new();
        tracker.observe("a", &stats(0, 0, 1));
        tracker.observe("b", &stats(0, 0, 1));
        assert_eq!(tracker.tracked(), 2);

        tracker.retain(|id| id == "a");
        assert_eq!(tracker.tracked(), 1);
        tracker.forget("a");
        assert_eq!(tracker.tracked(), 0);
    }
}
