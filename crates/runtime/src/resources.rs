//! Resource sizing derived from a plan's memory ceiling and CPU share.

use serde::{Deserialize, Serialize};

/// Share of the memory ceiling given to the workload's managed heap.
/// The remainder is headroom for the OS and child processes.
pub const HEAP_CAP_PERCENT: u64 = 75;

/// Soft reservation as a share of the memory ceiling.
pub const RESERVATION_PERCENT: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub memory_mb: u64,
    /// Fractional cores, e.g. `0.5`.
    pub cpu_cores: f64,
}

impl ResourceSpec {
    pub fn new(memory_mb: u64, cpu_cores: f64) -> Self {
        Self {
            memory_mb,
            cpu_cores,
        }
    }

    pub fn memory_bytes(&self) -> i64 {
        mb_to_bytes(self.memory_mb)
    }

    pub fn reservation_bytes(&self) -> i64 {
        mb_to_bytes(self.memory_mb * RESERVATION_PERCENT / 100)
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_cores.max(0.0) * 1_000_000_000.0).round() as i64
    }

    pub fn heap_cap_mb(&self) -> u64 {
        self.memory_mb * HEAP_CAP_PERCENT / 100
    }

    /// Value for `NODE_OPTIONS` that pins the heap to [`heap_cap_mb`](Self::heap_cap_mb).
    pub fn node_options(&self) -> String {
        format!("--max-old-space-size={}", self.heap_cap_mb())
    }
}

fn mb_to_bytes(mb: u64) -> i64 {
    i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}
