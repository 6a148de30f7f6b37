//! Immutable plan catalog.

use {kennel_runtime::ResourceSpec, serde::Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanSpec {
    pub id: &'static str,
    /// Fractional cores.
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub storage_gb: u32,
    pub egress_gb: u32,
    pub price_cents: u32,
}

impl PlanSpec {
    pub fn resources(&self) -> ResourceSpec {
        ResourceSpec::new(self.memory_mb, self.cpu_cores)
    }
}

pub static PLANS: &[PlanSpec] = &[
    PlanSpec {
        id: "starter",
        cpu_cores: 0.5,
        memory_mb: 1024,
        storage_gb: 5,
        egress_gb: 50,
        price_cents: 900,
    },
    PlanSpec {
        id: "pro",
        cpu_cores: 1.0,
        memory_mb: 2048,
        storage_gb: 20,
        egress_gb: 200,
        price_cents: 2900,
    },
    PlanSpec {
        id: "scale",
        cpu_cores: 2.0,
        memory_mb: 4096,
        storage_gb: 50,
        egress_gb: 1000,
        price_cents: 7900,
    },
];

pub fn find_plan(id: &str) -> Option<&'static PlanSpec> {
    PLANS.iter().find(|p| p.id == id)
}
