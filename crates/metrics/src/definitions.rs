//! Metric name and label definitions.
//!
//! Every counter and histogram kennel records is named here so the set of
//! exported series can be read in one place.

/// Project provisioning metrics
pub mod provisioning {
    /// Provisioning runs by final outcome (`running` / `failed`)
    pub const OUTCOMES_TOTAL: &str = "kennel_provisioning_total";
    /// Wall time from container start to bridge readiness
    pub const DURATION_SECONDS: &str = "kennel_provisioning_duration_seconds";
    /// Containers recreated because the previous one vanished
    pub const REPROVISIONS_TOTAL: &str = "kennel_reprovisions_total";
    /// Non-fatal step failures (ownership fix, secret seeding)
    pub const STEP_FAILURES_TOTAL: &str = "kennel_provisioning_step_failures_total";
}

/// Bridge transport metrics
pub mod bridge {
    /// Logical bridge calls by method path
    pub const CALLS_TOTAL: &str = "kennel_bridge_calls_total";
    /// Individual HTTP attempts against a candidate URL
    pub const ATTEMPTS_TOTAL: &str = "kennel_bridge_attempts_total";
    /// Calls that fell through to the in-container exec path
    pub const EXEC_FALLBACKS_TOTAL: &str = "kennel_bridge_exec_fallbacks_total";
    /// Calls that ended in an error after every path
    pub const FAILURES_TOTAL: &str = "kennel_bridge_failures_total";
}

/// Configuration update metrics
pub mod update {
    /// Updates by the tier that applied them (`live`, `file_restart`, `recreate`)
    pub const APPLIED_TOTAL: &str = "kennel_config_updates_total";
    /// Updates where every tier failed
    pub const FAILURES_TOTAL: &str = "kennel_config_update_failures_total";
}

/// Resource sampling metrics
pub mod sampling {
    /// Samples written
    pub const SAMPLES_TOTAL: &str = "kennel_metric_samples_total";
    /// Containers whose stats could not be read
    pub const SAMPLE_ERRORS_TOTAL: &str = "kennel_metric_sample_errors_total";
    /// Samples removed by the retention sweep
    pub const PRUNED_TOTAL: &str = "kennel_metric_samples_pruned_total";
    /// Running containers seen in the last cycle
    pub const RUNNING_CONTAINERS: &str = "kennel_running_containers";
}

/// Gateway HTTP metrics
pub mod http {
    /// Requests by route template, method and status
    pub const REQUESTS_TOTAL: &str = "kennel_http_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "kennel_http_request_duration_seconds";
    pub const REQUESTS_IN_FLIGHT: &str = "kennel_http_requests_in_flight";
}

/// Common label keys
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const OUTCOME: &str = "outcome";
    pub const TIER: &str = "tier";
    pub const PATH: &str = "path";
    pub const VIA: &str = "via";
}
