//! Periodic sampling loop.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    kennel_common::time::now_ms,
    kennel_config::MetricsConfig,
    kennel_projects::{ProjectStatus, ProjectStore},
    kennel_runtime::{RawStats, RuntimeDriver},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    cpu::CpuTracker,
    definitions::sampling as names,
    store::{MetricSample, MetricSampleStore},
};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What one collection cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sampled: usize,
    pub failed: usize,
    pub pruned: u64,
}

pub struct MetricsCollector {
    projects: Arc<dyn ProjectStore>,
    runtime: Arc<dyn RuntimeDriver>,
    samples: Arc<dyn MetricSampleStore>,
    cpu: CpuTracker,
    interval: Duration,
    retention: Duration,
}

impl MetricsCollector {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        runtime: Arc<dyn RuntimeDriver>,
        samples: Arc<dyn MetricSampleStore>,
        config: &MetricsConfig,
    ) -> Self {
        Self {
            projects,
            runtime,
            samples,
            cpu: CpuTracker::new(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            retention: Duration::from_secs(config.retention_hours * 3600),
        }
    }

    /// Sample every running project once, then sweep expired samples.
    ///
    /// A container that fails to report is counted and skipped; the cycle
    /// continues with the rest.
    pub async fn collect_once(&self) -> anyhow::Result<CycleReport> {
        let running = self.projects.list_by_status(ProjectStatus::Running).await?;
        let mut report = CycleReport::default();
        let mut live = HashSet::new();

        for project in &running {
            let Some(ref container_id) = project.container_id else {
                continue;
            };
            live.insert(container_id.clone());

            let stats = match self.runtime.sample_stats(container_id).await {
                Ok(stats) => stats,
                Err(e) => {
                    debug!(project_id = %project.id, error = %e, "stats sample failed");
                    metrics::counter!(names::SAMPLE_ERRORS_TOTAL).increment(1);
                    report.failed += 1;
                    continue;
                },
            };

            let sample = self.to_sample(&project.id, container_id, &stats);
            if let Err(e) = self.samples.insert(&sample).await {
                warn!(project_id = %project.id, error = %e, "failed to persist metric sample");
                report.failed += 1;
                continue;
            }
            report.sampled += 1;
        }

        self.cpu.retain(|id| live.contains(id));
        metrics::gauge!(names::RUNNING_CONTAINERS).set(live.len() as f64);
        metrics::counter!(names::SAMPLES_TOTAL).increment(report.sampled as u64);

        let cutoff = now_ms().saturating_sub(self.retention.as_millis() as u64);
        match self.samples.prune_before(cutoff).await {
            Ok(n) => {
                report.pruned = n;
                metrics::counter!(names::PRUNED_TOTAL).increment(n);
            },
            Err(e) => warn!(error = %e, "metric retention sweep failed"),
        }

        Ok(report)
    }

    fn to_sample(&self, project_id: &str, container_id: &str, stats: &RawStats) -> MetricSample {
        let memory_percent = if stats.memory_limit > 0 {
            stats.memory_usage as f64 / stats.memory_limit as f64 * 100.0
        } else {
            0.0
        };
        MetricSample {
            project_id: project_id.to_string(),
            cpu_percent: self.cpu.observe(container_id, stats),
            memory_percent,
            memory_mb: stats.memory_usage as f64 / BYTES_PER_MB,
            timestamp: now_ms(),
        }
    }

    /// Run cycles on the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "metrics collector started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.collect_once().await {
                        warn!(error = %e, "metrics cycle failed");
                    }
                },
            }
        }
        info!("metrics collector stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store::SqliteMetricSampleStore,
        kennel_projects::{Project, SqliteProjectStore},
        kennel_runtime::{ContainerSpec, ResourceSpec, memory::InMemoryRuntime},
        std::collections::HashMap,
    };

    struct Fixture {
        collector: MetricsCollector,
        runtime: Arc<InMemoryRuntime>,
        projects: Arc<SqliteProjectStore>,
        samples: Arc<SqliteMetricSampleStore>,
    }

    async fn fixture() -> Fixture {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        kennel_projects::run_migrations(&pool).await.unwrap();
        let projects = Arc::new(SqliteProjectStore::new(pool.clone()));
        let samples = Arc::new(SqliteMetricSampleStore::new(pool).await.unwrap());
        let runtime = Arc::new(InMemoryRuntime::new());
        let collector = MetricsCollector::new(
            projects.clone(),
            runtime.clone(),
            samples.clone(),
            &MetricsConfig::default(),
        );
        Fixture {
            collector,
            runtime,
            projects,
            samples,
        }
    }

    async fn running_project(f: &Fixture, name: &str) -> (Project, String) {
        let c = f
            .runtime
            .create(&ContainerSpec {
                name: format!("kennel-{name}"),
                image: "agent:test".into(),
                env: Vec::new(),
                resources: ResourceSpec::new(1024, 1.0),
                volume: None,
                loopback_ports: Vec::new(),
                labels: HashMap::new(),
            })
            .await
            .unwrap();
        f.runtime.start(&c.id).await.unwrap();
        let mut p = Project::new("owner", name, "starter");
        p.status = ProjectStatus::Running;
        p.container_id = Some(c.id.clone());
        f.projects.insert(&p).await.unwrap();
        (p, c.id)
    }

    fn stats(cpu_total: u64, system_total: u64) -> RawStats {
        RawStats {
            cpu_total,
            system_total,
            online_cpus: 2,
            memory_usage: 512 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn samples_running_projects_with_deltas() {
        let f = fixture().await;
        let (p, cid) = running_project(&f, "a").await;

        f.runtime.set_stats(&cid, stats(1_000, 10_000));
        let report = f.collector.collect_once().await.unwrap();
        assert_eq!(report.sampled, 1);

        f.runtime.set_stats(&cid, stats(1_250, 11_000));
        f.collector.collect_once().await.unwrap();

        let history = f.samples.history(&p.id, 0, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].cpu_percent, 0.0);
        assert!((history[1].cpu_percent - 50.0).abs() < 1e-9);
        assert!((history[1].memory_percent - 50.0).abs() < 1e-9);
        assert!((history[1].memory_mb - 512.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn skips_failed_samples_and_non_running() {
        let f = fixture().await;
        let (_, cid) = running_project(&f, "a").await;
        running_project(&f, "b").await;
        let mut idle = Project::new("owner", "idle", "starter");
        idle.status = ProjectStatus::Exited;
        idle.container_id = Some("gone".into());
        f.projects.insert(&idle).await.unwrap();

        f.runtime.vanish(&cid);
        let report = f.collector.collect_once().await.unwrap();
        assert_eq!(report.sampled, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(f.runtime.count("stats"), 2);
    }

    #[tokio::test]
    async fn sweep_removes_expired_samples() {
        let f = fixture().await;
        f.samples
            .insert(&MetricSample {
                project_id: "old".into(),
                cpu_percent: 1.0,
                memory_percent: 1.0,
                memory_mb: 1.0,
                timestamp: 1,
            })
            .await
            .unwrap();
        let report = f.collector.collect_once().await.unwrap();
        assert_eq!(report.pruned, 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let f = fixture().await;
        let collector = Arc::new(f.collector);
        let cancel = CancellationToken::new();
        let handle = collector.spawn(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
