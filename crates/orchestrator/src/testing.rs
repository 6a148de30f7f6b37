//! Scripted [`ConfigBridge`] double and a wired service for orchestration tests.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    async_trait::async_trait,
    kennel_agent_config::{Provider, SplitConfig},
    kennel_bridge::{
        BridgeError, BridgeTarget, CliCommand, CommandOutput, ConfigBridge, ConfigSnapshot,
        Result,
    },
    kennel_metrics::SqliteMetricSampleStore,
    kennel_projects::SqliteProjectStore,
    kennel_runtime::{RuntimeError, memory::InMemoryRuntime},
    kennel_vault::ConfigVault,
    serde_json::{Value, json},
    zeroize::Zeroizing,
};

use crate::{blueprint::OrchestratorSettings, service::ProjectService};

/// Default settings with every wait shortened to milliseconds.
pub fn fast_settings() -> OrchestratorSettings {
    let mut s = OrchestratorSettings::default();
    s.provisioning.stabilize_attempts = 3;
    s.provisioning.stabilize_interval_ms = 5;
    s.provisioning.bridge_wait_secs = 1;
    s.provisioning.bridge_backoff_initial_ms = 2;
    s.provisioning.bridge_backoff_max_ms = 10;
    s
}

/// A [`ProjectService`] over in-memory collaborators.
pub struct Harness {
    pub runtime: Arc<InMemoryRuntime>,
    pub bridge: Arc<ScriptedBridge>,
    pub projects: Arc<SqliteProjectStore>,
    pub service: ProjectService,
}

impl Harness {
    #[allow(clippy::unwrap_used)]
    pub async fn new() -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        kennel_projects::run_migrations(&pool).await.unwrap();
        let samples = SqliteMetricSampleStore::new(pool.clone()).await.unwrap();

        let runtime = Arc::new(InMemoryRuntime::new());
        let bridge = Arc::new(ScriptedBridge::new());
        let projects = Arc::new(SqliteProjectStore::new(pool));
        let service = ProjectService::new(
            projects.clone(),
            runtime.clone(),
            bridge.clone(),
            Arc::new(samples),
            Arc::new(ConfigVault::new(Zeroizing::new([9u8; 32]))),
            fast_settings(),
        );
        Self {
            runtime,
            bridge,
            projects,
            service,
        }
    }
}

/// How a scripted call answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    /// Every HTTP path and the exec fallback failed.
    Unreachable,
    /// The bridge answered 4xx.
    Reject,
    /// The container is gone.
    Missing,
}

impl Reply {
    fn into_result(self, path: &str, container: &str) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::Unreachable => Err(BridgeError::Exhausted {
                path: path.to_string(),
                last: "connection refused".into(),
            }),
            Self::Reject => Err(BridgeError::Rejected {
                path: path.to_string(),
                status: 400,
                body: "invalid config".into(),
            }),
            Self::Missing => Err(BridgeError::Runtime(RuntimeError::NotFound(
                container.to_string(),
            ))),
        }
    }
}

struct Script {
    status: Reply,
    status_failures: usize,
    status_stall: Option<Duration>,
    update: Reply,
    read: Reply,
    config: Option<SplitConfig>,
    pushed: Vec<SplitConfig>,
    calls: Vec<String>,
    command: CommandOutput,
}

pub struct ScriptedBridge {
    script: Mutex<Script>,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script {
                status: Reply::Ok,
                status_failures: 0,
                status_stall: None,
                update: Reply::Ok,
                read: Reply::Ok,
                config: None,
                pushed: Vec::new(),
                calls: Vec::new(),
                command: CommandOutput {
                    ok: true,
                    data: Some(json!({ "models": [] })),
                    ..Default::default()
                },
            }),
        }
    }
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` status probes fail as unreachable.
    pub fn status_fails(&self, n: usize) {
        self.lock().status_failures = n;
    }

    /// Status probes hang for `delay` before answering.
    pub fn stall_status(&self, delay: Duration) {
        self.lock().status_stall = Some(delay);
    }

    pub fn set_status(&self, reply: Reply) {
        self.lock().status = reply;
    }

    pub fn set_update(&self, reply: Reply) {
        self.lock().update = reply;
    }

    pub fn set_read(&self, reply: Reply) {
        self.lock().read = reply;
    }

    pub fn set_command_output(&self, output: CommandOutput) {
        self.lock().command = output;
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == op).count()
    }

    /// Every config that was pushed successfully.
    pub fn pushed(&self) -> Vec<SplitConfig> {
        self.lock().pushed.clone()
    }
}

#[async_trait]
impl ConfigBridge for ScriptedBridge {
    async fn status(&self, target: &BridgeTarget<'_>) -> Result<Value> {
        let stall = {
            let mut s = self.lock();
            s.calls.push("status".into());
            s.status_stall
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let mut s = self.lock();
        if s.status_failures > 0 {
            s.status_failures -= 1;
            return Reply::Unreachable
                .into_result("/status", target.container_id)
                .map(|_| Value::Null);
        }
        s.status.into_result("/status", target.container_id)?;
        Ok(json!({ "ok": true }))
    }

    async fn get_config(&self, target: &BridgeTarget<'_>) -> Result<ConfigSnapshot> {
        let mut s = self.lock();
        s.calls.push("get_config".into());
        s.read.into_result("/config", target.container_id)?;
        let split = s.config.clone().ok_or_else(|| BridgeError::Exhausted {
            path: "/config".into(),
            last: "no config scripted".into(),
        })?;
        Ok(ConfigSnapshot {
            usage_stats: split.secrets.usage_stats.clone(),
            split,
        })
    }

    async fn update_config(&self, target: &BridgeTarget<'_>, split: &SplitConfig) -> Result<()> {
        let mut s = self.lock();
        s.calls.push("update_config".into());
        s.update.into_result("/config/update", target.container_id)?;
        s.config = Some(split.clone());
        s.pushed.push(split.clone());
        Ok(())
    }

    async fn run_command(
        &self,
        target: &BridgeTarget<'_>,
        _command: &CliCommand,
    ) -> Result<CommandOutput> {
        let mut s = self.lock();
        s.calls.push("run_command".into());
        s.status.into_result("/command", target.container_id)?;
        Ok(s.command.clone())
    }

    async fn auth_login(&self, target: &BridgeTarget<'_>, provider: Provider) -> Result<Value> {
        let mut s = self.lock();
        s.calls.push("auth_login".into());
        s.status.into_result("/auth/login", target.container_id)?;
        Ok(json!({ "url": format!("https://login.example/{provider}") }))
    }

    async fn auth_callback(
        &self,
        target: &BridgeTarget<'_>,
        _provider: Provider,
        callback_url: &str,
    ) -> Result<Value> {
        let mut s = self.lock();
        s.calls.push("auth_callback".into());
        s.status.into_result("/auth/callback", target.container_id)?;
        Ok(json!({ "ok": true, "callbackUrl": callback_url }))
    }
}
