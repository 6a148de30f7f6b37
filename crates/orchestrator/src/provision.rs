//! Container launch and the post-start provisioning sequence.
//!
//! A launch creates and starts the container on the request path. Everything
//! after that (waiting for the engine to report it running, repairing volume
//! ownership, seeding credentials, waiting for the bridge, pushing config)
//! runs as a supervised background task that ends by flipping the project
//! to `running` or `failed`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    kennel_agent_config::{
        ConfigDocument,
        paths::{AGENT_GID, AGENT_STATE_DIR, AGENT_UID, SECRET_STORE_PATH},
        split,
    },
    kennel_bridge::{BridgeTarget, ConfigBridge},
    kennel_common::{TaskHandle, scrub_secrets, spawn_supervised},
    kennel_metrics::{labels, provisioning as names},
    kennel_projects::{PlanSpec, Project, ProjectStatus, ProjectStore, find_plan},
    kennel_runtime::{ContainerRef, ExecOpts, FileSpec, RuntimeDriver},
    tokio::sync::OwnedMutexGuard,
    tracing::{debug, info, warn},
};

use crate::{
    blueprint::OrchestratorSettings,
    durable::DurableConfig,
    error::{Error, Result},
};

/// Which optional steps the post-start sequence runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostStart {
    /// Write the secret store straight into the container.
    pub seed_secrets: bool,
    /// Push the full document through the bridge once it answers.
    pub push_config: bool,
}

impl PostStart {
    /// Fresh containers: seed if there are credentials, push if there is
    /// anything the bootstrap env cannot express.
    pub fn for_new(doc: &ConfigDocument) -> Self {
        Self {
            seed_secrets: !doc.credentials().is_empty(),
            push_config: *doc != ConfigDocument::default(),
        }
    }

    /// Recreated containers get both files before start.
    pub fn for_recreate() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct Provisioner {
    pub(crate) runtime: Arc<dyn RuntimeDriver>,
    pub(crate) bridge: Arc<dyn ConfigBridge>,
    pub(crate) projects: Arc<dyn ProjectStore>,
    pub(crate) settings: Arc<OrchestratorSettings>,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn RuntimeDriver>,
        bridge: Arc<dyn ConfigBridge>,
        projects: Arc<dyn ProjectStore>,
        settings: Arc<OrchestratorSettings>,
    ) -> Self {
        Self {
            runtime,
            bridge,
            projects,
            settings,
        }
    }

    pub fn plan_for(project: &Project) -> Result<&'static PlanSpec> {
        find_plan(&project.plan_id)
            .ok_or_else(|| Error::internal(format!("project {} has unknown plan", project.id)))
    }

    /// Create and start a container for `project`, recording `status` first.
    ///
    /// Any previous container is removed. With `write_files` both config
    /// artifacts are placed before start so the entrypoint keeps them. A
    /// create or start failure marks the project failed and keeps whatever
    /// container reference exists.
    pub async fn launch(
        &self,
        project: &Project,
        durable: &DurableConfig,
        status: ProjectStatus,
        write_files: bool,
    ) -> Result<ContainerRef> {
        self.projects.set_status(&project.id, status, None).await?;

        if let Some(ref old) = project.container_id {
            self.discard(old).await;
        }

        let plan = Self::plan_for(project)?;
        let spec = self.settings.container_spec(project, plan, durable);
        let image = spec.image.clone();
        let container = match self.runtime.create(&spec).await {
            Ok(c) => c,
            Err(e) => {
                let err = Error::from(e);
                self.mark_failed(&project.id, &err).await;
                return Err(err);
            },
        };
        self.projects
            .set_container(
                &project.id,
                Some((&container.id, &container.name)),
                Some(&image),
            )
            .await?;
        info!(project_id = %project.id, container = %container.id, %status, "container created");

        if write_files {
            let files = split(&durable.document).files()?;
            for file in &files {
                if let Err(e) = self.runtime.inject_file(&container.id, file).await {
                    let err = Error::from(e);
                    self.mark_failed(&project.id, &err).await;
                    return Err(err);
                }
            }
        }

        if let Err(e) = self.runtime.start(&container.id).await {
            let err = Error::from(e);
            self.mark_failed(&project.id, &err).await;
            return Err(err);
        }
        Ok(container)
    }

    /// Stop and remove a container that is being replaced. Missing is fine.
    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.runtime.stop(container_id).await
            && !e.is_not_found()
        {
            debug!(container = container_id, error = %e, "stop before remove failed");
        }
        if let Err(e) = self.runtime.remove(container_id).await
            && !e.is_not_found()
        {
            warn!(container = container_id, error = %e, "failed to remove replaced container");
        }
    }

    async fn mark_failed(&self, project_id: &str, err: &Error) {
        let detail = scrub_secrets(&err.to_string());
        if let Err(e) = self
            .projects
            .set_status(project_id, ProjectStatus::Failed, Some(&detail))
            .await
        {
            warn!(project_id, error = %e, "could not record failed status");
        }
    }

    /// Run the post-start sequence in the background. The lock guard is held
    /// until the project has settled.
    pub fn spawn(
        &self,
        guard: OwnedMutexGuard<()>,
        project_id: String,
        container_id: String,
        durable: DurableConfig,
        steps: PostStart,
    ) -> TaskHandle {
        let this = self.clone();
        spawn_supervised(format!("provision:{project_id}"), async move {
            let _guard = guard;
            let started = Instant::now();
            match this
                .post_start(&project_id, &container_id, &durable, steps)
                .await
            {
                Ok(()) => {
                    this.projects
                        .set_status(&project_id, ProjectStatus::Running, None)
                        .await?;
                    metrics::counter!(names::OUTCOMES_TOTAL, labels::OUTCOME => "running")
                        .increment(1);
                    metrics::histogram!(names::DURATION_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                    info!(
                        project_id,
                        container = %container_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "project running"
                    );
                    Ok(())
                },
                Err(e) => {
                    metrics::counter!(names::OUTCOMES_TOTAL, labels::OUTCOME => "failed")
                        .increment(1);
                    warn!(project_id, container = %container_id, error = %e, "provisioning failed");
                    this.mark_failed(&project_id, &e).await;
                    Err(e)
                },
            }
        })
    }

    pub async fn post_start(
        &self,
        project_id: &str,
        container_id: &str,
        durable: &DurableConfig,
        steps: PostStart,
    ) -> Result<()> {
        self.wait_running(container_id).await?;
        self.fix_ownership(project_id, container_id).await;

        let split_cfg = split(&durable.document);
        if steps.seed_secrets {
            let seeded = async {
                let store = FileSpec::new(SECRET_STORE_PATH, split_cfg.secrets_json()?)
                    .owned_by(AGENT_UID, AGENT_GID);
                self.runtime.inject_file(container_id, &store).await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(e) = seeded {
                metrics::counter!(names::STEP_FAILURES_TOTAL, "step" => "seed").increment(1);
                warn!(project_id, container = container_id, error = %e, "secret seeding failed");
            }
        }

        let target = BridgeTarget {
            container_id,
            token: &durable.gateway_token,
        };
        self.wait_bridge(&target).await?;

        if steps.push_config
            && let Err(e) = self.bridge.update_config(&target, &split_cfg).await
        {
            if e.container_missing() {
                return Err(e.into());
            }
            warn!(project_id, error = %e, "initial config push failed, writing files");
            let written = async {
                for file in split_cfg.files()? {
                    self.runtime.inject_file(container_id, &file).await?;
                }
                self.runtime.restart(container_id).await?;
                Ok::<(), Error>(())
            }
            .await;
            if let Err(e) = written {
                metrics::counter!(names::STEP_FAILURES_TOTAL, "step" => "push").increment(1);
                warn!(project_id, error = %e, "config file fallback failed");
            }
        }
        Ok(())
    }

    /// Poll inspect until the engine reports the container running.
    async fn wait_running(&self, container_id: &str) -> Result<()> {
        let cfg = &self.settings.provisioning;
        let interval = Duration::from_millis(cfg.stabilize_interval_ms);
        for attempt in 1..=cfg.stabilize_attempts.max(1) {
            let info = self.runtime.inspect(container_id).await?;
            if info.is_running() {
                debug!(container = container_id, attempt, "container running");
                return Ok(());
            }
            debug!(container = container_id, attempt, state = ?info.state, "waiting for container");
            tokio::time::sleep(interval).await;
        }
        Err(Error::transient(format!(
            "container {container_id} did not reach running state"
        )))
    }

    /// The volume may be owned by root on first mount. Best effort.
    async fn fix_ownership(&self, project_id: &str, container_id: &str) {
        let argv = [
            "chown".to_string(),
            "-R".into(),
            format!("{AGENT_UID}:{AGENT_GID}"),
            AGENT_STATE_DIR.into(),
        ];
        let opts = ExecOpts::with_timeout(self.settings.runtime.exec_timeout()).as_root();
        let failure = match self.runtime.exec(container_id, &argv, &opts).await {
            Ok(res) if res.success() => return,
            Ok(res) => scrub_secrets(res.error_text()),
            Err(e) => scrub_secrets(&e.to_string()),
        };
        metrics::counter!(names::STEP_FAILURES_TOTAL, "step" => "chown").increment(1);
        warn!(project_id, container = container_id, error = %failure, "ownership fix failed");
    }

    /// Probe the bridge with capped exponential backoff until it answers or
    /// the wait budget runs out. A vanished container ends the wait early.
    async fn wait_bridge(&self, target: &BridgeTarget<'_>) -> Result<()> {
        let cfg = &self.settings.provisioning;
        let deadline = Instant::now() + Duration::from_secs(cfg.bridge_wait_secs);
        let max = Duration::from_millis(cfg.bridge_backoff_max_ms);
        let mut delay = Duration::from_millis(cfg.bridge_backoff_initial_ms);
        let mut probes = 0u32;
        loop {
            probes += 1;
            // A probe's own retries and exec fallback must not outlive the budget.
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.bridge.status(target)).await {
                Ok(Ok(_)) => {
                    debug!(container = target.container_id, probes, "bridge reachable");
                    return Ok(());
                },
                Ok(Err(e)) if e.container_missing() => return Err(e.into()),
                Ok(Err(e)) => {
                    debug!(container = target.container_id, probes, error = %e, "bridge not ready");
                },
                Err(_) => {
                    debug!(container = target.container_id, probes, "bridge probe cut off");
                },
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::transient(format!(
                    "bridge in {} not reachable after {}s",
                    target.container_id, cfg.bridge_wait_secs
                )));
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(max);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{Reply, ScriptedBridge, fast_settings},
        kennel_agent_config::Provider,
        kennel_common::TaskOutcome,
        kennel_projects::SqliteProjectStore,
        kennel_runtime::{ContainerState, memory::InMemoryRuntime},
    };

    struct Fixture {
        runtime: Arc<InMemoryRuntime>,
        bridge: Arc<ScriptedBridge>,
        projects: Arc<SqliteProjectStore>,
        provisioner: Provisioner,
    }

    async fn fixture() -> Fixture {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        kennel_projects::run_migrations(&pool).await.unwrap();
        let runtime = Arc::new(InMemoryRuntime::new());
        let bridge = Arc::new(ScriptedBridge::new());
        let projects = Arc::new(SqliteProjectStore::new(pool));
        let provisioner = Provisioner::new(
            runtime.clone(),
            bridge.clone(),
            projects.clone(),
            Arc::new(fast_settings()),
        );
        Fixture {
            runtime,
            bridge,
            projects,
            provisioner,
        }
    }

    fn keyed_doc() -> ConfigDocument {
        let mut doc = ConfigDocument::default();
        doc.set_api_key(Provider::OpenAi, "sk-proj-0123456789abcdefghij");
        doc
    }

    async fn launched(f: &Fixture, doc: ConfigDocument) -> (Project, ContainerRef, DurableConfig) {
        let project = Project::new("owner", "demo", "starter");
        f.projects.insert(&project).await.unwrap();
        let durable = DurableConfig::new(doc);
        let c = f
            .provisioner
            .launch(&project, &durable, ProjectStatus::Provisioning, false)
            .await
            .unwrap();
        (project, c, durable)
    }

    #[test]
    fn post_start_steps_follow_document() {
        assert_eq!(PostStart::for_new(&ConfigDocument::default()), PostStart::default());
        let steps = PostStart::for_new(&keyed_doc());
        assert!(steps.seed_secrets && steps.push_config);
    }

    #[tokio::test]
    async fn runs_to_running_with_seed_and_push() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, keyed_doc()).await;
        f.bridge.status_fails(3);

        let guard = crate::locks::ProjectLocks::new().acquire(&project.id).await;
        let handle = f.provisioner.spawn(
            guard,
            project.id.clone(),
            c.id.clone(),
            durable.clone(),
            PostStart::for_new(&durable.document),
        );
        assert_eq!(handle.wait().await, TaskOutcome::Succeeded);

        let stored = f.projects.get(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Running);
        assert_eq!(stored.container_id.as_deref(), Some(c.id.as_str()));
        assert!(f.runtime.file(&c.id, SECRET_STORE_PATH).is_some());
        assert_eq!(f.bridge.count("status"), 4);
        assert_eq!(f.bridge.calls().last().map(String::as_str), Some("update_config"));
        assert_eq!(f.bridge.pushed().len(), 1);

        let chown = f
            .runtime
            .calls()
            .into_iter()
            .find_map(|call| match call {
                kennel_runtime::memory::Call::Exec { argv, user, .. } => Some((argv, user)),
                _ => None,
            })
            .unwrap();
        assert_eq!(chown.0[0], "chown");
        assert_eq!(chown.1.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn ownership_and_seed_failures_are_not_fatal() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, keyed_doc()).await;
        f.runtime.fail("exec");
        f.runtime.fail("inject_file");

        f.provisioner
            .post_start(&project.id, &c.id, &durable, PostStart {
                seed_secrets: true,
                push_config: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn push_failure_falls_back_to_files() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, keyed_doc()).await;
        f.bridge.set_update(Reply::Unreachable);

        f.provisioner
            .post_start(&project.id, &c.id, &durable, PostStart {
                seed_secrets: false,
                push_config: true,
            })
            .await
            .unwrap();
        assert!(f.runtime.file(&c.id, SECRET_STORE_PATH).is_some());
        assert_eq!(f.runtime.count("restart"), 1);
    }

    #[tokio::test]
    async fn bridge_timeout_marks_failed_and_keeps_container() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, ConfigDocument::default()).await;
        f.bridge.set_status(Reply::Unreachable);

        let guard = crate::locks::ProjectLocks::new().acquire(&project.id).await;
        let handle = f.provisioner.spawn(
            guard,
            project.id.clone(),
            c.id.clone(),
            durable,
            PostStart::default(),
        );
        assert!(matches!(handle.wait().await, TaskOutcome::Failed(_)));

        let stored = f.projects.get(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Failed);
        assert!(stored.status_detail.unwrap().contains("not reachable"));
        assert_eq!(stored.container_id.as_deref(), Some(c.id.as_str()));
        assert!(f.runtime.container(&c.id).is_some());
    }

    #[tokio::test]
    async fn slow_status_call_cannot_outlive_wait_budget() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, ConfigDocument::default()).await;
        f.bridge.stall_status(Duration::from_secs(30));

        let started = Instant::now();
        let err = f
            .provisioner
            .post_start(&project.id, &c.id, &durable, PostStart::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.bridge.count("status"), 1);
    }

    #[tokio::test]
    async fn vanished_container_ends_bridge_wait() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, ConfigDocument::default()).await;
        f.bridge.set_status(Reply::Missing);

        let err = f
            .provisioner
            .post_start(&project.id, &c.id, &durable, PostStart::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(f.bridge.count("status"), 1);
    }

    #[tokio::test]
    async fn never_running_is_transient() {
        let f = fixture().await;
        let (project, c, durable) = launched(&f, ConfigDocument::default()).await;
        f.runtime.set_state(&c.id, ContainerState::Restarting);

        let err = f
            .provisioner
            .post_start(&project.id, &c.id, &durable, PostStart::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
        assert_eq!(f.runtime.count("inspect"), 3);
    }

    #[tokio::test]
    async fn create_failure_records_failed() {
        let f = fixture().await;
        let project = Project::new("owner", "demo", "starter");
        f.projects.insert(&project).await.unwrap();
        f.runtime.fail("start");

        let durable = DurableConfig::new(ConfigDocument::default());
        assert!(
            f.provisioner
                .launch(&project, &durable, ProjectStatus::Provisioning, true)
                .await
                .is_err()
        );
        let stored = f.projects.get(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Failed);
        assert!(stored.container_id.is_some());
    }
}
