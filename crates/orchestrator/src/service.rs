//! Project operations for an already-authenticated caller.
//!
//! Every method takes the caller's owner id; a project owned by someone else
//! is reported as not found.

use std::sync::Arc;

use {
    kennel_agent_config::{
        ConfigDocument, Provider, validate,
        validate::{validate_model_ref, validate_token},
    },
    kennel_bridge::{BridgeTarget, CliCommand, CommandOutput, ConfigBridge, candidate_urls},
    kennel_common::{TaskHandle, TaskOutcome, scrub_secrets},
    kennel_metrics::{MetricSample, MetricSampleStore, provisioning as names},
    kennel_projects::{Project, ProjectStatus, ProjectStore, RepoInfo, find_plan},
    kennel_runtime::RuntimeDriver,
    kennel_vault::ConfigVault,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::sync::OwnedMutexGuard,
    tracing::{debug, info, warn},
};

use crate::{
    blueprint::OrchestratorSettings,
    durable::DurableConfig,
    error::{Error, Result},
    locks::ProjectLocks,
    provision::{PostStart, Provisioner},
    update::UpdateTier,
};

pub const DEFAULT_PLAN: &str = "starter";

/// A provider key supplied alongside a request.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialInput {
    pub provider: String,
    pub key: Secret<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateProject {
    pub name: String,
    pub plan: Option<String>,
    pub image: Option<String>,
    pub repo: Option<RepoInfo>,
    pub config: Option<ConfigDocument>,
    /// `provider/model` shorthand for `agents.defaults.model.primary`.
    pub model: Option<String>,
    pub credentials: Vec<CredentialInput>,
}

/// A partial document deep-merged over the stored one, plus shorthands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    pub config: Option<ConfigDocument>,
    pub model: Option<String>,
    pub credentials: Vec<CredentialInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Read from the running agent.
    Live,
    /// The control plane's encrypted copy.
    Stored,
}

/// Configuration as shown to callers, credentials masked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub source: ConfigSource,
    pub config: ConfigDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_stats: Option<Value>,
}

/// Result of an action that may continue in the background.
#[derive(Debug)]
pub struct Launched {
    pub project: Project,
    pub task: TaskHandle,
}

#[derive(Debug)]
pub struct UpdateOutcome {
    pub tier: UpdateTier,
    pub project: Project,
    pub task: Option<TaskHandle>,
}

#[derive(Clone)]
pub struct ProjectService {
    projects: Arc<dyn ProjectStore>,
    runtime: Arc<dyn RuntimeDriver>,
    bridge: Arc<dyn ConfigBridge>,
    samples: Arc<dyn MetricSampleStore>,
    vault: Arc<ConfigVault>,
    locks: Arc<ProjectLocks>,
    settings: Arc<OrchestratorSettings>,
    provisioner: Provisioner,
    in_network: bool,
}

impl ProjectService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        runtime: Arc<dyn RuntimeDriver>,
        bridge: Arc<dyn ConfigBridge>,
        samples: Arc<dyn MetricSampleStore>,
        vault: Arc<ConfigVault>,
        settings: OrchestratorSettings,
    ) -> Self {
        let in_network = settings.runtime.control_plane_in_network();
        let settings = Arc::new(settings);
        let provisioner = Provisioner::new(
            Arc::clone(&runtime),
            Arc::clone(&bridge),
            Arc::clone(&projects),
            Arc::clone(&settings),
        );
        Self {
            projects,
            runtime,
            bridge,
            samples,
            vault,
            locks: Arc::new(ProjectLocks::new()),
            settings,
            provisioner,
            in_network,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeDriver> {
        &self.runtime
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    async fn owned(&self, owner: &str, id: &str) -> Result<Project> {
        match self.projects.get(id).await? {
            Some(p) if p.is_owned_by(owner) => Ok(p),
            _ => Err(Error::NotFound(format!("project {id}"))),
        }
    }

    async fn reload(&self, id: &str) -> Result<Project> {
        self.projects
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {id}")))
    }

    fn busy(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        self.locks
            .try_acquire(id)
            .ok_or_else(|| Error::Conflict(format!("project {id} has an operation in progress")))
    }

    fn durable(&self, project: &Project) -> Result<DurableConfig> {
        DurableConfig::from_blob(&self.vault, project.config_blob.as_deref(), &project.id)
    }

    fn container_of(project: &Project) -> Result<&str> {
        project
            .container_id
            .as_deref()
            .ok_or_else(|| Error::Conflict(format!("project {} has no container", project.id)))
    }

    pub async fn get(&self, owner: &str, id: &str) -> Result<Project> {
        self.owned(owner, id).await
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Project>> {
        Ok(self.projects.list_by_owner(owner).await?)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Validate, persist, create and start. Provisioning continues in the
    /// background; the returned project is still `provisioning`.
    pub async fn create(&self, owner: &str, req: CreateProject) -> Result<Launched> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(Error::validation("project name is required"));
        }
        let plan_id = req.plan.as_deref().unwrap_or(DEFAULT_PLAN);
        let plan =
            find_plan(plan_id).ok_or_else(|| Error::validation(format!("unknown plan '{plan_id}'")))?;

        let mut doc = req.config.unwrap_or_default();
        apply_intent(&mut doc, req.model.as_deref(), &req.credentials)?;
        validate(&doc)?;

        let mut project = Project::new(owner, name, plan.id);
        project.image = req.image;
        project.repo = req.repo;
        let durable = DurableConfig::new(doc);
        project.config_blob = Some(durable.seal(&self.vault, &project.id)?);
        self.projects.insert(&project).await?;
        info!(project_id = %project.id, plan = plan.id, "project created");

        let guard = self.locks.acquire(&project.id).await;
        let container = self
            .provisioner
            .launch(&project, &durable, ProjectStatus::Provisioning, false)
            .await?;
        let steps = PostStart::for_new(&durable.document);
        let task = self
            .provisioner
            .spawn(guard, project.id.clone(), container.id, durable, steps);
        Ok(Launched {
            project: self.reload(&project.id).await?,
            task,
        })
    }

    /// Start the container. A container the engine no longer knows is
    /// recreated from the stored configuration.
    pub async fn start(&self, owner: &str, id: &str) -> Result<Launched> {
        let project = self.owned(owner, id).await?;
        let guard = self.busy(&project.id)?;
        let Some(container_id) = project.container_id.clone() else {
            return self.reprovision(project, guard).await;
        };

        match self.runtime.inspect(&container_id).await {
            Ok(info) if info.is_running() => {},
            Ok(_) => match self.runtime.start(&container_id).await {
                Err(e) if e.is_not_found() => return self.reprovision(project, guard).await,
                other => other?,
            },
            Err(e) if e.is_not_found() => return self.reprovision(project, guard).await,
            Err(e) => return Err(e.into()),
        }
        self.settle_running(&project.id, "start").await
    }

    pub async fn restart(&self, owner: &str, id: &str) -> Result<Launched> {
        let project = self.owned(owner, id).await?;
        let guard = self.busy(&project.id)?;
        let Some(container_id) = project.container_id.clone() else {
            return self.reprovision(project, guard).await;
        };
        match self.runtime.restart(&container_id).await {
            Err(e) if e.is_not_found() => return self.reprovision(project, guard).await,
            other => other?,
        }
        self.settle_running(&project.id, "restart").await
    }

    pub async fn stop(&self, owner: &str, id: &str) -> Result<Project> {
        let project = self.owned(owner, id).await?;
        let _guard = self.busy(&project.id)?;
        if let Some(ref container_id) = project.container_id
            && let Err(e) = self.runtime.stop(container_id).await
            && !e.is_not_found()
        {
            return Err(e.into());
        }
        self.projects
            .set_status(&project.id, ProjectStatus::Exited, None)
            .await?;
        info!(project_id = %project.id, "project stopped");
        self.reload(&project.id).await
    }

    /// Remove the container (missing is fine), its samples and the row.
    pub async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        let project = self.owned(owner, id).await?;
        let _guard = self.busy(&project.id)?;
        if let Some(ref container_id) = project.container_id
            && let Err(e) = self.runtime.remove(container_id).await
            && !e.is_not_found()
        {
            return Err(e.into());
        }
        if let Err(e) = self.samples.delete_project(&project.id).await {
            warn!(project_id = %project.id, error = %e, "failed to delete metric samples");
        }
        self.projects.delete(&project.id).await?;
        self.locks.remove(&project.id);
        info!(project_id = %project.id, "project deleted");
        Ok(())
    }

    async fn settle_running(&self, id: &str, action: &str) -> Result<Launched> {
        self.projects
            .set_status(id, ProjectStatus::Running, None)
            .await?;
        info!(project_id = id, action, "project running");
        Ok(Launched {
            project: self.reload(id).await?,
            task: TaskHandle::completed(format!("{action}:{id}"), TaskOutcome::Succeeded),
        })
    }

    async fn reprovision(&self, project: Project, guard: OwnedMutexGuard<()>) -> Result<Launched> {
        let durable = self.durable(&project)?;
        metrics::counter!(names::REPROVISIONS_TOTAL).increment(1);
        warn!(
            project_id = %project.id,
            container = ?project.container_id,
            "container missing, reprovisioning"
        );
        let container = self
            .provisioner
            .launch(&project, &durable, ProjectStatus::Reprovisioning, true)
            .await?;
        let task = self.provisioner.spawn(
            guard,
            project.id.clone(),
            container.id,
            durable,
            PostStart::for_recreate(),
        );
        Ok(Launched {
            project: self.reload(&project.id).await?,
            task,
        })
    }

    /// Mark projects left mid-provisioning by a previous process as failed.
    pub async fn reconcile_interrupted(&self) -> Result<usize> {
        let mut n = 0;
        for status in [ProjectStatus::Provisioning, ProjectStatus::Reprovisioning] {
            for project in self.projects.list_by_status(status).await? {
                self.projects
                    .set_status(
                        &project.id,
                        ProjectStatus::Failed,
                        Some("interrupted by control-plane restart"),
                    )
                    .await?;
                n += 1;
            }
        }
        if n > 0 {
            warn!(count = n, "marked interrupted projects as failed");
        }
        Ok(n)
    }

    // ── Configuration ───────────────────────────────────────────────────────

    /// The running agent's view when reachable, otherwise the stored copy.
    pub async fn read_config(&self, owner: &str, id: &str) -> Result<ConfigView> {
        let project = self.owned(owner, id).await?;
        let durable = self.durable(&project)?;

        if project.status == ProjectStatus::Running
            && let Some(ref container_id) = project.container_id
        {
            let target = BridgeTarget {
                container_id,
                token: &durable.gateway_token,
            };
            match self.bridge.get_config(&target).await {
                Ok(snap) => {
                    return Ok(ConfigView {
                        source: ConfigSource::Live,
                        config: snap.split.merged().masked(),
                        usage_stats: snap.usage_stats,
                    });
                },
                Err(e) => {
                    debug!(project_id = %project.id, error = %e, "live config read failed");
                },
            }
        }

        Ok(ConfigView {
            source: ConfigSource::Stored,
            config: durable.document.masked(),
            usage_stats: None,
        })
    }

    /// Merge the request into the stored document, validate, apply through
    /// the update tiers and persist the result.
    pub async fn update_config(
        &self,
        owner: &str,
        id: &str,
        req: UpdateRequest,
    ) -> Result<UpdateOutcome> {
        let guard = self.busy(&self.owned(owner, id).await?.id)?;
        // Re-read under the lock so the merge starts from the last stored copy.
        let project = self.reload(id).await?;
        let durable = self.durable(&project)?;

        let mut doc = durable.document.clone();
        if let Some(patch) = req.config {
            doc.merge_from(patch);
        }
        apply_intent(&mut doc, req.model.as_deref(), &req.credentials)?;
        validate(&doc)?;

        let next = durable.with_document(doc);
        let sealed = next.seal(&self.vault, &project.id)?;
        let applied = self
            .provisioner
            .apply_update(&project, &next, &sealed, guard)
            .await?;

        Ok(UpdateOutcome {
            tier: applied.tier,
            project: self.reload(&project.id).await?,
            task: applied.task,
        })
    }

    // ── Agent passthrough ───────────────────────────────────────────────────

    /// Run a whitelisted agent CLI command. Output is scrubbed.
    pub async fn run_command(
        &self,
        owner: &str,
        id: &str,
        args: Vec<String>,
    ) -> Result<CommandOutput> {
        let command = CliCommand::parse(args)?;
        let project = self.owned(owner, id).await?;
        debug!(project_id = %project.id, subcommand = command.subcommand(), "agent command");
        let container_id = Self::container_of(&project)?;
        let durable = self.durable(&project)?;
        let target = BridgeTarget {
            container_id,
            token: &durable.gateway_token,
        };
        let mut out = self.bridge.run_command(&target, &command).await?;
        out.stdout = scrub_secrets(&out.stdout);
        out.stderr = scrub_secrets(&out.stderr);
        out.error = out.error.as_deref().map(scrub_secrets);
        Ok(out)
    }

    pub async fn auth_login(&self, owner: &str, id: &str, provider: &str) -> Result<Value> {
        let provider: Provider = provider.parse()?;
        let project = self.owned(owner, id).await?;
        let container_id = Self::container_of(&project)?;
        let durable = self.durable(&project)?;
        let target = BridgeTarget {
            container_id,
            token: &durable.gateway_token,
        };
        Ok(self.bridge.auth_login(&target, provider).await?)
    }

    pub async fn auth_callback(
        &self,
        owner: &str,
        id: &str,
        provider: &str,
        callback_url: &str,
    ) -> Result<Value> {
        let provider: Provider = provider.parse()?;
        if callback_url.trim().is_empty() {
            return Err(Error::validation("callbackUrl is required"));
        }
        let project = self.owned(owner, id).await?;
        let container_id = Self::container_of(&project)?;
        let durable = self.durable(&project)?;
        let target = BridgeTarget {
            container_id,
            token: &durable.gateway_token,
        };
        Ok(self
            .bridge
            .auth_callback(&target, provider, callback_url)
            .await?)
    }

    // ── Observability ───────────────────────────────────────────────────────

    pub async fn logs(&self, owner: &str, id: &str, tail: usize) -> Result<String> {
        let project = self.owned(owner, id).await?;
        let container_id = Self::container_of(&project)?;
        let logs = self.runtime.logs(container_id, tail).await?;
        Ok(scrub_secrets(&logs))
    }

    pub async fn metrics(
        &self,
        owner: &str,
        id: &str,
        since: u64,
        limit: usize,
    ) -> Result<Vec<MetricSample>> {
        let project = self.owned(owner, id).await?;
        self.samples
            .history(&project.id, since, limit)
            .await
            .map_err(|e| Error::internal(e.to_string()))
    }

    // ── Console ─────────────────────────────────────────────────────────────

    /// Container id for an interactive shell. The container must be running.
    pub async fn shell_target(&self, owner: &str, id: &str) -> Result<String> {
        let project = self.owned(owner, id).await?;
        let container_id = Self::container_of(&project)?;
        let info = self.runtime.inspect(container_id).await?;
        if !info.is_running() {
            return Err(Error::Conflict(format!("project {id} is not running")));
        }
        Ok(info.id)
    }

    /// Ranked base URLs of the terminal server inside the container.
    pub async fn terminal_urls(&self, owner: &str, id: &str) -> Result<Vec<String>> {
        let project = self.owned(owner, id).await?;
        let container_id = Self::container_of(&project)?;
        let info = self.runtime.inspect(container_id).await?;
        let urls = candidate_urls(&info, self.settings.provisioning.terminal_port, self.in_network);
        if urls.is_empty() {
            return Err(Error::Unavailable(format!(
                "no terminal address for project {id}"
            )));
        }
        Ok(urls)
    }
}

/// Fold the model and credential shorthands into `doc`.
fn apply_intent(
    doc: &mut ConfigDocument,
    model: Option<&str>,
    credentials: &[CredentialInput],
) -> Result<()> {
    if let Some(model) = model {
        validate_model_ref(model)?;
        doc.set_primary_model(model.trim());
    }
    for c in credentials {
        let key = c.key.expose_secret();
        let provider = validate_token(&c.provider, key)?;
        doc.set_api_key(provider, key.trim());
    }
    Ok(())
}
