//! Applying a configuration change to a project that already has a container.
//!
//! Tiers run in order and the first success wins: push through the bridge,
//! write both files and restart, recreate the container from durable state.

use {
    kennel_agent_config::{SplitConfig, split},
    kennel_bridge::BridgeTarget,
    kennel_common::TaskHandle,
    kennel_metrics::{labels, update as names},
    kennel_projects::{Project, ProjectStatus},
    serde::Serialize,
    tokio::sync::OwnedMutexGuard,
    tracing::{info, warn},
};

use crate::{
    durable::DurableConfig,
    error::Result,
    provision::{PostStart, Provisioner},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTier {
    /// Reloaded in place by the bridge.
    Live,
    FileRestart,
    /// A new container was built; its post-start sequence runs in the background.
    Recreate,
}

impl UpdateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::FileRestart => "file_restart",
            Self::Recreate => "recreate",
        }
    }
}

#[derive(Debug)]
pub struct Applied {
    pub tier: UpdateTier,
    /// Background provisioning, present only after a recreate.
    pub task: Option<TaskHandle>,
}

impl Applied {
    fn at(tier: UpdateTier, task: Option<TaskHandle>) -> Self {
        metrics::counter!(names::APPLIED_TOTAL, labels::TIER => tier.as_str()).increment(1);
        Self { tier, task }
    }
}

impl Provisioner {
    /// Bring the project's container in line with `durable` and store
    /// `sealed` as the project's config once a tier succeeds.
    ///
    /// `guard` stays held until the blob is stored; after a recreate it moves
    /// into the background task. A bridge rejection is a validation error and
    /// stops the chain: the agent refused the document, so writing it to disk
    /// would not help.
    pub async fn apply_update(
        &self,
        project: &Project,
        durable: &DurableConfig,
        sealed: &str,
        guard: OwnedMutexGuard<()>,
    ) -> Result<Applied> {
        let split_cfg = split(&durable.document);

        if let Some(ref container_id) = project.container_id {
            let target = BridgeTarget {
                container_id,
                token: &durable.gateway_token,
            };
            match self.bridge.update_config(&target, &split_cfg).await {
                Ok(()) => {
                    self.projects.set_config_blob(&project.id, sealed).await?;
                    info!(project_id = %project.id, tier = "live", "config applied");
                    return Ok(Applied::at(UpdateTier::Live, None));
                },
                Err(e) if e.is_rejection() => {
                    metrics::counter!(names::FAILURES_TOTAL).increment(1);
                    return Err(e.into());
                },
                Err(e) if e.container_missing() => {
                    warn!(project_id = %project.id, "container missing, recreating");
                },
                Err(e) => {
                    warn!(project_id = %project.id, error = %e, "live update failed, writing files");
                    match self.write_and_restart(container_id, &split_cfg).await {
                        Ok(()) => {
                            self.projects.set_config_blob(&project.id, sealed).await?;
                            // The restart also starts a stopped container.
                            self.projects
                                .set_status(&project.id, ProjectStatus::Running, None)
                                .await?;
                            info!(project_id = %project.id, tier = "file_restart", "config applied");
                            return Ok(Applied::at(UpdateTier::FileRestart, None));
                        },
                        Err(e) => {
                            warn!(project_id = %project.id, error = %e, "file write failed, recreating");
                        },
                    }
                },
            }
        }

        let container = match self
            .launch(project, durable, ProjectStatus::Reprovisioning, true)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                metrics::counter!(names::FAILURES_TOTAL).increment(1);
                return Err(e);
            },
        };
        self.projects.set_config_blob(&project.id, sealed).await?;
        info!(project_id = %project.id, container = %container.id, tier = "recreate", "config applied");
        let task = self.spawn(
            guard,
            project.id.clone(),
            container.id,
            durable.clone(),
            PostStart::for_recreate(),
        );
        Ok(Applied::at(UpdateTier::Recreate, Some(task)))
    }

    async fn write_and_restart(&self, container_id: &str, split_cfg: &SplitConfig) -> Result<()> {
        for file in split_cfg.files()? {
            self.runtime.inject_file(container_id, &file).await?;
        }
        self.runtime.restart(container_id).await?;
        Ok(())
    }
}
