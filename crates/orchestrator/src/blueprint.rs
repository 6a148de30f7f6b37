//! Container specs derived from a project, its plan and durable config.

use std::{collections::HashMap, path::Path};

use {
    kennel_agent_config::{BootstrapEnv, Provider, bootstrap_env, paths::AGENT_STATE_DIR},
    kennel_config::{BridgeConfig, KennelConfig, ProvisioningConfig, RuntimeConfig},
    kennel_projects::{PlanSpec, Project},
    kennel_runtime::{ContainerSpec, VolumeMount},
    secrecy::Secret,
};

use crate::durable::DurableConfig;

pub const PROJECT_LABEL: &str = "kennel.project";
pub const OWNER_LABEL: &str = "kennel.owner";

/// The slices of control-plane configuration the orchestrator reads.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub runtime: RuntimeConfig,
    pub provisioning: ProvisioningConfig,
    pub bridge: BridgeConfig,
}

impl From<&KennelConfig> for OrchestratorSettings {
    fn from(config: &KennelConfig) -> Self {
        Self {
            runtime: config.runtime.clone(),
            provisioning: config.provisioning.clone(),
            bridge: config.bridge.clone(),
        }
    }
}

impl OrchestratorSettings {
    pub fn container_name(&self, project_id: &str) -> String {
        format!("{}-{project_id}", self.runtime.container_prefix)
    }

    pub fn image_for(&self, project: &Project) -> String {
        project
            .image
            .clone()
            .unwrap_or_else(|| self.runtime.default_image.clone())
    }

    /// Build the create request. Only non-secret bootstrap settings go in the
    /// environment unless key injection is explicitly enabled.
    pub fn container_spec(
        &self,
        project: &Project,
        plan: &PlanSpec,
        durable: &DurableConfig,
    ) -> ContainerSpec {
        let resources = plan.resources();
        let doc = &durable.document;

        let first_credential = doc
            .credentials()
            .into_iter()
            .find_map(|(_, provider, key)| {
                provider
                    .parse::<Provider>()
                    .ok()
                    .map(|p| (p, Secret::new(key.to_string())))
            });
        let default_credential = first_credential.as_ref().map(|(p, key)| (*p, key));

        let env = bootstrap_env(&BootstrapEnv {
            gateway_port: self.provisioning.gateway_port,
            gateway_token: &durable.gateway_token,
            resources,
            default_model: doc.primary_model(),
            default_credential,
            inject_default_key: self.provisioning.inject_default_key_env,
        });

        let volume = self.runtime.volume_root.as_ref().map(|root| VolumeMount {
            host_path: Path::new(root).join(&project.id).display().to_string(),
            container_path: AGENT_STATE_DIR.to_string(),
        });

        ContainerSpec {
            name: self.container_name(&project.id),
            image: self.image_for(project),
            env,
            resources,
            volume,
            loopback_ports: vec![
                self.bridge.port,
                self.provisioning.gateway_port,
                self.provisioning.terminal_port,
            ],
            labels: HashMap::from([
                (PROJECT_LABEL.to_string(), project.id.clone()),
                (OWNER_LABEL.to_string(), project.owner_id.clone()),
            ]),
        }
    }
}
