use std::fmt;

use {
    kennel_common::time::now_ms,
    serde::{Deserialize, Serialize},
};

/// Lifecycle of a project's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Provisioning,
    Running,
    Exited,
    Failed,
    /// The container vanished and is being recreated from durable state.
    Reprovisioning,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Failed => "failed",
            Self::Reprovisioning => "reprovisioning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "provisioning" => Self::Provisioning,
            "running" => Self::Running,
            "exited" => Self::Exited,
            "failed" => Self::Failed,
            "reprovisioning" => Self::Reprovisioning,
            _ => return None,
        })
    }

    /// A create or recreate is underway.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Reprovisioning)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A hosted agent. `config_blob` is the encrypted durable configuration and
/// never leaves the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub workload_type: String,
    pub plan_id: String,
    pub status: ProjectStatus,
    /// Why the last transition to `failed` happened, scrubbed.
    pub status_detail: Option<String>,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub image: Option<String>,
    pub repo: Option<RepoInfo>,
    #[serde(skip)]
    pub config_blob: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

pub const DEFAULT_WORKLOAD: &str = "openclaw";

impl Project {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            workload_type: DEFAULT_WORKLOAD.to_string(),
            plan_id: plan_id.into(),
            status: ProjectStatus::Provisioning,
            status_detail: None,
            container_id: None,
            container_name: None,
            image: None,
            repo: None,
            config_blob: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            ProjectStatus::Provisioning,
            ProjectStatus::Running,
            ProjectStatus::Exited,
            ProjectStatus::Failed,
            ProjectStatus::Reprovisioning,
        ] {
            assert_eq!(ProjectStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ProjectStatus::parse("paused"), None);
    }

    #[test]
    fn blob_is_not_serialized() {
        let mut p = Project::new("u1", "demo", "starter");
        p.config_blob = Some("ciphertext".into());
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("config_blob").is_none());
        assert_eq!(v["status"], "provisioning");
    }
}
