//! Split & Sanitize: the structural document never holds a raw credential,
//! the secret store holds nothing but credentials.

use std::collections::BTreeMap;

use {
    kennel_runtime::FileSpec,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::debug,
};

use crate::{
    document::{
        AgentsSection, AuthProfile, AuthSection, ChannelConfig, ConfigDocument, GatewaySection,
        ProfileMode,
    },
    error::Result,
    paths::{AGENT_GID, AGENT_UID, SECRET_STORE_PATH, STRUCTURAL_DOCUMENT_PATH},
};

pub const SECRET_STORE_VERSION: u32 = 1;
const API_KEY_TYPE: &str = "api_key";

// ── structural document ──────────────────────────────────────────────────────

/// What the agent's validator reads. Profiles are reduced to `{provider, mode}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<StructuralAuth>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewaySection>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralAuth {
    pub profiles: BTreeMap<String, StructuralProfile>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub order: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralProfile {
    pub provider: String,
    pub mode: ProfileMode,
}

// ── secret store ─────────────────────────────────────────────────────────────

/// Contents of the agent's `auth-profiles.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretStore {
    pub version: u32,
    pub profiles: BTreeMap<String, SecretProfile>,
    /// Written by the agent at runtime; surfaced on read, never written back.
    #[serde(rename = "usageStats", skip_serializing)]
    pub usage_stats: Option<Value>,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self {
            version: SECRET_STORE_VERSION,
            profiles: BTreeMap::new(),
            usage_stats: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretProfile {
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
}

impl std::fmt::Debug for SecretProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretProfile")
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .field("key", &kennel_common::mask_secret(&self.key))
            .finish()
    }
}

// ── split / merge ────────────────────────────────────────────────────────────

/// The materialized pair derived from one [`ConfigDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub structural: StructuralDocument,
    pub secrets: SecretStore,
}

impl SplitConfig {
    pub fn structural_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.structural)?)
    }

    pub fn secrets_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.secrets)?)
    }

    /// Both artifacts as files owned by the agent user.
    pub fn files(&self) -> Result<Vec<FileSpec>> {
        Ok(vec![
            FileSpec::new(STRUCTURAL_DOCUMENT_PATH, self.structural_json()?)
                .owned_by(AGENT_UID, AGENT_GID),
            FileSpec::new(SECRET_STORE_PATH, self.secrets_json()?).owned_by(AGENT_UID, AGENT_GID),
        ])
    }

    pub fn merged(&self) -> ConfigDocument {
        merge(&self.structural, &self.secrets)
    }
}

/// Separate credentials from structure.
///
/// Every auth profile becomes `{provider, mode}` in the structural half;
/// profiles with a key also land in the secret store as
/// `{provider, type: "api_key", key}`. `usageStats` is dropped.
pub fn split(doc: &ConfigDocument) -> SplitConfig {
    let mut secrets = SecretStore::default();

    let auth = doc.auth.as_ref().map(|auth| {
        let mut profiles = BTreeMap::new();
        for (name, p) in &auth.profiles {
            if let Some(key) = p.key.as_deref().filter(|k| !k.is_empty()) {
                secrets.profiles.insert(name.clone(), SecretProfile {
                    provider: p.provider.clone(),
                    kind: API_KEY_TYPE.to_string(),
                    key: key.to_string(),
                });
            }
            profiles.insert(name.clone(), StructuralProfile {
                provider: p.provider.clone(),
                mode: p.mode.unwrap_or_default(),
            });
        }
        StructuralAuth {
            profiles,
            order: auth.order.clone(),
        }
    });

    debug!(
        profiles = auth.as_ref().map_or(0, |a| a.profiles.len()),
        secrets = secrets.profiles.len(),
        "config split"
    );

    SplitConfig {
        structural: StructuralDocument {
            auth,
            channels: doc.channels.clone(),
            agents: doc.agents.clone(),
            gateway: doc.gateway.clone(),
            extra: doc.extra.clone(),
        },
        secrets,
    }
}

/// Rebuild the logical document: secret-store profiles overlay the
/// structural profile map and `usageStats` is surfaced.
pub fn merge(structural: &StructuralDocument, secrets: &SecretStore) -> ConfigDocument {
    let mut profiles: BTreeMap<String, AuthProfile> = structural
        .auth
        .iter()
        .flat_map(|a| a.profiles.iter())
        .map(|(name, p)| {
            (name.clone(), AuthProfile {
                provider: p.provider.clone(),
                mode: Some(p.mode),
                kind: None,
                key: None,
            })
        })
        .collect();

    for (name, s) in &secrets.profiles {
        let entry = profiles.entry(name.clone()).or_insert_with(|| AuthProfile {
            provider: s.provider.clone(),
            mode: Some(ProfileMode::Token),
            kind: None,
            key: None,
        });
        entry.kind = Some(s.kind.clone());
        entry.key = Some(s.key.clone());
    }

    let has_auth =
        structural.auth.is_some() || !secrets.profiles.is_empty() || secrets.usage_stats.is_some();
    let auth = has_auth.then(|| AuthSection {
        profiles,
        order: structural
            .auth
            .as_ref()
            .map(|a| a.order.clone())
            .unwrap_or_default(),
        usage_stats: secrets.usage_stats.clone(),
    });

    ConfigDocument {
        auth,
        channels: structural.channels.clone(),
        agents: structural.agents.clone(),
        gateway: structural.gateway.clone(),
        extra: structural.extra.clone(),
    }
}
