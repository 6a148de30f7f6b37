//! The logical desired-state document.
//!
//! Field names follow the agent's own JSON schema (camelCase). Sections the
//! control plane does not model are carried through `extra` untouched.

use std::{collections::BTreeMap, fmt};

use {
    kennel_common::mask_secret,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::provider::Provider;

type Extra = Map<String, Value>;

// ── root ─────────────────────────────────────────────────────────────────────

/// Desired configuration of one agent: structure plus credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSection>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, ChannelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewaySection>,
    #[serde(flatten)]
    pub extra: Extra,
}

// ── auth ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Keyed by `provider:slot`, e.g. `openai:default`.
    pub profiles: BTreeMap<String, AuthProfile>,
    /// Provider name to profile keys, in preference order.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub order: BTreeMap<String, Vec<String>>,
    /// Agent-maintained counters. Read-only from our side.
    #[serde(rename = "usageStats", skip_serializing_if = "Option::is_none")]
    pub usage_stats: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    #[default]
    Token,
    Oauth,
}

/// One credential profile. `key` is only ever present in the logical
/// document and the secret store, never in the structural document.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthProfile {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ProfileMode>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl AuthProfile {
    pub fn api_key(provider: Provider, key: impl Into<String>) -> Self {
        Self {
            provider: provider.as_str().to_string(),
            mode: Some(ProfileMode::Token),
            kind: Some("api_key".into()),
            key: Some(key.into()),
        }
    }

    pub fn has_key(&self) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl fmt::Debug for AuthProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProfile")
            .field("provider", &self.provider)
            .field("mode", &self.mode)
            .field("kind", &self.kind)
            .field("key", &self.key.as_deref().map(mask_secret))
            .finish()
    }
}

// ── channels ─────────────────────────────────────────────────────────────────

/// Delivery policy fields. Set on the channel root as a template and on each
/// account as the effective override; the agent only honors the nested copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_from: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<String>,
}

impl ChannelPolicy {
    fn overlay(&mut self, patch: ChannelPolicy) {
        overlay(&mut self.dm_policy, patch.dm_policy);
        overlay(&mut self.allow_from, patch.allow_from);
        overlay(&mut self.group_policy, patch.group_policy);
        overlay(&mut self.streaming, patch.streaming);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub policy: ChannelPolicy,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub accounts: BTreeMap<String, ChannelAccount>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ChannelConfig {
    /// Insert or replace an account, writing `policy` at both levels.
    pub fn upsert_account(
        &mut self,
        account_id: impl Into<String>,
        mut account: ChannelAccount,
        policy: ChannelPolicy,
    ) {
        self.policy = policy.clone();
        account.policy = policy;
        if account.enabled.is_none() {
            account.enabled = Some(true);
        }
        self.enabled = Some(true);
        self.accounts.insert(account_id.into(), account);
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
    #[serde(flatten)]
    pub policy: ChannelPolicy,
    #[serde(flatten)]
    pub extra: Extra,
}

impl fmt::Debug for ChannelAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAccount")
            .field("enabled", &self.enabled)
            .field("name", &self.name)
            .field("bot_token", &self.bot_token.as_deref().map(mask_secret))
            .field("app_token", &self.app_token.as_deref().map(mask_secret))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ── agents ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<AgentDefaults>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSelection>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `{primary, fallbacks}` with references like `anthropic/claude-sonnet-4`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
}

// ── gateway ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

// ── operations ───────────────────────────────────────────────────────────────

fn overlay<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

fn overlay_extra(dst: &mut Extra, src: Extra) {
    for (k, v) in src {
        dst.insert(k, v);
    }
}

/// A value a caller got back from a masked read and sent unchanged.
fn is_masked(value: &str) -> bool {
    value.starts_with("••••")
}

fn overlay_secret(dst: &mut Option<String>, src: Option<String>) {
    match src {
        Some(v) if !v.is_empty() && !is_masked(&v) => *dst = Some(v),
        _ => {},
    }
}

impl ConfigDocument {
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Store `key` as the provider's default profile and make sure the
    /// provider's auth order points at it. Re-running replaces the key in place.
    pub fn set_api_key(&mut self, provider: Provider, key: impl Into<String>) {
        let profile_key = provider.default_profile();
        let auth = self.auth.get_or_insert_with(AuthSection::default);
        auth.profiles
            .insert(profile_key.clone(), AuthProfile::api_key(provider, key));
        let order = auth
            .order
            .entry(provider.as_str().to_string())
            .or_default();
        if !order.contains(&profile_key) {
            order.insert(0, profile_key);
        }
    }

    pub fn set_primary_model(&mut self, model: impl Into<String>) {
        let defaults = self
            .agents
            .get_or_insert_with(AgentsSection::default)
            .defaults
            .get_or_insert_with(AgentDefaults::default);
        defaults
            .model
            .get_or_insert_with(ModelSelection::default)
            .primary = Some(model.into());
    }

    pub fn primary_model(&self) -> Option<&str> {
        self.agents
            .as_ref()?
            .defaults
            .as_ref()?
            .model
            .as_ref()?
            .primary
            .as_deref()
    }

    /// Profiles that carry a credential, as `(profile key, provider, key)`.
    pub fn credentials(&self) -> Vec<(&str, &str, &str)> {
        self.auth
            .iter()
            .flat_map(|a| a.profiles.iter())
            .filter_map(|(k, p)| {
                p.key
                    .as_deref()
                    .filter(|key| !key.is_empty())
                    .map(|key| (k.as_str(), p.provider.as_str(), key))
            })
            .collect()
    }

    /// Deep-merge `patch` over `self`. Absent fields leave the current value;
    /// credentials that are empty or still masked keep the stored secret.
    pub fn merge_from(&mut self, patch: ConfigDocument) {
        if let Some(patch_auth) = patch.auth {
            let auth = self.auth.get_or_insert_with(AuthSection::default);
            for (name, p) in patch_auth.profiles {
                match auth.profiles.get_mut(&name) {
                    Some(existing) => {
                        existing.provider = p.provider;
                        overlay(&mut existing.mode, p.mode);
                        overlay(&mut existing.kind, p.kind);
                        overlay_secret(&mut existing.key, p.key);
                    },
                    None => {
                        auth.profiles.insert(name, p);
                    },
                }
            }
            for (provider, keys) in patch_auth.order {
                auth.order.insert(provider, keys);
            }
        }

        for (name, patch_ch) in patch.channels {
            let ch = self.channels.entry(name).or_default();
            overlay(&mut ch.enabled, patch_ch.enabled);
            ch.policy.overlay(patch_ch.policy);
            for (id, patch_acct) in patch_ch.accounts {
                let acct = ch.accounts.entry(id).or_default();
                overlay(&mut acct.enabled, patch_acct.enabled);
                overlay(&mut acct.name, patch_acct.name);
                overlay_secret(&mut acct.bot_token, patch_acct.bot_token);
                overlay_secret(&mut acct.app_token, patch_acct.app_token);
                acct.policy.overlay(patch_acct.policy);
                overlay_extra(&mut acct.extra, patch_acct.extra);
            }
            overlay_extra(&mut ch.extra, patch_ch.extra);
        }

        if let Some(patch_agents) = patch.agents {
            let agents = self.agents.get_or_insert_with(AgentsSection::default);
            if let Some(patch_defaults) = patch_agents.defaults {
                let defaults = agents.defaults.get_or_insert_with(AgentDefaults::default);
                overlay(&mut defaults.model, patch_defaults.model);
                overlay_extra(&mut defaults.extra, patch_defaults.extra);
            }
            overlay_extra(&mut agents.extra, patch_agents.extra);
        }

        if let Some(patch_gw) = patch.gateway {
            let gw = self.gateway.get_or_insert_with(GatewaySection::default);
            overlay(&mut gw.port, patch_gw.port);
            overlay(&mut gw.bind, patch_gw.bind);
            overlay(&mut gw.mode, patch_gw.mode);
            overlay_extra(&mut gw.extra, patch_gw.extra);
        }

        overlay_extra(&mut self.extra, patch.extra);
    }

    /// Copy with every credential replaced by its masked form.
    pub fn masked(&self) -> ConfigDocument {
        let mut doc = self.clone();
        if let Some(ref mut auth) = doc.auth {
            for p in auth.profiles.values_mut() {
                p.key = p.key.as_deref().map(mask_secret);
            }
        }
        for ch in doc.channels.values_mut() {
            for acct in ch.accounts.values_mut() {
                acct.bot_token = acct.bot_token.as_deref().map(mask_secret);
                acct.app_token = acct.app_token.as_deref().map(mask_secret);
            }
        }
        doc
    }
}
