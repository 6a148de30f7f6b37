//! Typed bridge operations.

use {
    async_trait::async_trait,
    kennel_agent_config::{Provider, SecretStore, SplitConfig, StructuralDocument},
    serde_json::{Value, json},
    tracing::debug,
};

use crate::{
    command::{CLI_BIN, CliCommand, CommandOutput},
    error::{BridgeError, Result},
    transport::{BridgeRequest, BridgeTarget, BridgeTransport, CallKind},
};

/// Configuration as the running agent reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub split: SplitConfig,
    /// Agent-maintained counters, read-only.
    pub usage_stats: Option<Value>,
}

/// What the orchestrator needs from a container's bridge.
#[async_trait]
pub trait ConfigBridge: Send + Sync {
    /// Readiness check: one pass, no retries.
    async fn status(&self, target: &BridgeTarget<'_>) -> Result<Value>;

    async fn get_config(&self, target: &BridgeTarget<'_>) -> Result<ConfigSnapshot>;

    /// Push both halves and ask the agent to reload in place.
    async fn update_config(&self, target: &BridgeTarget<'_>, split: &SplitConfig) -> Result<()>;

    async fn run_command(
        &self,
        target: &BridgeTarget<'_>,
        command: &CliCommand,
    ) -> Result<CommandOutput>;

    async fn auth_login(&self, target: &BridgeTarget<'_>, provider: Provider) -> Result<Value>;

    async fn auth_callback(
        &self,
        target: &BridgeTarget<'_>,
        provider: Provider,
        callback_url: &str,
    ) -> Result<Value>;
}

fn parse_value(body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

/// Accepts `{config, authProfiles}` or a bare structural document.
fn parse_snapshot(body: &[u8]) -> Result<ConfigSnapshot> {
    let value = parse_value(body)?;
    let Value::Object(mut map) = value else {
        return Err(BridgeError::InvalidResponse(
            "config response is not an object".into(),
        ));
    };

    let (structural, secrets) = match map.remove("config") {
        Some(config) => {
            let secrets = match map.remove("authProfiles") {
                Some(v) if !v.is_null() => serde_json::from_value::<SecretStore>(v)?,
                _ => SecretStore::default(),
            };
            (serde_json::from_value::<StructuralDocument>(config)?, secrets)
        },
        None => (
            serde_json::from_value::<StructuralDocument>(Value::Object(map))?,
            SecretStore::default(),
        ),
    };

    Ok(ConfigSnapshot {
        usage_stats: secrets.usage_stats.clone(),
        split: SplitConfig {
            structural,
            secrets,
        },
    })
}

#[async_trait]
impl ConfigBridge for BridgeTransport {
    async fn status(&self, target: &BridgeTarget<'_>) -> Result<Value> {
        let body = self
            .call(target, &BridgeRequest::get("/status").kind(CallKind::Probe))
            .await?;
        parse_value(&body)
    }

    async fn get_config(&self, target: &BridgeTarget<'_>) -> Result<ConfigSnapshot> {
        let body = self.call(target, &BridgeRequest::get("/config")).await?;
        parse_snapshot(&body)
    }

    async fn update_config(&self, target: &BridgeTarget<'_>, split: &SplitConfig) -> Result<()> {
        let body = json!({
            "config": serde_json::to_value(&split.structural)?,
            "authProfiles": serde_json::to_value(&split.secrets)?,
        });
        self.call(target, &BridgeRequest::post("/config/update", body).reload())
            .await?;
        debug!(container = target.container_id, "config pushed through bridge");
        Ok(())
    }

    async fn run_command(
        &self,
        target: &BridgeTarget<'_>,
        command: &CliCommand,
    ) -> Result<CommandOutput> {
        let req = BridgeRequest::post("/command", json!({ "args": command.args() }))
            .kind(CallKind::Command)
            .cli_fallback(command.argv());
        let body = self.call(target, &req).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn auth_login(&self, target: &BridgeTarget<'_>, provider: Provider) -> Result<Value> {
        let argv = [CLI_BIN, "models", "auth", "login", "--provider", provider.as_str()]
            .into_iter()
            .map(String::from)
            .collect();
        let req = BridgeRequest::post("/auth/login", json!({ "provider": provider }))
            .kind(CallKind::Auth)
            .cli_fallback(argv);
        parse_value(&self.call(target, &req).await?)
    }

    async fn auth_callback(
        &self,
        target: &BridgeTarget<'_>,
        provider: Provider,
        callback_url: &str,
    ) -> Result<Value> {
        let req = BridgeRequest::post(
            "/auth/callback",
            json!({ "provider": provider, "callbackUrl": callback_url }),
        )
        .kind(CallKind::Auth);
        parse_value(&self.call(target, &req).await?)
    }
}
