/// Control-plane configuration schema.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KennelConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub runtime: RuntimeConfig,
    pub bridge: BridgeConfig,
    pub provisioning: ProvisioningConfig,
    pub metrics: MetricsConfig,
    pub vault: VaultConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8420,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL. When unset, `kennel.db` under the data dir is used.
    pub url: Option<String>,
}

/// Whether this process can reach the sandbox network directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlacement {
    /// Detect by looking for `/.dockerenv`.
    #[default]
    Auto,
    /// The control plane runs inside the shared container network.
    Inside,
    /// The control plane runs on the host.
    Host,
}

/// Container engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine socket path. Falls back to the engine's local defaults.
    pub docker_socket: Option<String>,
    /// Shared private network every agent container joins. Created on first
    /// use when missing.
    pub network: String,
    /// Create the network without outbound access.
    pub network_internal: bool,
    /// OCI runtime for user-space kernel isolation. Empty uses the engine default.
    pub sandbox_runtime: String,
    pub default_image: String,
    pub container_prefix: String,
    /// Host directory under which per-project volumes are created.
    pub volume_root: Option<String>,
    pub control_plane_placement: NetworkPlacement,
    /// Default `exec` timeout.
    pub exec_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket: None,
            network: "kennel-net".into(),
            network_internal: false,
            sandbox_runtime: "runsc".into(),
            default_image: "ghcr.io/kennel-org/agent:latest".into(),
            container_prefix: "kennel".into(),
            volume_root: None,
            control_plane_placement: NetworkPlacement::Auto,
            exec_timeout_secs: 30,
        }
    }
}

impl RuntimeConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    /// Resolve [`NetworkPlacement::Auto`] against the local filesystem.
    pub fn control_plane_in_network(&self) -> bool {
        match self.control_plane_placement {
            NetworkPlacement::Inside => true,
            NetworkPlacement::Host => false,
            NetworkPlacement::Auto => std::path::Path::new("/.dockerenv").exists(),
        }
    }
}

/// In-container bridge agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Port the bridge listens on inside the container.
    pub port: u16,
    /// Attempts per call (command calls always get one).
    pub attempts: u32,
    /// Linear backoff unit: attempt `n` sleeps `n * backoff_ms`.
    pub backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 18790,
            attempts: 3,
            backoff_ms: 1000,
            request_timeout_secs: 15,
            command_timeout_secs: 120,
        }
    }
}

/// Post-start provisioning timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub stabilize_attempts: u32,
    pub stabilize_interval_ms: u64,
    pub bridge_wait_secs: u64,
    pub bridge_backoff_initial_ms: u64,
    pub bridge_backoff_max_ms: u64,
    /// Port of the agent's own gateway inside the container.
    pub gateway_port: u16,
    /// Port of the third-party terminal server inside the container.
    pub terminal_port: u16,
    /// Put the default provider key in the container env when no other
    /// channel can deliver it. Off by default.
    pub inject_default_key_env: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            stabilize_attempts: 10,
            stabilize_interval_ms: 2000,
            bridge_wait_secs: 90,
            bridge_backoff_initial_ms: 200,
            bridge_backoff_max_ms: 2000,
            gateway_port: 18789,
            terminal_port: 7681,
            inject_default_key_env: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub retention_hours: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            retention_hours: 24,
        }
    }
}

/// Key material for the configuration-blob cipher. Either a raw base64 key
/// or a passphrase + salt run through Argon2id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub key: Option<String>,
    pub passphrase: Option<String>,
    pub salt: Option<String>,
}
