//! Control-plane configuration loading and env substitution.
//!
//! Config files: `kennel.toml`, `kennel.yaml`, or `kennel.json`,
//! searched in `./` then `~/.config/kennel/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw file.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, database_url, discover_and_load, load_config, set_data_dir},
    schema::{
        BridgeConfig, DatabaseConfig, KennelConfig, MetricsConfig, NetworkPlacement,
        ProvisioningConfig, RuntimeConfig, ServerConfig, VaultConfig,
    },
};
