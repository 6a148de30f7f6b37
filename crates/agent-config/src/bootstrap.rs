//! Environment consumed by the image entrypoint to write the first
//! structural document when none exists yet.

use {
    kennel_runtime::ResourceSpec,
    secrecy::{ExposeSecret, Secret},
};

use crate::provider::Provider;

pub const ENV_GATEWAY_PORT: &str = "OPENCLAW_GATEWAY_PORT";
pub const ENV_GATEWAY_TOKEN: &str = "OPENCLAW_GATEWAY_TOKEN";
pub const ENV_GATEWAY_BIND: &str = "OPENCLAW_GATEWAY_BIND";
pub const ENV_DEFAULT_MODEL: &str = "DEFAULT_MODEL";
pub const ENV_DEFAULT_PROVIDER: &str = "DEFAULT_PROVIDER";
pub const ENV_DEFAULT_API_KEY: &str = "DEFAULT_API_KEY";
pub const ENV_NODE_OPTIONS: &str = "NODE_OPTIONS";

/// Inputs for [`bootstrap_env`].
pub struct BootstrapEnv<'a> {
    pub gateway_port: u16,
    pub gateway_token: &'a Secret<String>,
    pub resources: ResourceSpec,
    pub default_model: Option<&'a str>,
    /// Last-resort key delivery; only used when `inject_default_key` is set.
    pub default_credential: Option<(Provider, &'a Secret<String>)>,
    pub inject_default_key: bool,
}

/// The fixed bootstrap variable set.
///
/// The provider key goes in the environment only when explicitly allowed;
/// otherwise the provisioning sequence writes the secret store directly.
pub fn bootstrap_env(input: &BootstrapEnv<'_>) -> Vec<(String, Secret<String>)> {
    let mut env = vec![
        var(ENV_GATEWAY_PORT, input.gateway_port.to_string()),
        var(ENV_GATEWAY_TOKEN, input.gateway_token.expose_secret().clone()),
        var(ENV_GATEWAY_BIND, "lan".to_string()),
        var(ENV_NODE_OPTIONS, input.resources.node_options()),
    ];
    if let Some(model) = input.default_model {
        env.push(var(ENV_DEFAULT_MODEL, model.to_string()));
    }
    if let Some((provider, key)) = input.default_credential {
        env.push(var(ENV_DEFAULT_PROVIDER, provider.as_str().to_string()));
        if input.inject_default_key {
            env.push(var(ENV_DEFAULT_API_KEY, key.expose_secret().clone()));
        }
    }
    env
}

fn var(name: &str, value: String) -> (String, Secret<String>) {
    (name.to_string(), Secret::new(value))
}
