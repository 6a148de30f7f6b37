//! Whitelisted agent CLI commands and their typed results.

use {
    kennel_runtime::ExecResult,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::error::{BridgeError, Result};

/// The agent CLI inside the container.
pub const CLI_BIN: &str = "openclaw";

/// First words that may be forwarded.
const ALLOWED_SUBCOMMANDS: &[&str] = &[
    "agent", "agents", "auth", "channels", "config", "cron", "doctor", "health", "logs",
    "memory", "model", "models", "pairing", "plugins", "session", "sessions", "skills", "status",
];

const SHELL_METACHARS: &[char] = &[';', '&', '|', '`', '$', '<', '>', '\\', '\n', '\r', '\0'];

/// A validated argv for the agent CLI, without the binary name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliCommand {
    args: Vec<String>,
}

impl CliCommand {
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.first().is_some_and(|a| a == CLI_BIN) {
            args.remove(0);
        }
        let Some(first) = args.first() else {
            return Err(BridgeError::InvalidCommand("empty command".into()));
        };
        if !ALLOWED_SUBCOMMANDS.contains(&first.as_str()) {
            return Err(BridgeError::InvalidCommand(format!(
                "subcommand '{first}' is not allowed"
            )));
        }
        if let Some(bad) = args.iter().find(|a| a.contains(SHELL_METACHARS)) {
            return Err(BridgeError::InvalidCommand(format!(
                "argument '{bad}' contains shell metacharacters"
            )));
        }
        Ok(Self { args })
    }

    pub fn subcommand(&self) -> &str {
        &self.args[0]
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Full argv for a direct exec.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(CLI_BIN.to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Result of a CLI command, whether it ran via the bridge or a direct exec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOutput {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Exit code decides success; stderr alone never fails a command.
    pub fn from_exec(res: &ExecResult) -> Self {
        let ok = res.success();
        Self {
            ok,
            data: extract_json(&res.stdout),
            error: (!ok).then(|| {
                if res.timed_out {
                    "command timed out".to_string()
                } else {
                    kennel_common::scrub_secrets(res.error_text())
                }
            }),
            stdout: res.stdout.clone(),
            stderr: res.stderr.clone(),
        }
    }
}

/// First complete JSON object or array embedded in CLI output.
///
/// CLIs mix banners and warnings with the payload; scan candidate start
/// positions and keep the first one that parses as a full value.
pub fn extract_json(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed)
        && (v.is_object() || v.is_array())
    {
        return Some(v);
    }
    output
        .char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(i, _)| {
            serde_json::Deserializer::from_str(&output[i..])
                .into_iter::<Value>()
                .next()
                .and_then(|r| r.ok())
        })
}
