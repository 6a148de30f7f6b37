use std::{collections::HashMap, fmt, pin::Pin, time::Duration};

use {
    bytes::Bytes,
    futures::stream::BoxStream,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tokio::io::AsyncWrite,
};

use crate::{error::Result, resources::ResourceSpec};

/// Engine-assigned identity of a created container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

/// Host directory bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
}

/// Everything needed to create one workload container.
#[derive(Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Bootstrap environment. Values may carry tokens, hence `Secret`.
    pub env: Vec<(String, Secret<String>)>,
    pub resources: ResourceSpec,
    pub volume: Option<VolumeMount>,
    /// Container ports published on the host loopback with an ephemeral host port.
    pub loopback_ports: Vec<u16>,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    /// `KEY=value` pairs as the engine API wants them.
    pub(crate) fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{k}={}", v.expose_secret()))
            .collect()
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.expose_secret().as_str())
    }
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("env", &env_keys)
            .field("resources", &self.resources)
            .field("volume", &self.volume)
            .field("loopback_ports", &self.loopback_ports)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Live view of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    /// Address on the shared private network.
    pub ip: Option<String>,
    /// Container port to host loopback port.
    pub ports: HashMap<u16, u16>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }
}

/// Options controlling a one-shot exec.
#[derive(Debug, Clone)]
pub struct ExecOpts {
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub user: Option<String>,
    pub cwd: Option<String>,
    pub env: Vec<String>,
    pub max_output_bytes: usize,
    /// On timeout, return what was collected so far instead of failing.
    /// Interactive login flows print a URL and then block.
    pub partial_on_timeout: bool,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            stdin: None,
            timeout: Duration::from_secs(30),
            user: None,
            cwd: None,
            env: Vec::new(),
            max_output_bytes: 200 * 1024,
            partial_on_timeout: false,
        }
    }
}

impl ExecOpts {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn as_root(mut self) -> Self {
        self.user = Some("root".into());
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }
}

/// Result of a one-shot exec. Success is the exit code, never stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Best message body for a failed exec: stderr if present, else stdout.
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// A file to place inside a container.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

impl FileSpec {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            mode: 0o600,
            uid: 0,
            gid: 0,
        }
    }

    pub fn owned_by(mut self, uid: u64, gid: u64) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}

/// Raw cumulative counters from one stats sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStats {
    pub cpu_total: u64,
    pub system_total: u64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

/// An attached interactive exec: bytes out, bytes in.
pub struct ExecSession {
    pub output: BoxStream<'static, Result<Bytes>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecSession").finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_alone_is_not_failure() {
        let r = ExecResult {
            stdout: "done".into(),
            stderr: "warning: deprecated flag".into(),
            exit_code: 0,
            timed_out: false,
        };
        assert!(r.success());
    }

    #[test]
    fn error_text_prefers_stderr() {
        assert_eq!(ExecResult::failed(1, " boom \n").error_text(), "boom");
        let r = ExecResult {
            stdout: "only stdout".into(),
            exit_code: 2,
            ..Default::default()
        };
        assert_eq!(r.error_text(), "only stdout");
    }

    #[test]
    fn spec_debug_hides_env_values() {
        let spec = ContainerSpec {
            name: "kennel-p1".into(),
            image: "agent:latest".into(),
            env: vec![("OPENCLAW_GATEWAY_TOKEN".into(), Secret::new("s3cr3t".into()))],
            resources: ResourceSpec::new(1024, 1.0),
            volume: None,
            loopback_ports: vec![18790],
            labels: HashMap::new(),
        };
        let dbg = format!("{spec:?}");
        assert!(dbg.contains("OPENCLAW_GATEWAY_TOKEN"));
        assert!(!dbg.contains("s3cr3t"));
        assert_eq!(spec.env_value("OPENCLAW_GATEWAY_TOKEN"), Some("s3cr3t"));
        assert_eq!(spec.env_pairs(), vec!["OPENCLAW_GATEWAY_TOKEN=s3cr3t"]);
    }

    #[test]
    fn state_parse() {
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse("weird"), ContainerState::Unknown);
    }
}
