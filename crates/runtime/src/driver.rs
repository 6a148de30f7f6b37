use async_trait::async_trait;

use crate::{
    error::Result,
    types::{
        ContainerInfo, ContainerRef, ContainerSpec, ExecOpts, ExecResult, ExecSession, FileSpec,
        RawStats,
    },
};

/// Operations the control plane needs from a container engine.
///
/// Every method that touches a running container carries its own deadline;
/// dropping the returned future abandons the engine call.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Human-readable backend name ("docker", "memory").
    fn backend_name(&self) -> &'static str;

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerRef>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn restart(&self, id: &str) -> Result<()>;

    /// Force-remove. Removing an unknown container is an error; callers that
    /// don't care check [`RuntimeError::is_not_found`](crate::RuntimeError::is_not_found).
    async fn remove(&self, id: &str) -> Result<()>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo>;

    async fn exec(&self, id: &str, argv: &[String], opts: &ExecOpts) -> Result<ExecResult>;

    /// Write a file into the container. Works on stopped containers too.
    async fn inject_file(&self, id: &str, file: &FileSpec) -> Result<()>;

    /// One stats sample with raw cumulative counters.
    async fn sample_stats(&self, id: &str) -> Result<RawStats>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn logs(&self, id: &str, tail: usize) -> Result<String>;

    /// Start an attached interactive exec (TTY) for a console session.
    async fn open_shell(
        &self,
        id: &str,
        argv: &[String],
        user: Option<&str>,
    ) -> Result<ExecSession>;
}
