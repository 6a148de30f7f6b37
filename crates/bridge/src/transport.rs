//! HTTP-with-exec-fallback transport to the bridge agent.
//!
//! One logical call walks every candidate URL per attempt, sleeps a linear
//! backoff between attempts, and when all HTTP paths fail runs a command
//! inside the container: `curl` against the bridge on the container's own
//! loopback, or the agent CLI directly for command and login calls.

use std::{sync::Arc, time::Duration};

use {
    kennel_common::scrub_secrets,
    kennel_config::BridgeConfig,
    kennel_metrics::{bridge as names, labels},
    kennel_runtime::{ExecOpts, RuntimeDriver},
    reqwest::{Client, Method, StatusCode},
    secrecy::{ExposeSecret, Secret},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    command::CommandOutput,
    endpoint::candidate_urls,
    error::{BridgeError, Context, Result},
};

const TOKEN_ENV: &str = "KENNEL_BRIDGE_TOKEN";
const RELOAD_HEADER: &str = "x-reload";

/// Retry and timeout class of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Config reads and writes: full retry budget.
    Standard,
    /// Readiness checks: one pass over the candidates.
    Probe,
    /// CLI commands: one pass, since re-running a command is not safe.
    Command,
    /// Interactive login: one pass, long timeout, partial output accepted.
    Auth,
}

impl CallKind {
    fn attempts(self, configured: u32) -> u32 {
        match self {
            Self::Standard => configured.max(1),
            Self::Probe | Self::Command | Self::Auth => 1,
        }
    }
}

/// Which container to talk to and the bearer token its bridge expects.
pub struct BridgeTarget<'a> {
    pub container_id: &'a str,
    pub token: &'a Secret<String>,
}

/// One logical bridge call.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub method: Method,
    pub path: &'static str,
    pub body: Option<Value>,
    /// Ask the agent to reload its configuration in place.
    pub reload: bool,
    pub kind: CallKind,
    /// Argv to run instead of the in-container `curl` when HTTP fails.
    pub cli_fallback: Option<Vec<String>>,
}

impl BridgeRequest {
    pub fn get(path: &'static str) -> Self {
        Self {
            method: Method::GET,
            path,
            body: None,
            reload: false,
            kind: CallKind::Standard,
            cli_fallback: None,
        }
    }

    pub fn post(path: &'static str, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(path)
        }
    }

    pub fn kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn reload(mut self) -> Self {
        self.reload = true;
        self
    }

    pub fn cli_fallback(mut self, argv: Vec<String>) -> Self {
        self.cli_fallback = Some(argv);
        self
    }
}

pub struct BridgeTransport {
    http: Client,
    runtime: Arc<dyn RuntimeDriver>,
    config: BridgeConfig,
    in_network: bool,
}

impl BridgeTransport {
    pub fn new(
        runtime: Arc<dyn RuntimeDriver>,
        config: &BridgeConfig,
        in_network: bool,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .context("failed to build HTTP client for bridge transport")?;
        Ok(Self {
            http,
            runtime,
            config: config.clone(),
            in_network,
        })
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeDriver> {
        &self.runtime
    }

    fn timeout_for(&self, kind: CallKind) -> Duration {
        match kind {
            CallKind::Standard | CallKind::Probe => {
                Duration::from_secs(self.config.request_timeout_secs)
            },
            CallKind::Command | CallKind::Auth => {
                Duration::from_secs(self.config.command_timeout_secs)
            },
        }
    }

    /// Perform `req` against the bridge in `target` and return the response body.
    ///
    /// A 4xx from any path fails immediately. A container the engine no
    /// longer knows fails with [`BridgeError::Runtime`] before any HTTP.
    pub async fn call(&self, target: &BridgeTarget<'_>, req: &BridgeRequest) -> Result<Vec<u8>> {
        metrics::counter!(names::CALLS_TOTAL, labels::PATH => req.path).increment(1);
        let info = self.runtime.inspect(target.container_id).await?;
        let candidates = candidate_urls(&info, self.config.port, self.in_network);
        let attempts = req.kind.attempts(self.config.attempts);
        let timeout = self.timeout_for(req.kind);

        let mut last = "no candidate address".to_string();
        for attempt in 1..=attempts {
            for base in &candidates {
                metrics::counter!(names::ATTEMPTS_TOTAL).increment(1);
                match self.send(base, target.token, req, timeout).await {
                    Ok((status, body)) if status.is_success() => return Ok(body),
                    Ok((status, body)) if status.is_client_error() => {
                        metrics::counter!(names::FAILURES_TOTAL).increment(1);
                        return Err(rejected(req.path, status.as_u16(), &body));
                    },
                    Ok((status, _)) => {
                        debug!(url = %base, path = req.path, attempt, %status, "bridge server error");
                        last = format!("{base} answered {status}");
                    },
                    Err(e) => {
                        debug!(url = %base, path = req.path, attempt, error = %e, "bridge request failed");
                        last = format!("{base}: {e}");
                    },
                }
            }
            if attempt < attempts {
                let backoff = Duration::from_millis(self.config.backoff_ms * u64::from(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        warn!(
            container = target.container_id,
            path = req.path,
            last = %scrub_secrets(&last),
            "bridge HTTP paths exhausted, falling back to exec"
        );
        metrics::counter!(names::EXEC_FALLBACKS_TOTAL, labels::PATH => req.path).increment(1);

        let result = match req.cli_fallback {
            Some(ref argv) => self.exec_cli(target, req, argv, timeout).await,
            None => self.exec_curl(target, req, timeout).await,
        };
        if result.is_err() {
            metrics::counter!(names::FAILURES_TOTAL).increment(1);
        }
        result
    }

    async fn send(
        &self,
        base: &str,
        token: &Secret<String>,
        req: &BridgeRequest,
        timeout: Duration,
    ) -> std::result::Result<(StatusCode, Vec<u8>), reqwest::Error> {
        let mut builder = self
            .http
            .request(req.method.clone(), format!("{base}{}", req.path))
            .bearer_auth(token.expose_secret())
            .timeout(timeout);
        if req.reload {
            builder = builder.header(RELOAD_HEADER, "true");
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?.to_vec();
        Ok((status, body))
    }

    /// `curl` the bridge on the container's own loopback. The token travels
    /// in the exec environment and the body on stdin, never in argv.
    async fn exec_curl(
        &self,
        target: &BridgeTarget<'_>,
        req: &BridgeRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let script = curl_script(req, self.config.port, timeout);
        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        let mut opts = ExecOpts::with_timeout(timeout + Duration::from_secs(5));
        opts.env = vec![format!("{TOKEN_ENV}={}", target.token.expose_secret())];
        if let Some(ref body) = req.body {
            opts.stdin = Some(serde_json::to_vec(body)?);
        }

        let res = self.runtime.exec(target.container_id, &argv, &opts).await?;
        if !res.success() {
            return Err(BridgeError::Exhausted {
                path: req.path.to_string(),
                last: format!("in-container curl failed: {}", scrub_secrets(res.error_text())),
            });
        }
        match parse_curl_output(&res.stdout) {
            Some((status, body)) if (200..300).contains(&status) => Ok(body.into_bytes()),
            Some((status, body)) if (400..500).contains(&status) => {
                Err(rejected(req.path, status, body.as_bytes()))
            },
            Some((status, _)) => Err(BridgeError::Exhausted {
                path: req.path.to_string(),
                last: format!("in-container curl got {status}"),
            }),
            None => Err(BridgeError::Exhausted {
                path: req.path.to_string(),
                last: "in-container curl produced no status".into(),
            }),
        }
    }

    /// Run the agent CLI directly and wrap the result like the bridge would.
    async fn exec_cli(
        &self,
        target: &BridgeTarget<'_>,
        req: &BridgeRequest,
        argv: &[String],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut opts = ExecOpts::with_timeout(timeout);
        opts.partial_on_timeout = req.kind == CallKind::Auth;
        let res = self.runtime.exec(target.container_id, argv, &opts).await?;
        debug!(
            container = target.container_id,
            exit_code = res.exit_code,
            timed_out = res.timed_out,
            "cli fallback finished"
        );
        let mut out = CommandOutput::from_exec(&res);
        // A login flow prints its URL and then blocks; what it printed is the answer.
        if res.timed_out && opts.partial_on_timeout && !res.stdout.trim().is_empty() {
            out.ok = true;
            out.error = None;
        }
        Ok(serde_json::to_vec(&out)?)
    }
}

fn rejected(path: &str, status: u16, body: &[u8]) -> BridgeError {
    BridgeError::Rejected {
        path: path.to_string(),
        status,
        body: scrub_secrets(String::from_utf8_lossy(body).trim()),
    }
}

fn curl_script(req: &BridgeRequest, port: u16, timeout: Duration) -> String {
    let mut script = format!(
        "curl -sS -m {} -X {} -H \"Authorization: Bearer ${TOKEN_ENV}\"",
        timeout.as_secs().max(1),
        req.method
    );
    if req.body.is_some() {
        script.push_str(" -H 'content-type: application/json' --data-binary @-");
    }
    if req.reload {
        script.push_str(&format!(" -H '{RELOAD_HEADER}: true'"));
    }
    script.push_str(&format!(
        " -w '\\n%{{http_code}}' http://127.0.0.1:{port}{}",
        req.path
    ));
    script
}

/// Split `curl -w '\n%{http_code}'` output into status and body.
fn parse_curl_output(stdout: &str) -> Option<(u16, String)> {
    let trimmed = stdout.trim_end();
    let (body, code) = match trimmed.rsplit_once('\n') {
        Some((body, code)) => (body, code),
        None => ("", trimmed),
    };
    let status: u16 = code.trim().parse().ok()?;
    (status != 0).then(|| (status, body.to_string()))
}
