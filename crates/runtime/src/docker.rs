//! Docker engine backend over the engine HTTP API.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    bollard::{
        API_DEFAULT_VERSION, Docker,
        container::{
            Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
            RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StatsOptions,
            StopContainerOptions, UploadToContainerOptions,
        },
        exec::{CreateExecOptions, StartExecResults},
        models::{ContainerInspectResponse, HostConfig, PortBinding},
        network::{CreateNetworkOptions, InspectNetworkOptions},
    },
    futures::{StreamExt, TryStreamExt},
    kennel_config::RuntimeConfig,
    tokio::{io::AsyncWriteExt, sync::OnceCell},
    tracing::{debug, info, warn},
};

use crate::{
    driver::RuntimeDriver,
    error::{Result, RuntimeError},
    types::{
        ContainerInfo, ContainerRef, ContainerSpec, ContainerState, ExecOpts, ExecResult,
        ExecSession, FileSpec, RawStats,
    },
};

const STOP_GRACE_SECS: i64 = 10;
const MANAGED_LABEL: &str = "kennel.managed";

pub struct DockerRuntime {
    client: std::result::Result<Docker, String>,
    config: RuntimeConfig,
    network_ready: OnceCell<()>,
}

impl DockerRuntime {
    /// Build a client. Never fails: when the engine can't be reached the
    /// driver is still returned and every operation reports
    /// [`RuntimeError::Unavailable`].
    pub fn connect(config: &RuntimeConfig) -> Self {
        let client = match config.docker_socket {
            Some(ref socket) => Docker::connect_with_unix(socket, 120, API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| e.to_string());

        if let Err(ref e) = client {
            warn!(error = %e, "container engine client unavailable");
        }
        Self {
            client,
            config: config.clone(),
            network_ready: OnceCell::new(),
        }
    }

    /// Round-trip to the engine; used at startup to log reachability.
    pub async fn ping(&self) -> Result<()> {
        self.client()?
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    /// Make sure the shared network exists. Succeeds once per process; a
    /// failure is retried on the next call.
    pub async fn ensure_network(&self) -> Result<()> {
        self.network_ready
            .get_or_try_init(|| self.create_network_if_missing())
            .await
            .map(|_| ())
    }

    async fn create_network_if_missing(&self) -> Result<()> {
        let docker = self.client()?;
        let name = self.config.network.as_str();
        match docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => {
                debug!(network = name, "network present");
                return Ok(());
            },
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {},
            Err(e) => return Err(map_err(name, e)),
        }
        match docker.create_network(network_options(&self.config)).await {
            Ok(_) => {
                info!(network = name, internal = self.config.network_internal, "network created");
                Ok(())
            },
            // Another process created it first.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(map_err(name, e)),
        }
    }

    fn client(&self) -> Result<&Docker> {
        self.client
            .as_ref()
            .map_err(|e| RuntimeError::Unavailable(e.clone()))
    }

    fn host_config(&self, spec: &ContainerSpec) -> HostConfig {
        let port_bindings = spec
            .loopback_ports
            .iter()
            .map(|port| {
                (format!("{port}/tcp"), Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".into()),
                    host_port: Some(String::new()),
                }]))
            })
            .collect::<HashMap<_, _>>();

        HostConfig {
            binds: spec
                .volume
                .as_ref()
                .map(|v| vec![format!("{}:{}", v.host_path, v.container_path)]),
            memory: Some(spec.resources.memory_bytes()),
            memory_reservation: Some(spec.resources.reservation_bytes()),
            nano_cpus: Some(spec.resources.nano_cpus()),
            network_mode: Some(self.config.network.clone()),
            port_bindings: Some(port_bindings),
            runtime: (!self.config.sandbox_runtime.is_empty())
                .then(|| self.config.sandbox_runtime.clone()),
            ..Default::default()
        }
    }
}

fn network_options(config: &RuntimeConfig) -> CreateNetworkOptions<String> {
    CreateNetworkOptions {
        name: config.network.clone(),
        driver: "bridge".into(),
        internal: config.network_internal,
        attachable: true,
        labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
        ..Default::default()
    }
}

fn map_err(id: &str, e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(id.to_string()),
        other => RuntimeError::Engine(other.to_string()),
    }
}

fn parse_inspect(resp: ContainerInspectResponse, network: &str) -> ContainerInfo {
    let state = resp
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| ContainerState::parse(&s.to_string()))
        .unwrap_or(ContainerState::Unknown);

    let settings = resp.network_settings.unwrap_or_default();
    let networks = settings.networks.unwrap_or_default();
    let ip = networks
        .get(network)
        .or_else(|| networks.values().next())
        .and_then(|n| n.ip_address.clone())
        .filter(|ip| !ip.is_empty());

    let mut ports = HashMap::new();
    for (key, bindings) in settings.ports.unwrap_or_default() {
        let Some(container_port) = key.split('/').next().and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let host_port = bindings
            .unwrap_or_default()
            .into_iter()
            .filter_map(|b| b.host_port)
            .find_map(|p| p.parse::<u16>().ok());
        if let Some(host_port) = host_port {
            ports.insert(container_port, host_port);
        }
    }

    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        state,
        ip,
        ports,
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n... [output truncated]");
    }
    s
}

fn tar_single_file(file: &FileSpec) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(file.contents.len() as u64);
    header.set_mode(file.mode);
    header.set_uid(file.uid);
    header.set_gid(file.gid);
    header.set_cksum();
    builder.append_data(
        &mut header,
        file.path.trim_start_matches('/'),
        file.contents.as_slice(),
    )?;
    Ok(builder.into_inner()?)
}

#[async_trait]
impl RuntimeDriver for DockerRuntime {
    fn backend_name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerRef> {
        let docker = self.client()?;
        self.ensure_network().await?;
        let exposed_ports = spec
            .loopback_ports
            .iter()
            .map(|p| (format!("{p}/tcp"), HashMap::new()))
            .collect::<HashMap<_, _>>();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env_pairs()),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(self.host_config(spec)),
            ..Default::default()
        };
        let resp = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| map_err(&spec.name, e))?;

        for w in &resp.warnings {
            warn!(container = %spec.name, warning = %w, "engine warning on create");
        }
        info!(
            container = %spec.name,
            id = %resp.id,
            memory_mb = spec.resources.memory_mb,
            cpus = spec.resources.cpu_cores,
            "container created"
        );
        Ok(ContainerRef {
            id: resp.id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.client()?
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        match self
            .client()?
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err(id, e)),
        }
    }

    async fn restart(&self, id: &str) -> Result<()> {
        self.client()?
            .restart_container(id, Some(RestartContainerOptions {
                t: STOP_GRACE_SECS as isize,
            }))
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.client()?
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        let resp = self
            .client()?
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err(id, e))?;
        Ok(parse_inspect(resp, &self.config.network))
    }

    async fn exec(&self, id: &str, argv: &[String], opts: &ExecOpts) -> Result<ExecResult> {
        let docker = self.client()?;
        debug!(
            container = %id,
            cmd = %argv.first().map(String::as_str).unwrap_or(""),
            timeout_secs = opts.timeout.as_secs(),
            "exec"
        );

        let exec = docker
            .create_exec(id, CreateExecOptions::<String> {
                cmd: Some(argv.to_vec()),
                attach_stdin: Some(opts.stdin.is_some()),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                user: opts.user.clone(),
                working_dir: opts.cwd.clone(),
                env: (!opts.env.is_empty()).then(|| opts.env.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| map_err(id, e))?;

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_err(id, e))?
        else {
            return Err(RuntimeError::Engine("exec started detached".into()));
        };

        if let Some(ref stdin) = opts.stdin {
            input.write_all(stdin).await?;
            input.shutdown().await?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let collect = async {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.extend_from_slice(&message)
                    },
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    LogOutput::StdIn { .. } => {},
                }
            }
            Ok::<(), bollard::errors::Error>(())
        };

        let timed_out = match tokio::time::timeout(opts.timeout, collect).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => return Err(map_err(id, e)),
            Err(_) => true,
        };

        let max = opts.max_output_bytes;
        let stdout = truncate(String::from_utf8_lossy(&stdout).into_owned(), max);
        let stderr = truncate(String::from_utf8_lossy(&stderr).into_owned(), max);

        if timed_out {
            if !opts.partial_on_timeout {
                return Err(RuntimeError::Timeout(opts.timeout));
            }
            debug!(
                container = %id,
                stdout_len = stdout.len(),
                "exec timed out, returning partial output"
            );
            return Ok(ExecResult {
                stdout,
                stderr,
                exit_code: -1,
                timed_out: true,
            });
        }

        let exit_code = docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_err(id, e))?
            .exit_code
            .unwrap_or(-1);

        debug!(
            container = %id,
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "exec done"
        );
        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
            timed_out: false,
        })
    }

    async fn inject_file(&self, id: &str, file: &FileSpec) -> Result<()> {
        let archive = tar_single_file(file)?;
        self.client()?
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| map_err(id, e))?;
        debug!(container = %id, path = %file.path, bytes = file.contents.len(), "file injected");
        Ok(())
    }

    async fn sample_stats(&self, id: &str) -> Result<RawStats> {
        let mut stream = self.client()?.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        let stats = stream
            .next()
            .await
            .ok_or_else(|| RuntimeError::Engine("empty stats stream".into()))?
            .map_err(|e| map_err(id, e))?;

        Ok(RawStats {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            system_total: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(1),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let chunks: Vec<LogOutput> = self
            .client()?
            .logs(
                id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    tail: tail.to_string(),
                    ..Default::default()
                }),
            )
            .try_collect()
            .await
            .map_err(|e| map_err(id, e))?;

        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(out)
    }

    async fn open_shell(
        &self,
        id: &str,
        argv: &[String],
        user: Option<&str>,
    ) -> Result<ExecSession> {
        let docker = self.client()?;
        let exec = docker
            .create_exec(id, CreateExecOptions::<String> {
                cmd: Some(argv.to_vec()),
                attach_stdin: Some(true),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                tty: Some(true),
                user: user.map(str::to_string),
                env: Some(vec!["TERM=xterm-256color".into()]),
                ..Default::default()
            })
            .await
            .map_err(|e| map_err(id, e))?;

        match docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_err(id, e))?
        {
            StartExecResults::Attached { output, input } => {
                let owned_id = id.to_string();
                let output = output
                    .map(move |chunk| {
                        chunk
                            .map(LogOutput::into_bytes)
                            .map_err(|e| map_err(&owned_id, e))
                    })
                    .boxed();
                info!(container = %id, "shell session attached");
                Ok(ExecSession { output, input })
            },
            StartExecResults::Detached => Err(RuntimeError::Engine("exec started detached".into())),
        }
    }
}
