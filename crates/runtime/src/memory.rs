//! In-process [`RuntimeDriver`] for tests.
//!
//! Containers are rows in a map. Every call is recorded, files written with
//! `inject_file` can be read back, and individual operations can be made to
//! fail or a container made to vanish to drive recovery paths.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU32, Ordering},
    },
};

use {
    async_trait::async_trait,
    futures::StreamExt,
    secrecy::ExposeSecret,
    tokio::io::AsyncWriteExt,
    tokio_util::io::ReaderStream,
};

use crate::{
    driver::RuntimeDriver,
    error::{Result, RuntimeError},
    types::{
        ContainerInfo, ContainerRef, ContainerSpec, ContainerState, ExecOpts, ExecResult,
        ExecSession, FileSpec, RawStats,
    },
};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Stop(String),
    Restart(String),
    Remove(String),
    Inspect(String),
    Exec { id: String, argv: Vec<String>, user: Option<String> },
    InjectFile { id: String, path: String },
    Stats(String),
    Logs(String),
    Shell(String),
}

impl Call {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Restart(_) => "restart",
            Self::Remove(_) => "remove",
            Self::Inspect(_) => "inspect",
            Self::Exec { .. } => "exec",
            Self::InjectFile { .. } => "inject_file",
            Self::Stats(_) => "stats",
            Self::Logs(_) => "logs",
            Self::Shell(_) => "shell",
        }
    }
}

type ExecHandler = dyn Fn(&[String], Option<&[u8]>) -> ExecResult + Send + Sync;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec_name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub memory_mb: u64,
    pub state: ContainerState,
    pub ip: String,
    pub ports: HashMap<u16, u16>,
    pub files: HashMap<String, Vec<u8>>,
    pub stats: RawStats,
    pub logs: Vec<String>,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    calls: Vec<Call>,
    fail_ops: HashSet<&'static str>,
    fail_once: Vec<&'static str>,
}

#[derive(Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
    seq: AtomicU32,
    exec_handler: Mutex<Option<Arc<ExecHandler>>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `call`, then fail if the op was scripted to.
    fn enter(&self, call: Call) -> Result<()> {
        let op = call.op();
        let mut st = self.lock();
        st.calls.push(call);
        if st.fail_ops.contains(op) {
            return Err(RuntimeError::Engine(format!("scripted {op} failure")));
        }
        if let Some(pos) = st.fail_once.iter().position(|o| *o == op) {
            st.fail_once.remove(pos);
            return Err(RuntimeError::Engine(format!("scripted {op} failure")));
        }
        Ok(())
    }

    fn with_container<T>(&self, id: &str, f: impl FnOnce(&mut FakeContainer) -> T) -> Result<T> {
        let mut st = self.lock();
        st.containers
            .get_mut(id)
            .map(f)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(Call::op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every future call of `op` fail until [`heal`](Self::heal).
    pub fn fail(&self, op: &'static str) {
        self.lock().fail_ops.insert(op);
    }

    /// Make the next call of `op` fail.
    pub fn fail_once(&self, op: &'static str) {
        self.lock().fail_once.push(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.lock().fail_ops.remove(op);
    }

    /// Drop a container from the engine's view.
    pub fn vanish(&self, id: &str) {
        self.lock().containers.remove(id);
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.lock().containers.get(id).cloned()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        let _ = self.with_container(id, |c| c.state = state);
    }

    pub fn set_stats(&self, id: &str, stats: RawStats) {
        let _ = self.with_container(id, |c| c.stats = stats);
    }

    /// Override the address and port mapping `inspect` reports.
    pub fn set_network(&self, id: &str, ip: &str, ports: HashMap<u16, u16>) {
        let _ = self.with_container(id, |c| {
            c.ip = ip.to_string();
            c.ports = ports;
        });
    }

    pub fn push_log(&self, id: &str, line: &str) {
        let _ = self.with_container(id, |c| c.logs.push(line.to_string()));
    }

    /// Answer every exec with `handler(argv, stdin)`. Default answers exit 0.
    pub fn on_exec(
        &self,
        handler: impl Fn(&[String], Option<&[u8]>) -> ExecResult + Send + Sync + 'static,
    ) {
        if let Ok(mut h) = self.exec_handler.lock() {
            *h = Some(Arc::new(handler));
        }
    }
}

#[async_trait]
impl RuntimeDriver for InMemoryRuntime {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerRef> {
        self.enter(Call::Create(spec.name.clone()))?;
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("mem-{n:04}");

        let mut st = self.lock();
        if st.containers.values().any(|c| c.spec_name == spec.name) {
            return Err(RuntimeError::Engine(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        let ports = spec
            .loopback_ports
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, (40000 + (n % 2000) * 10 + i as u32) as u16))
            .collect();
        st.containers.insert(id.clone(), FakeContainer {
            spec_name: spec.name.clone(),
            image: spec.image.clone(),
            env: spec
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.expose_secret().clone()))
                .collect(),
            memory_mb: spec.resources.memory_mb,
            state: ContainerState::Created,
            ip: format!("172.30.0.{}", n % 250 + 2),
            ports,
            files: HashMap::new(),
            stats: RawStats::default(),
            logs: Vec::new(),
        });
        Ok(ContainerRef {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.enter(Call::Start(id.to_string()))?;
        self.with_container(id, |c| c.state = ContainerState::Running)
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.enter(Call::Stop(id.to_string()))?;
        self.with_container(id, |c| c.state = ContainerState::Exited)
    }

    async fn restart(&self, id: &str) -> Result<()> {
        self.enter(Call::Restart(id.to_string()))?;
        self.with_container(id, |c| c.state = ContainerState::Running)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.enter(Call::Remove(id.to_string()))?;
        self.lock()
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        self.enter(Call::Inspect(id.to_string()))?;
        self.with_container(id, |c| ContainerInfo {
            id: id.to_string(),
            name: c.spec_name.clone(),
            state: c.state,
            ip: Some(c.ip.clone()),
            ports: c.ports.clone(),
        })
    }

    async fn exec(&self, id: &str, argv: &[String], opts: &ExecOpts) -> Result<ExecResult> {
        self.enter(Call::Exec {
            id: id.to_string(),
            argv: argv.to_vec(),
            user: opts.user.clone(),
        })?;
        let running = self.with_container(id, |c| c.state == ContainerState::Running)?;
        if !running {
            return Err(RuntimeError::Engine(format!("container {id} is not running")));
        }
        let handler = self.exec_handler.lock().ok().and_then(|h| h.clone());
        Ok(match handler {
            Some(h) => h(argv, opts.stdin.as_deref()),
            None => ExecResult::ok(""),
        })
    }

    async fn inject_file(&self, id: &str, file: &FileSpec) -> Result<()> {
        self.enter(Call::InjectFile {
            id: id.to_string(),
            path: file.path.clone(),
        })?;
        self.with_container(id, |c| {
            c.files.insert(file.path.clone(), file.contents.clone());
        })
    }

    async fn sample_stats(&self, id: &str) -> Result<RawStats> {
        self.enter(Call::Stats(id.to_string()))?;
        self.with_container(id, |c| c.stats)
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        self.enter(Call::Logs(id.to_string()))?;
        self.with_container(id, |c| {
            let skip = c.logs.len().saturating_sub(tail);
            c.logs[skip..]
                .iter()
                .map(|l| format!("{l}\n"))
                .collect::<String>()
        })
    }

    /// The shell echoes whatever it is sent.
    async fn open_shell(
        &self,
        id: &str,
        _argv: &[String],
        _user: Option<&str>,
    ) -> Result<ExecSession> {
        self.enter(Call::Shell(id.to_string()))?;
        self.with_container(id, |_| ())?;

        let (client_end, shell_end) = tokio::io::duplex(8 * 1024);
        let (mut shell_rx, mut shell_tx) = tokio::io::split(shell_end);
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut shell_rx, &mut shell_tx).await;
            let _ = shell_tx.shutdown().await;
        });

        let (client_rx, client_tx) = tokio::io::split(client_end);
        Ok(ExecSession {
            output: ReaderStream::new(client_rx)
                .map(|chunk| chunk.map_err(RuntimeError::from))
                .boxed(),
            input: Box::pin(client_tx),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::resources::ResourceSpec, secrecy::Secret};

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: "agent:test".into(),
            env: vec![("NODE_OPTIONS".into(), Secret::new("--max-old-space-size=768".into()))],
            resources: ResourceSpec::new(1024, 1.0),
            volume: None,
            loopback_ports: vec![18790],
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn lifecycle_and_recording() {
        let rt = InMemoryRuntime::new();
        let c = rt.create(&spec("kennel-a")).await.unwrap();
        assert_eq!(rt.inspect(&c.id).await.unwrap().state, ContainerState::Created);

        rt.start(&c.id).await.unwrap();
        let info = rt.inspect(&c.id).await.unwrap();
        assert!(info.is_running());
        assert!(info.host_port(18790).is_some());

        rt.stop(&c.id).await.unwrap();
        rt.remove(&c.id).await.unwrap();
        assert!(rt.inspect(&c.id).await.unwrap_err().is_not_found());
        assert_eq!(rt.ops(), vec![
            "create", "inspect", "start", "inspect", "stop", "remove", "inspect"
        ]);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let rt = InMemoryRuntime::new();
        rt.create(&spec("kennel-dup")).await.unwrap();
        assert!(rt.create(&spec("kennel-dup")).await.is_err());
    }

    #[tokio::test]
    async fn scripted_failures() {
        let rt = InMemoryRuntime::new();
        let c = rt.create(&spec("kennel-b")).await.unwrap();
        rt.fail_once("start");
        assert!(rt.start(&c.id).await.is_err());
        assert!(rt.start(&c.id).await.is_ok());

        rt.fail("restart");
        assert!(rt.restart(&c.id).await.is_err());
        assert!(rt.restart(&c.id).await.is_err());
        rt.heal("restart");
        assert!(rt.restart(&c.id).await.is_ok());
    }

    #[tokio::test]
    async fn exec_handler_and_files() {
        let rt = InMemoryRuntime::new();
        let c = rt.create(&spec("kennel-c")).await.unwrap();
        rt.inject_file(&c.id, &FileSpec::new("/tmp/a.json", b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(rt.file(&c.id, "/tmp/a.json").unwrap(), b"{}");

        let argv = vec!["true".to_string()];
        assert!(rt.exec(&c.id, &argv, &ExecOpts::default()).await.is_err());

        rt.start(&c.id).await.unwrap();
        rt.on_exec(|argv, _| ExecResult::ok(argv.join(" ")));
        let out = rt.exec(&c.id, &argv, &ExecOpts::default()).await.unwrap();
        assert_eq!(out.stdout, "true");
    }

    #[tokio::test]
    async fn shell_echoes() {
        let rt = InMemoryRuntime::new();
        let c = rt.create(&spec("kennel-d")).await.unwrap();
        let mut session = rt.open_shell(&c.id, &["sh".to_string()], None).await.unwrap();
        session.input.write_all(b"ls\n").await.unwrap();
        let chunk = session.output.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"ls\n");
    }

    #[tokio::test]
    async fn logs_tail() {
        let rt = InMemoryRuntime::new();
        let c = rt.create(&spec("kennel-e")).await.unwrap();
        for i in 0..5 {
            rt.push_log(&c.id, &format!("line {i}"));
        }
        assert_eq!(rt.logs(&c.id, 2).await.unwrap(), "line 3\nline 4\n");
    }
}
