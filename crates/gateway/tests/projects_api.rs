//! End-to-end tests for the project API against an in-memory runtime and a
//! stub bridge.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    kennel_agent_config::{Provider, SplitConfig},
    kennel_bridge::{
        BridgeError, BridgeTarget, CliCommand, CommandOutput, ConfigBridge, ConfigSnapshot, Result,
    },
    kennel_gateway::{AppState, OWNER_HEADER, build_gateway_app},
    kennel_metrics::SqliteMetricSampleStore,
    kennel_orchestrator::{OrchestratorSettings, ProjectService},
    kennel_projects::SqliteProjectStore,
    kennel_runtime::memory::InMemoryRuntime,
    kennel_vault::ConfigVault,
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest},
    zeroize::Zeroizing,
};

const OWNER: &str = "user-1";
const ANT_KEY: &str = "sk-ant-REDACTED";

/// Answers every call successfully; `get_config` echoes the last push.
#[derive(Default)]
struct StubBridge {
    pushed: Mutex<Option<SplitConfig>>,
}

#[async_trait]
impl ConfigBridge for StubBridge {
    async fn status(&self, _target: &BridgeTarget<'_>) -> Result<Value> {
        Ok(json!({ "ok": true }))
    }

    async fn get_config(&self, _target: &BridgeTarget<'_>) -> Result<ConfigSnapshot> {
        let split = self
            .pushed
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BridgeError::Exhausted {
                path: "/config".into(),
                last: "nothing pushed".into(),
            })?;
        Ok(ConfigSnapshot {
            split,
            usage_stats: Some(json!({ "requests": 3 })),
        })
    }

    async fn update_config(&self, _target: &BridgeTarget<'_>, split: &SplitConfig) -> Result<()> {
        *self.pushed.lock().unwrap() = Some(split.clone());
        Ok(())
    }

    async fn run_command(
        &self,
        _target: &BridgeTarget<'_>,
        _command: &CliCommand,
    ) -> Result<CommandOutput> {
        Ok(CommandOutput {
            ok: true,
            data: Some(json!({ "models": ["anthropic/claude-sonnet-4"] })),
            error: None,
            stdout: format!("using key {ANT_KEY}"),
            stderr: String::new(),
        })
    }

    async fn auth_login(&self, _target: &BridgeTarget<'_>, provider: Provider) -> Result<Value> {
        Ok(json!({ "url": format!("https://auth.invalid/{provider}") }))
    }

    async fn auth_callback(
        &self,
        _target: &BridgeTarget<'_>,
        _provider: Provider,
        _callback_url: &str,
    ) -> Result<Value> {
        Ok(json!({ "ok": true }))
    }
}

struct TestServer {
    addr: SocketAddr,
    runtime: Arc<InMemoryRuntime>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        kennel_projects::run_migrations(&pool).await.unwrap();
        let samples = SqliteMetricSampleStore::new(pool.clone()).await.unwrap();

        let mut settings = OrchestratorSettings::default();
        settings.provisioning.stabilize_attempts = 3;
        settings.provisioning.stabilize_interval_ms = 5;
        settings.provisioning.bridge_wait_secs = 1;
        settings.provisioning.bridge_backoff_initial_ms = 2;
        settings.provisioning.bridge_backoff_max_ms = 10;

        let runtime = Arc::new(InMemoryRuntime::new());
        let service = ProjectService::new(
            Arc::new(SqliteProjectStore::new(pool)),
            runtime.clone(),
            Arc::new(StubBridge::default()),
            Arc::new(samples),
            Arc::new(ConfigVault::new(Zeroizing::new([3u8; 32]))),
            settings,
        );
        let app = build_gateway_app(AppState::new(service).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            runtime,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).header(OWNER_HEADER, OWNER)
    }

    fn post(&self, path: &str, body: Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header(OWNER_HEADER, OWNER)
            .json(&body)
    }

    async fn create(&self, body: Value) -> String {
        let resp = self.post("/api/projects", body).send().await.unwrap();
        assert_eq!(resp.status(), 202);
        let project: Value = resp.json().await.unwrap();
        assert_eq!(project["status"], "provisioning");
        project["id"].as_str().unwrap().to_string()
    }

    /// Poll until the background provisioning settles on `running`.
    async fn wait_running(&self, id: &str) -> Value {
        for _ in 0..200 {
            let project: Value = self
                .get(&format!("/api/projects/{id}"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            match project["status"].as_str() {
                Some("running") => return project,
                Some("failed") => panic!("provisioning failed: {project}"),
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("project {id} never reached running");
    }
}

#[tokio::test]
async fn health_reports_backend() {
    let server = TestServer::start().await;
    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["runtime"], "memory");
}

#[tokio::test]
async fn missing_owner_is_unauthorized() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .get(server.url("/api/projects"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing caller identity");
}

#[tokio::test]
async fn create_provisions_and_lists() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "demo" })).await;
    let project = server.wait_running(&id).await;
    assert_eq!(project["plan_id"], "starter");
    assert!(project.get("config_blob").is_none());

    let list: Value = server
        .get("/api/projects")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["projects"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_input_is_bad_request() {
    let server = TestServer::start().await;
    let resp = server
        .post("/api/projects", json!({ "name": "demo", "plan": "enterprise" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(server.runtime.calls().is_empty());
}

#[tokio::test]
async fn other_owner_gets_not_found() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "mine" })).await;
    server.wait_running(&id).await;

    let resp = server
        .client
        .get(server.url(&format!("/api/projects/{id}")))
        .header(OWNER_HEADER, "someone-else")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn config_round_trip_is_masked() {
    let server = TestServer::start().await;
    let id = server
        .create(json!({
            "name": "keyed",
            "model": "anthropic/claude-sonnet-4",
            "credentials": [{ "provider": "anthropic", "key": ANT_KEY }],
        }))
        .await;
    server.wait_running(&id).await;

    let text = server
        .get(&format!("/api/projects/{id}/config"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!text.contains(ANT_KEY));
    assert!(text.contains("••••0123"));
    let view: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(view["source"], "live");
    assert_eq!(view["usageStats"]["requests"], 3);

    let resp = server
        .client
        .put(server.url(&format!("/api/projects/{id}/config")))
        .header(OWNER_HEADER, OWNER)
        .json(&json!({ "model": "anthropic/claude-opus-4" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["tier"], "live");
}

#[tokio::test]
async fn command_is_whitelisted_and_scrubbed() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "cli" })).await;
    server.wait_running(&id).await;
    let path = format!("/api/projects/{id}/command");

    let resp = server
        .post(&path, json!({ "args": ["rm", "-rf", "/"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let out: Value = server
        .post(&path, json!({ "args": ["models", "list", "--json"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(out["ok"], true);
    assert!(!out["stdout"].as_str().unwrap().contains(ANT_KEY));
}

#[tokio::test]
async fn auth_flow_requires_callback_url() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "oauth" })).await;
    server.wait_running(&id).await;

    let login: Value = server
        .post(
            &format!("/api/projects/{id}/auth/login"),
            json!({ "provider": "openai" }),
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(login["url"], "https://auth.invalid/openai");

    let resp = server
        .post(
            &format!("/api/projects/{id}/auth/callback"),
            json!({ "provider": "openai" }),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stop_then_delete() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "short-lived" })).await;
    server.wait_running(&id).await;

    let stopped: Value = server
        .post(&format!("/api/projects/{id}/stop"), json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["status"], "exited");

    let resp = server
        .client
        .delete(server.url(&format!("/api/projects/{id}")))
        .header(OWNER_HEADER, OWNER)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server
        .get(&format!("/api/projects/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn logs_are_scrubbed() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "noisy" })).await;
    let project = server.wait_running(&id).await;
    let container = project["container_id"].as_str().unwrap();
    server
        .runtime
        .push_log(container, &format!("booting with {ANT_KEY}"));

    let body: Value = server
        .get(&format!("/api/projects/{id}/logs?tail=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let logs = body["logs"].as_str().unwrap();
    assert!(logs.contains("booting with"));
    assert!(!logs.contains(ANT_KEY));
}

#[tokio::test]
async fn console_shell_echoes() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "shell" })).await;
    server.wait_running(&id).await;

    let mut request = format!("ws://{}/api/projects/{id}/console", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(OWNER_HEADER, OWNER.parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    ws.send(Message::text("whoami\n")).await.unwrap();
    let reply = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Binary(b) => break b,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    };
    assert_eq!(&reply[..], b"whoami\n");
    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn terminal_requests_are_proxied() {
    let server = TestServer::start().await;
    let id = server.create(json!({ "name": "term" })).await;
    let project = server.wait_running(&id).await;
    let container = project["container_id"].as_str().unwrap();

    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/token?lang=en")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token":"t"}"#)
        .create_async()
        .await;
    let port: u16 = upstream
        .host_with_port()
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();
    server
        .runtime
        .set_network(container, "", HashMap::from([(7681, port)]));

    let resp = server
        .get(&format!("/api/projects/{id}/terminal/token?lang=en"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert_eq!(resp.text().await.unwrap(), r#"{"token":"t"}"#);
    mock.assert_async().await;
}
