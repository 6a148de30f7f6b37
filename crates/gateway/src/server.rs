use std::{future::Future, net::SocketAddr};

use {
    axum::{
        Json, Router,
        extract::State,
        middleware,
        response::IntoResponse,
        routing::{any, get, post},
    },
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use crate::{console, metrics_middleware::http_metrics_middleware, routes, state::AppState};

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between the binary and tests).
pub fn build_gateway_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let projects = Router::new()
        .route(
            "/",
            get(routes::list_projects).post(routes::create_project),
        )
        .route(
            "/{id}",
            get(routes::get_project).delete(routes::delete_project),
        )
        .route("/{id}/start", post(routes::start_project))
        .route("/{id}/stop", post(routes::stop_project))
        .route("/{id}/restart", post(routes::restart_project))
        .route(
            "/{id}/config",
            get(routes::read_config).put(routes::update_config),
        )
        .route("/{id}/command", post(routes::run_command))
        .route("/{id}/auth/login", post(routes::auth_login))
        .route("/{id}/auth/callback", post(routes::auth_callback))
        .route("/{id}/logs", get(routes::logs))
        .route("/{id}/metrics", get(routes::metrics))
        .route("/{id}/console", get(console::shell))
        .route("/{id}/terminal", any(console::terminal))
        .route("/{id}/terminal/", any(console::terminal))
        .route("/{id}/terminal/{*path}", any(console::terminal));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/projects", projects)
        .route_layer(middleware::from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Serve `app` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "runtime": state.service.runtime().backend_name(),
    }))
}
