//! Process wiring for `kennel serve`.

use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::{Context, Result},
    kennel_bridge::BridgeTransport,
    kennel_config::KennelConfig,
    kennel_gateway::{AppState, build_gateway_app},
    kennel_metrics::{MetricsCollector, SqliteMetricSampleStore},
    kennel_orchestrator::{OrchestratorSettings, ProjectService},
    kennel_projects::SqliteProjectStore,
    kennel_runtime::{RuntimeDriver, docker::DockerRuntime},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::vault_commands::open_vault;

pub async fn connect_database(config: &KennelConfig) -> Result<SqlitePool> {
    std::fs::create_dir_all(kennel_config::data_dir())?;
    let url = kennel_config::database_url(config);
    SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))
}

pub async fn run(config: KennelConfig, bind: String, port: u16) -> Result<()> {
    let data_dir = kennel_config::data_dir();
    let pool = connect_database(&config).await?;
    kennel_projects::run_migrations(&pool).await?;

    let docker = DockerRuntime::connect(&config.runtime);
    match docker.ping().await {
        Ok(()) => {
            info!("container engine reachable");
            if let Err(e) = docker.ensure_network().await {
                warn!(network = %config.runtime.network, error = %e, "could not prepare network");
            }
        },
        // Keep serving; every container operation reports the engine error.
        Err(e) => warn!(error = %e, "container engine unreachable"),
    }
    let runtime: Arc<dyn RuntimeDriver> = Arc::new(docker);

    let mut settings = OrchestratorSettings::from(&config);
    if settings.runtime.volume_root.is_none() {
        settings.runtime.volume_root = Some(data_dir.join("volumes").display().to_string());
    }
    let in_network = settings.runtime.control_plane_in_network();
    info!(in_network, "control plane placement resolved");

    let bridge = BridgeTransport::new(Arc::clone(&runtime), &config.bridge, in_network)?;
    let projects = Arc::new(SqliteProjectStore::new(pool.clone()));
    let samples = Arc::new(SqliteMetricSampleStore::new(pool).await?);
    let vault = open_vault(&config.vault, &data_dir)?;

    let service = ProjectService::new(
        projects.clone(),
        Arc::clone(&runtime),
        Arc::new(bridge),
        samples.clone(),
        Arc::new(vault),
        settings,
    );
    match service.reconcile_interrupted().await {
        Ok(0) => {},
        Ok(n) => warn!(count = n, "marked interrupted provisioning runs as failed"),
        Err(e) => warn!(error = %e, "could not reconcile interrupted projects"),
    }

    let cancel = CancellationToken::new();
    let collector = config.metrics.enabled.then(|| {
        Arc::new(MetricsCollector::new(
            projects,
            Arc::clone(&runtime),
            samples,
            &config.metrics,
        ))
        .spawn(cancel.clone())
    });

    let ip = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let addr = SocketAddr::new(ip, port);
    let app = build_gateway_app(AppState::new(service)?);
    let served = kennel_gateway::serve(addr, app, shutdown_signal()).await;

    cancel.cancel();
    if let Some(handle) = collector {
        let _ = handle.await;
    }
    info!("kennel stopped");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown requested");
}
