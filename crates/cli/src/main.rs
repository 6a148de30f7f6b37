mod config_commands;
mod db_commands;
mod serve;
mod vault_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "kennel", about = "kennel: hosted agent containers control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Explicit config file instead of the standard search.
    #[arg(long, global = true, env = "KENNEL_CONFIG")]
    config: Option<PathBuf>,
    /// Custom data directory for the database, volumes and key file.
    #[arg(long, global = true, env = "KENNEL_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane (default when no subcommand is provided).
    Serve,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Vault key management.
    Vault {
        #[command(subcommand)]
        action: vault_commands::VaultAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(ref dir) = cli.data_dir {
        kennel_config::set_data_dir(dir.clone());
    }
    let config = match cli.config {
        Some(ref path) => kennel_config::load_config(path)?,
        None => kennel_config::discover_and_load(),
    };

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "kennel starting");
            let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
            let port = cli.port.unwrap_or(config.server.port);
            serve::run(config, bind, port).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
        Some(Commands::Db { action }) => db_commands::handle_db(action, &config).await,
        Some(Commands::Vault { action }) => vault_commands::handle_vault(action),
    }
}
