use {anyhow::Result, clap::Subcommand, kennel_config::KennelConfig};

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
    /// Print the resolved database URL.
    Url,
}

pub async fn handle_db(action: DbAction, config: &KennelConfig) -> Result<()> {
    match action {
        DbAction::Migrate => {
            let pool = crate::serve::connect_database(config).await?;
            kennel_projects::run_migrations(&pool).await?;
            println!("Migrations applied.");
            Ok(())
        },
        DbAction::Url => {
            println!("{}", kennel_config::database_url(config));
            Ok(())
        },
    }
}
