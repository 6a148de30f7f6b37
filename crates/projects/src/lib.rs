//! Projects: one sandboxed agent container per record.

pub mod error;
pub mod plan;
pub mod store;
pub mod types;

pub use {
    error::{Result, StoreError},
    plan::{PLANS, PlanSpec, find_plan},
    store::{ProjectStore, SqliteProjectStore},
    types::{Project, ProjectStatus, RepoInfo},
};

/// Create the `projects` table and indexes.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
