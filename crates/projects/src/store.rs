use {async_trait::async_trait, kennel_common::time::now_ms, tracing::debug};

use crate::{
    error::{Result, StoreError},
    types::{Project, ProjectStatus, RepoInfo},
};

/// Persistence for projects. CRUD plus the narrow field updates the
/// orchestrator makes while a project moves through its lifecycle.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert(&self, project: &Project) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Project>>;
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>>;
    async fn list_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>>;
    async fn set_status(&self, id: &str, status: ProjectStatus, detail: Option<&str>)
    -> Result<()>;
    /// Point the project at a (new) container, or clear it with `None`.
    async fn set_container(
        &self,
        id: &str,
        container: Option<(&str, &str)>,
        image: Option<&str>,
    ) -> Result<()>;
    async fn set_config_blob(&self, id: &str, blob: &str) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

// ── SQLite-backed implementation ────────────────────────────────────

pub struct SqliteProjectStore {
    pool: sqlx::SqlitePool,
}

impl SqliteProjectStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    fn check_affected(id: &str, rows: u64) -> Result<()> {
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn insert(&self, p: &Project) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO projects (id, owner_id, name, workload_type, plan_id, status, status_detail,
                   container_id, container_name, image, repo_url, repo_branch, config_blob,
                   created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&p.id)
        .bind(&p.owner_id)
        .bind(&p.name)
        .bind(&p.workload_type)
        .bind(&p.plan_id)
        .bind(p.status.as_str())
        .bind(&p.status_detail)
        .bind(&p.container_id)
        .bind(&p.container_name)
        .bind(&p.image)
        .bind(p.repo.as_ref().map(|r| r.url.as_str()))
        .bind(p.repo.as_ref().and_then(|r| r.branch.as_deref()))
        .bind(&p.config_blob)
        .bind(p.created_at as i64)
        .bind(p.updated_at as i64)
        .execute(&self.pool)
        .await?;
        debug!(project_id = %p.id, owner = %p.owner_id, "project inserted");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>> {
        sqlx::query_as::<_, ProjectRow>(
            "SELECT * FROM projects WHERE owner_id = ? ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn list_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>> {
        sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE status = ?")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn set_status(
        &self,
        id: &str,
        status: ProjectStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let res = sqlx::query(
            "UPDATE projects SET status = ?, status_detail = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(detail)
        .bind(now_ms() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::check_affected(id, res.rows_affected())
    }

    async fn set_container(
        &self,
        id: &str,
        container: Option<(&str, &str)>,
        image: Option<&str>,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"UPDATE projects
               SET container_id = ?, container_name = ?, image = COALESCE(?, image), updated_at = ?
               WHERE id = ?"#,
        )
        .bind(container.map(|(cid, _)| cid))
        .bind(container.map(|(_, name)| name))
        .bind(image)
        .bind(now_ms() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::check_affected(id, res.rows_affected())
    }

    async fn set_config_blob(&self, id: &str, blob: &str) -> Result<()> {
        let res = sqlx::query("UPDATE projects SET config_blob = ?, updated_at = ? WHERE id = ?")
            .bind(blob)
            .bind(now_ms() as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::check_affected(id, res.rows_affected())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    owner_id: String,
    name: String,
    workload_type: String,
    plan_id: String,
    status: String,
    status_detail: Option<String>,
    container_id: Option<String>,
    container_name: Option<String>,
    image: Option<String>,
    repo_url: Option<String>,
    repo_branch: Option<String>,
    config_blob: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(r: ProjectRow) -> Result<Self> {
        let status = ProjectStatus::parse(&r.status).ok_or_else(|| StoreError::Corrupt {
            id: r.id.clone(),
            reason: format!("unknown status '{}'", r.status),
        })?;
        Ok(Self {
            id: r.id,
            owner_id: r.owner_id,
            name: r.name,
            workload_type: r.workload_type,
            plan_id: r.plan_id,
            status,
            status_detail: r.status_detail,
            container_id: r.container_id,
            container_name: r.container_name,
            image: r.image,
            repo: r.repo_url.map(|url| RepoInfo {
                url,
                branch: r.repo_branch,
            }),
            config_blob: r.config_blob,
            created_at: r.created_at as u64,
            updated_at: r.updated_at as u64,
        })
    }
}
