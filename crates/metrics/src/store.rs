//! Per-project resource sample storage.

use {
    anyhow::Result,
    serde::{Deserialize, Serialize},
};

/// One resource reading for a project's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub project_id: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_mb: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

/// Append-only sample storage with time-based pruning.
#[async_trait::async_trait]
pub trait MetricSampleStore: Send + Sync {
    async fn insert(&self, sample: &MetricSample) -> Result<()>;

    /// Samples for one project at or after `since`, oldest first.
    async fn history(&self, project_id: &str, since: u64, limit: usize)
    -> Result<Vec<MetricSample>>;

    /// Delete samples older than `before` (millis). Returns rows deleted.
    async fn prune_before(&self, before: u64) -> Result<u64>;

    /// Drop all samples for a deleted project.
    async fn delete_project(&self, project_id: &str) -> Result<u64>;
}

pub struct SqliteMetricSampleStore {
    pool: sqlx::SqlitePool,
}

impl SqliteMetricSampleStore {
    /// Wrap an open pool, creating the table if needed.
    pub async fn new(pool: sqlx::SqlitePool) -> Result<Self> {
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new(pool).await
    }

    async fn migrate(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metric_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_percent REAL NOT NULL,
                memory_mb REAL NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_metric_samples_project_ts
            ON metric_samples(project_id, timestamp)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricSampleStore for SqliteMetricSampleStore {
    async fn insert(&self, sample: &MetricSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_samples (project_id, cpu_percent, memory_percent, memory_mb, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.project_id)
        .bind(sample.cpu_percent)
        .bind(sample.memory_percent)
        .bind(sample.memory_mb)
        .bind(sample.timestamp as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(
        &self,
        project_id: &str,
        since: u64,
        limit: usize,
    ) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query_as::<_, SampleRow>(
            r#"
            SELECT project_id, cpu_percent, memory_percent, memory_mb, timestamp
            FROM metric_samples
            WHERE project_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(project_id)
        .bind(since as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn prune_before(&self, before: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM metric_samples WHERE timestamp < ?")
            .bind(before as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_project(&self, project_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM metric_samples WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    project_id: String,
    cpu_percent: f64,
    memory_percent: f64,
    memory_mb: f64,
    timestamp: i64,
}

impl From<SampleRow> for MetricSample {
    fn from(row: SampleRow) -> Self {
        Self {
            project_id: row.project_id,
            cpu_percent: row.cpu_percent,
            memory_percent: row.memory_percent,
            memory_mb: row.memory_mb,
            timestamp: row.timestamp as u64,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sample(project_id: &str, timestamp: u64) -> MetricSample {
        MetricSample {
            project_id: project_id.into(),
            cpu_percent: 12.5,
            memory_percent: 40.0,
            memory_mb: 409.6,
            timestamp,
        }
    }

    #[tokio::test]
    async fn insert_and_history() {
        let store = SqliteMetricSampleStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.insert(&sample("p1", 1000 + i * 100)).await.unwrap();
        }
        store.insert(&sample("p2", 1200)).await.unwrap();

        let history = store.history("p1", 1200, 100).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, 1200);
        assert_eq!(history[0].memory_mb, 409.6);

        assert_eq!(store.history("p1", 0, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn prune_is_idempotent() {
        let store = SqliteMetricSampleStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.insert(&sample("p1", 1000 + i * 100)).await.unwrap();
        }
        assert_eq!(store.prune_before(1200).await.unwrap(), 2);
        assert_eq!(store.prune_before(1200).await.unwrap(), 0);
        assert_eq!(store.history("p1", 0, 100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_project_only_touches_that_project() {
        let store = SqliteMetricSampleStore::in_memory().await.unwrap();
        store.insert(&sample("p1", 1)).await.unwrap();
        store.insert(&sample("p2", 1)).await.unwrap();
        assert_eq!(store.delete_project("p1").await.unwrap(), 1);
        assert_eq!(store.history("p2", 0, 10).await.unwrap().len(), 1);
    }
}
