//! PostgreSQL build store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minici_core::{BuildId, BuildRecord, BuildStatus, CommitInfo, TriggerSource};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::{BuildMutator, BuildStore, DbError, DbResult};

/// A row of the `builds` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BuildRow {
    id: uuid::Uuid,
    repository: String,
    branch: String,
    commit_info: Option<Json<CommitInfo>>,
    status: String,
    output: String,
    duration_ms: Option<i64>,
    conclusion: Option<String>,
    trigger_source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BuildRow> for BuildRecord {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Self> {
        let status: BuildStatus = row
            .status
            .parse()
            .map_err(|_| DbError::Corrupt(format!("build {}: status {}", row.id, row.status)))?;
        let trigger: TriggerSource = row.trigger_source.parse().map_err(|_| {
            DbError::Corrupt(format!("build {}: trigger {}", row.id, row.trigger_source))
        })?;
        Ok(BuildRecord {
            id: BuildId::from_uuid(row.id),
            repository: row.repository,
            branch: row.branch,
            commit: row.commit_info.map(|c| c.0),
            status,
            output: row.output,
            duration: row.duration_ms.map(|ms| ms.max(0) as u64),
            conclusion: row.conclusion,
            trigger,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL implementation of BuildStore.
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn create(
        &self,
        repository: &str,
        branch: &str,
        trigger: TriggerSource,
    ) -> DbResult<BuildRecord> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (id, repository, branch, status, output, trigger_source, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', '', $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(repository)
        .bind(branch)
        .bind(trigger.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get(&self, id: BuildId) -> DbResult<BuildRecord> {
        sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {id}")))?
            .try_into()
    }

    async fn update(&self, id: BuildId, mutator: BuildMutator) -> DbResult<BuildRecord> {
        let mut tx = self.pool.begin().await?;

        let current: BuildRecord =
            sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("build {id}")))?
                .try_into()?;

        let mut next = current.clone();
        mutator(&mut next)?;

        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET commit_info = $2, status = $3, duration_ms = $4, conclusion = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(next.commit.map(Json))
        .bind(next.status.as_str())
        .bind(next.duration.map(|ms| ms as i64))
        .bind(next.conclusion)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn append_output(&self, id: BuildId, chunk: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET output = output || $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(chunk)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {id}")));
        }
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> DbResult<Vec<BuildRecord>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BuildRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> BuildRow {
        BuildRow {
            id: uuid::Uuid::now_v7(),
            repository: "https://example.com/org/repo.git".into(),
            branch: "main".into(),
            commit_info: None,
            status: status.into(),
            output: String::new(),
            duration_ms: Some(1200),
            conclusion: None,
            trigger_source: "github_webhook".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let record = BuildRecord::try_from(row("running")).unwrap();
        assert_eq!(record.status, BuildStatus::Running);
        assert_eq!(record.trigger, TriggerSource::GithubWebhook);
        assert_eq!(record.duration, Some(1200));
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let err = BuildRecord::try_from(row("paused")).unwrap_err();
        assert!(matches!(err, DbError::Corrupt(_)));
    }

    async fn connect() -> PgBuildStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        PgBuildStore::new(pool)
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database in DATABASE_URL"]
    async fn test_pg_lifecycle() {
        let store = connect().await;
        let build = store
            .create("https://example.com/org/repo.git", "main", TriggerSource::Manual)
            .await
            .unwrap();
        store.append_output(build.id, "one\n").await.unwrap();
        store
            .update(build.id, Box::new(|b| b.transition(BuildStatus::Running)))
            .await
            .unwrap();
        store.append_output(build.id, "two\n").await.unwrap();

        let fetched = store.get(build.id).await.unwrap();
        assert_eq!(fetched.status, BuildStatus::Running);
        assert_eq!(fetched.output, "one\ntwo\n");
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database in DATABASE_URL"]
    async fn test_pg_rejected_update_rolls_back() {
        let store = connect().await;
        let build = store.create("repo", "main", TriggerSource::Manual).await.unwrap();
        let err = store
            .update(build.id, Box::new(|b| b.transition(BuildStatus::Success)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rejected(_)));
        assert_eq!(store.get(build.id).await.unwrap().status, BuildStatus::Pending);
    }
}
