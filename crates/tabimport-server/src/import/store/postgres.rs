//! PostgreSQL import store
//!
//! Schema lives in `migrations/`. Counter updates are single
//! `SET col = col + n` statements so concurrent chunks never lose updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{ImportStore, JobCounter, RowTransaction, StoreError, StoreResult};
use crate::import::notifier::{Notification, NotificationSink};
use crate::import::types::{
    FailedImportRow, ImportJob, NewFailedImportRow, NewImportJob, RowSnapshot, ValidationErrors,
};

const FOREIGN_KEY_VIOLATION: &str = "23503";

const JOB_COLUMNS: &str = r#"
    id, file_name, file_path, importer, total_rows, processed_rows,
    imported_rows, failed_rows, user_id, completed_at, created_at, updated_at
"#;

const FAILED_ROW_COLUMNS: &str = "id, import_id, data, validation_error, error, created_at";

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, sqlx::FromRow)]
struct ImportJobRow {
    id: Uuid,
    file_name: String,
    file_path: String,
    importer: String,
    total_rows: i64,
    processed_rows: i64,
    imported_rows: i64,
    failed_rows: i64,
    user_id: Option<Uuid>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ImportJobRow> for ImportJob {
    fn from(row: ImportJobRow) -> Self {
        Self {
            id: row.id,
            file_name: row.file_name,
            file_path: row.file_path,
            importer: row.importer,
            total_rows: to_count(row.total_rows),
            processed_rows: to_count(row.processed_rows),
            imported_rows: to_count(row.imported_rows),
            failed_rows: to_count(row.failed_rows),
            user_id: row.user_id,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FailedImportRowRow {
    id: Uuid,
    import_id: Uuid,
    data: Json<RowSnapshot>,
    validation_error: Option<Json<ValidationErrors>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<FailedImportRowRow> for FailedImportRow {
    fn from(row: FailedImportRowRow) -> Self {
        Self {
            id: row.id,
            import_id: row.import_id,
            data: row.data.0,
            validation_error: row.validation_error.map(|v| v.0),
            error: row.error,
            created_at: row.created_at,
        }
    }
}

/// Import store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PgRowTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RowTransaction for PgRowTransaction {
    fn connection(&mut self) -> Option<&mut sqlx::PgConnection> {
        Some(&mut *self.tx)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn create_job(&self, job: NewImportJob) -> StoreResult<ImportJob> {
        let sql = format!(
            r#"
            INSERT INTO import_jobs (id, file_name, file_path, importer, total_rows, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query_as::<_, ImportJobRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&job.file_name)
            .bind(&job.file_path)
            .bind(&job.importer)
            .bind(to_db_count(job.total_rows))
            .bind(job.user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<ImportJob>> {
        let sql = format!("SELECT {} FROM import_jobs WHERE id = $1", JOB_COLUMNS);

        let row = sqlx::query_as::<_, ImportJobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn increment_counter(&self, id: Uuid, counter: JobCounter, amount: u64) -> StoreResult<()> {
        let column = counter.column();
        let sql = format!(
            "UPDATE import_jobs SET {column} = {column} + $1, updated_at = NOW() WHERE id = $2"
        );

        sqlx::query(&sql)
            .bind(to_db_count(amount))
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET completed_at = $1, updated_at = $1
            WHERE id = $2 AND completed_at IS NULL
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_job(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM import_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_failed_row(&self, row: NewFailedImportRow) -> StoreResult<FailedImportRow> {
        let sql = format!(
            r#"
            INSERT INTO failed_import_rows (id, import_id, data, validation_error, error)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            FAILED_ROW_COLUMNS
        );

        let result = sqlx::query_as::<_, FailedImportRowRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(row.import_id)
            .bind(Json(&row.data))
            .bind(row.validation_error.as_ref().map(Json))
            .bind(&row.error)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(inserted) => Ok(inserted.into()),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                Err(StoreError::job_not_found(row.import_id))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn count_failed_rows(&self, import_id: Uuid) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM failed_import_rows WHERE import_id = $1")
                .bind(import_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(to_count(count))
    }

    async fn list_failed_rows(
        &self,
        import_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Vec<FailedImportRow>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM failed_import_rows
            WHERE import_id = $1
            ORDER BY seq
            LIMIT $2 OFFSET $3
            "#,
            FAILED_ROW_COLUMNS
        );

        let rows = sqlx::query_as::<_, FailedImportRowRow>(&sql)
            .bind(import_id)
            .bind(to_db_count(limit))
            .bind(to_db_count(offset))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn RowTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRowTransaction { tx }))
    }
}

#[async_trait]
impl NotificationSink for PgImportStore {
    async fn deliver(&self, notification: Notification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, title, body, severity, actions, persistent, read_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.severity.as_str())
        .bind(Json(&notification.actions))
        .bind(notification.persistent)
        .bind(notification.read_at)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
