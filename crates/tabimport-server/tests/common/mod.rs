//! Common test utilities for tabimport server integration tests
//!
//! - A user row importer with the usual validation rules
//! - A gated importer that holds rows until the test releases them
//! - Coordinator builders over the in-memory store
//! - A PostgreSQL container with migrations applied, for the ignored
//!   database tests

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::{broadcast, Notify, Semaphore};
use tracing::info;

use tabimport_server::config::ImportConfig;
use tabimport_server::import::{
    BatchBackend, CellValue, ColumnMap, ImportCoordinator, ImportEvent, ImportJob, ImportOptions,
    ImporterRegistry, InMemoryImportStore, MappedRow, Row, RowImportError, RowImporter,
    RowTransaction, SyncBackend, TokioBackend, ValidationErrors,
};

pub const USERS: &str = "users";

/// Connection names registered by [`coordinator`]
pub const SYNC: &str = "sync";
pub const TOKIO: &str = "tokio";

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tabimport_server=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Test user importer
// ============================================================================

/// Imports users: `name` required, `email` required/valid/unique, `password` at least 8 characters
pub struct TestUserImporter;

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn text<'a>(row: &'a MappedRow, field: &str) -> Option<&'a str> {
    row.get(field)
        .filter(|value| !value.is_blank())
        .and_then(CellValue::as_str)
}

impl TestUserImporter {
    fn validate(row: &MappedRow) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        match row.get("name") {
            Some(value) if !value.is_blank() => {
                if value.as_str().is_none() {
                    errors.add("name", "The name field must be a string.");
                }
            },
            _ => errors.add("name", "The name field is required."),
        }

        match text(row, "email") {
            Some(email) if !is_valid_email(email) => {
                errors.add("email", "The email field must be a valid email address.")
            },
            Some(_) => {},
            None => errors.add("email", "The email field is required."),
        }

        match row.get("password").and_then(CellValue::to_display_string) {
            Some(password) if password.chars().count() < 8 => {
                errors.add("password", "The password field must be at least 8 characters.")
            },
            Some(_) => {},
            None => errors.add("password", "The password field is required."),
        }

        errors
    }
}

#[async_trait]
impl RowImporter for TestUserImporter {
    fn name(&self) -> &str {
        USERS
    }

    fn required_columns(&self) -> Vec<String> {
        vec!["email".to_string()]
    }

    async fn import(
        &self,
        tx: &mut dyn RowTransaction,
        row: &MappedRow,
        _column_map: &ColumnMap,
        _options: &ImportOptions,
    ) -> Result<(), RowImportError> {
        let mut errors = Self::validate(row);
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let name = text(row, "name").unwrap_or_default().to_string();
        let email = text(row, "email").unwrap_or_default().to_lowercase();

        if let Some(conn) = tx.connection() {
            let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(&email)
                .fetch_one(&mut *conn)
                .await?;
            if taken {
                errors.add("email", "The email has already been taken.");
                return Err(errors.into());
            }

            sqlx::query("INSERT INTO users (name, email) VALUES ($1, $2)")
                .bind(&name)
                .bind(&email)
                .execute(&mut *conn)
                .await?;
            return Ok(());
        }

        let Some(staging) = tx.staging() else {
            return Err(RowImportError::Rejected("No writable transaction".to_string()));
        };
        if staging.contains(USERS, "email", &json!(email)) {
            errors.add("email", "The email has already been taken.");
            return Err(errors.into());
        }
        staging.insert(USERS, json!({ "name": name, "email": email }));
        Ok(())
    }

    fn completed_notification_title(&self, _job: &ImportJob) -> String {
        "Test import completed".to_string()
    }

    fn completed_notification_body(&self, job: &ImportJob, failed_rows_count: u64) -> String {
        format!(
            "Your test import has completed and {} users imported. {} rows failed to import.",
            job.imported_rows, failed_rows_count
        )
    }
}

// ============================================================================
// Gated importer
// ============================================================================

pub const GATED: &str = "gated";

/// Accepts every row, but no row finishes until [`GatedImporter::open`] is called
pub struct GatedImporter {
    started: Notify,
    gate: Semaphore,
}

impl GatedImporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    /// Wait until a row is blocked on the gate
    pub async fn wait_until_started(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.started.notified())
            .await
            .expect("no row reached the importer in time");
    }

    pub fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl RowImporter for GatedImporter {
    fn name(&self) -> &str {
        GATED
    }

    async fn import(
        &self,
        tx: &mut dyn RowTransaction,
        row: &MappedRow,
        _column_map: &ColumnMap,
        _options: &ImportOptions,
    ) -> Result<(), RowImportError> {
        self.started.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RowImportError::Rejected(e.to_string()))?;

        if let Some(staging) = tx.staging() {
            staging.insert(GATED, json!(row));
        }
        Ok(())
    }
}

pub fn gated_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row::from([("Value".to_string(), CellValue::from(i as i64))]))
        .collect()
}

pub fn gated_column_map() -> ColumnMap {
    ColumnMap::new().map("value", "Value")
}

/// Coordinator with only the gated importer and a single backend
pub fn gated_coordinator(
    store: &InMemoryImportStore,
    importer: Arc<GatedImporter>,
    connection: &str,
    backend: Arc<dyn BatchBackend>,
) -> ImportCoordinator {
    let shared = Arc::new(store.clone());
    ImportCoordinator::new(
        shared.clone(),
        shared,
        ImporterRegistry::new().with(importer),
        import_config(connection),
    )
    .with_backend(connection, backend)
}

// ============================================================================
// Rows and coordinators
// ============================================================================

pub fn user_row(name: &str, email: &str, password: &str) -> Row {
    Row::from([
        ("Name".to_string(), CellValue::from(name)),
        ("E-mail".to_string(), CellValue::from(email)),
        ("Password".to_string(), CellValue::from(password)),
    ])
}

pub fn user_column_map() -> ColumnMap {
    ColumnMap::new()
        .map("name", "Name")
        .map("email", "E-mail")
        .map("password", "Password")
}

pub fn import_config(connection: &str) -> ImportConfig {
    ImportConfig {
        chunk_size: 100,
        max_rows: None,
        default_connection: connection.to_string(),
        worker_concurrency: 4,
    }
}

/// Coordinator over `store` with the test user importer and both backends
pub fn coordinator(store: &InMemoryImportStore, config: ImportConfig) -> ImportCoordinator {
    let shared = Arc::new(store.clone());
    ImportCoordinator::new(
        shared.clone(),
        shared,
        ImporterRegistry::new().with(Arc::new(TestUserImporter)),
        config,
    )
    .with_backend(SYNC, Arc::new(SyncBackend::new()))
    .with_backend(TOKIO, Arc::new(TokioBackend::new(4)))
}

/// Wait for the completion event of `job_id`
pub async fn wait_for_completion(events: &mut broadcast::Receiver<ImportEvent>, job_id: uuid::Uuid) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(ImportEvent::Completed { job_id: id }) if id == job_id => return,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    })
    .await
    .expect("import did not complete in time");
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container with migrations and a `users` table
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        sqlx::query(
            r#"
            CREATE TABLE users (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create users table")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
