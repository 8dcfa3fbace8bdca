//! tabimport server library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Chunked import of tabular data with per-row failure capture.
//!
//! # Overview
//!
//! - **Import pipeline** ([`import`]): job records, chunked dispatch onto a
//!   scheduling backend, per-row transactional import through a pluggable
//!   [`import::RowImporter`], failed-row audit trail and owner notifications
//! - **HTTP API** ([`features`]): start imports, read progress and failed
//!   rows, cancel running imports
//! - **Database**: PostgreSQL through SQLx, schema in `migrations/`
//! - **Configuration**: environment based, see [`config::Config`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabimport_server::config::ImportConfig;
//! use tabimport_server::import::{
//!     ColumnMap, ImportCoordinator, ImportRequest, ImporterRegistry, InMemoryImportStore,
//!     TokioBackend,
//! };
//!
//! # async fn run(registry: ImporterRegistry) -> anyhow::Result<()> {
//! let store = Arc::new(InMemoryImportStore::new());
//! let coordinator = ImportCoordinator::new(store.clone(), store, registry, ImportConfig::default())
//!     .with_backend("tokio", Arc::new(TokioBackend::new(4)));
//!
//! let handle = coordinator
//!     .start_import(ImportRequest::new("users", Vec::new(), ColumnMap::new()))
//!     .await?;
//! println!("import {} started", handle.job_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod import;

pub use error::AppError;
