//! Feature modules implementing the tabimport API
//!
//! Each feature is a vertical slice with its own `commands/` (write
//! operations), `queries/` (read operations) and `routes.rs`. Commands and
//! queries are plain data types implementing `mediator::Request`, handled by
//! standalone async functions.
//!
//! # Features
//!
//! - **imports**: start imports, read job progress and failed rows, cancel running imports

pub mod imports;

use axum::Router;
use std::sync::Arc;

use crate::import::ImportCoordinator;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub coordinator: Arc<ImportCoordinator>,
}

/// Creates the API router with all feature routes mounted
///
/// - `/imports` - Import jobs, failed rows and cancellation
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/imports", imports::imports_routes().with_state(state.coordinator))
}
