//! Imports feature module
//!
//! Starts imports and exposes job progress, failed rows and cancellation.

pub mod commands;
pub mod queries;
pub mod routes;


pub use routes::imports_routes;
