//! Import lifecycle events

use serde::Serialize;
use uuid::Uuid;

use super::types::{ColumnMap, ImportOptions};

/// Broadcast by the coordinator; subscribe with `ImportCoordinator::subscribe`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    /// The job record and its chunk tasks exist and are about to be dispatched
    Started {
        job_id: Uuid,
        column_map: ColumnMap,
        options: ImportOptions,
    },
    /// The completion callback finalized the job
    Completed { job_id: Uuid },
    /// The backend refused the batch and the job record was deleted
    Abandoned { job_id: Uuid },
}

impl ImportEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            ImportEvent::Started { job_id, .. }
            | ImportEvent::Completed { job_id }
            | ImportEvent::Abandoned { job_id } => *job_id,
        }
    }
}
