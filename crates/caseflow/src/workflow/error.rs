use thiserror::Error;

use crate::services::ServiceError;
use crate::tracker::types::DocumentStatus;
use crate::tracker::TrackerError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A document aborted after its terminal status was recorded.
    #[error("Document '{document_id}' in case '{case_id}' aborted: {status}")]
    Document {
        case_id: String,
        document_id: String,
        status: DocumentStatus,
    },

    #[error("All {count} documents of case '{case_id}' failed")]
    AllDocumentsFailed { case_id: String, count: usize },

    #[error("Case data service returned {status} for case '{case_id}'")]
    CaseDataUnavailable { case_id: String, status: u16 },

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
