use thiserror::Error;

use super::types::RunId;
use crate::db::DatabaseError;

/// Errors from tracker operations.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// A coordination invariant would be broken (unknown or duplicate
    /// document, resurrected terminal document, case not running).
    #[error("Tracker invariant violated for case '{case_id}': {reason}")]
    InvariantViolation { case_id: String, reason: String },

    /// The write came from a run that has since been superseded.
    #[error("Stale write to case '{case_id}': run {attempted} superseded by run {current}")]
    StaleRun {
        case_id: String,
        attempted: RunId,
        current: RunId,
    },

    #[error("Tracker persistence failed: {0}")]
    Database(#[from] DatabaseError),
}

impl TrackerError {
    pub(crate) fn invariant(case_id: &str, reason: impl Into<String>) -> Self {
        TrackerError::InvariantViolation {
            case_id: case_id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
