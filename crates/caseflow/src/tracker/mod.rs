//! Per-case progress tracking.

pub mod case_tracker;
pub mod error;
pub mod registry;
pub mod types;

pub use case_tracker::CaseTracker;
pub use error::TrackerError;
pub use registry::TrackerRegistry;
pub use types::{
    CaseDocument, CaseStatus, DocumentRecord, DocumentStatus, LogEntry, RunId, TrackerLogType,
    TrackerSnapshot,
};
