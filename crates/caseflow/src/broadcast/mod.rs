//! Broadcasting for real-time case progress streaming.
//!
//! Polling the tracker stays the source of truth; subscribers here get the
//! same mutations as they are persisted.

pub mod case_progress;

pub use case_progress::{CaseProgressBroadcaster, CaseProgressEvent};
