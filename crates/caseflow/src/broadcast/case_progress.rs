//! Case progress broadcaster for real-time tracker updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::tracker::types::{CaseStatus, DocumentStatus, LogEntry, RunId, TrackerLogType};

/// One persisted tracker mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseProgressEvent {
    /// Case the mutation belongs to.
    pub case_id: String,
    /// Run that performed the mutation.
    pub run_id: RunId,
    /// Kind of mutation, identical to the tracker log entry type.
    pub log_type: TrackerLogType,
    /// Document affected, for per-document mutations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Document status after the mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_status: Option<DocumentStatus>,
    /// Case status after the mutation.
    pub case_status: CaseStatus,
    /// When the mutation was logged.
    pub timestamp: DateTime<Utc>,
}

impl CaseProgressEvent {
    /// Builds an event from the log entry a mutation appended.
    pub fn from_log(
        case_id: &str,
        run_id: RunId,
        entry: &LogEntry,
        document_status: Option<DocumentStatus>,
        case_status: CaseStatus,
    ) -> Self {
        Self {
            case_id: case_id.to_string(),
            run_id,
            log_type: entry.log_type,
            document_id: entry.document_id.clone(),
            document_status,
            case_status,
            timestamp: entry.timestamp,
        }
    }
}

/// Broadcasts case progress events for streaming.
#[derive(Clone)]
pub struct CaseProgressBroadcaster {
    sender: Arc<broadcast::Sender<CaseProgressEvent>>,
}

impl CaseProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: CaseProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<CaseProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for CaseProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
