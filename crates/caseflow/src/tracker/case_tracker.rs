//! The per-case tracker: a persisted, single-writer state machine.
//!
//! All mutations for one case go through the tracker's mutex, so concurrent
//! document workflows are linearized. Each mutation is validated against the
//! in-memory state, persisted together with its log entry, and only then
//! applied in memory. A failed write leaves both copies unchanged.
//! Writes run on the blocking pool so one case's SQLite work never parks an
//! async worker that another case is scheduled on.

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::broadcast::{CaseProgressBroadcaster, CaseProgressEvent};
use crate::db::{tracker_repo, Database, DatabaseError};

use super::error::{Result, TrackerError};
use super::types::{
    CaseDocument, CaseStatus, DocumentRecord, DocumentStatus, LogEntry, RunId, TrackerLogType,
    TrackerSnapshot,
};

pub struct CaseTracker {
    case_id: String,
    db: Database,
    broadcaster: CaseProgressBroadcaster,
    state: Mutex<TrackerSnapshot>,
}

impl CaseTracker {
    /// Wraps previously loaded (or fresh) state. Use `TrackerRegistry` to
    /// resolve trackers so each case has exactly one instance.
    pub(crate) fn new(
        snapshot: TrackerSnapshot,
        db: Database,
        broadcaster: CaseProgressBroadcaster,
    ) -> Self {
        Self {
            case_id: snapshot.case_id.clone(),
            db,
            broadcaster,
            state: Mutex::new(snapshot),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    /// Resets the tracker for a new run and returns the run's fence.
    ///
    /// Always succeeds unless persistence fails, regardless of prior state.
    pub async fn initialise(&self, transaction_id: &str) -> Result<RunId> {
        let mut state = self.state.lock().await;

        let mut next = TrackerSnapshot::new(&self.case_id);
        next.transaction_id = Some(transaction_id.to_string());
        next.run_id = RunId(state.run_id.0 + 1);
        next.status = CaseStatus::Running;
        let entry = LogEntry::new(TrackerLogType::Initialised, None);
        next.logs.push(entry.clone());

        let persisted = next.clone();
        self.persist(move |db| tracker_repo::reset(db, &persisted))
            .await?;
        *state = next;

        info!(
            "Initialised tracker for case '{}' (run {}, transaction {})",
            self.case_id, state.run_id, transaction_id
        );
        self.publish(&state, &entry, None);
        Ok(state.run_id)
    }

    /// Registers the documents discovered for this run, in discovery order.
    pub async fn register_document_ids(&self, run: RunId, documents: &[CaseDocument]) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_running(&state, run)?;
        if !state.documents.is_empty() {
            return Err(TrackerError::invariant(
                &self.case_id,
                "documents already registered for this run",
            ));
        }

        let mut records: Vec<DocumentRecord> = Vec::with_capacity(documents.len());
        for document in documents {
            // ASCII folding, the same rule as the NOCASE index on tracker_documents.
            if records
                .iter()
                .any(|r| r.document_id.eq_ignore_ascii_case(&document.document_id))
            {
                return Err(TrackerError::invariant(
                    &self.case_id,
                    format!("duplicate document id '{}'", document.document_id),
                ));
            }
            records.push(DocumentRecord::new(document));
        }

        let entry = LogEntry::new(TrackerLogType::RegisteredDocumentIds, None);
        let seq = state.logs.len();
        let (case_id, rows, log) = (self.case_id.clone(), records.clone(), entry.clone());
        self.persist(move |db| tracker_repo::insert_documents(db, &case_id, &rows, seq, &log))
            .await?;

        state.documents = records;
        state.logs.push(entry.clone());
        debug!(
            "Registered {} documents for case '{}'",
            state.documents.len(),
            self.case_id
        );
        self.publish(&state, &entry, None);
        Ok(())
    }

    /// Records the blob the PDF generator produced for a document.
    pub async fn register_pdf_blob_name(
        &self,
        run: RunId,
        document_id: &str,
        blob_name: &str,
    ) -> Result<()> {
        self.apply_document_event(
            run,
            document_id,
            TrackerLogType::RegisteredPdfBlobName,
            Some(blob_name),
        )
        .await
    }

    pub async fn register_document_not_found_in_source(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(run, document_id, TrackerLogType::DocumentNotFoundInSource)
            .await
    }

    pub async fn register_unable_to_convert_document_to_pdf(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(
            run,
            document_id,
            TrackerLogType::UnableToConvertDocumentToPdf,
        )
        .await
    }

    pub async fn register_unexpected_pdf_document_failure(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(
            run,
            document_id,
            TrackerLogType::UnexpectedPdfDocumentFailure,
        )
        .await
    }

    pub async fn register_indexed(&self, run: RunId, document_id: &str) -> Result<()> {
        self.register_document_event(run, document_id, TrackerLogType::Indexed)
            .await
    }

    pub async fn register_ocr_and_index_failure(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(run, document_id, TrackerLogType::OcrAndIndexFailure)
            .await
    }

    pub async fn register_document_evaluated(&self, run: RunId, document_id: &str) -> Result<()> {
        self.register_document_event(run, document_id, TrackerLogType::DocumentEvaluated)
            .await
    }

    pub async fn register_unable_to_evaluate_document(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(run, document_id, TrackerLogType::UnableToEvaluateDocument)
            .await
    }

    pub async fn register_unexpected_document_evaluation_failure(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(
            run,
            document_id,
            TrackerLogType::UnexpectedDocumentEvaluationFailure,
        )
        .await
    }

    pub async fn register_document_removed_from_search_index(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(
            run,
            document_id,
            TrackerLogType::DocumentRemovedFromSearchIndex,
        )
        .await
    }

    pub async fn register_unable_to_update_search_index(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(run, document_id, TrackerLogType::UnableToUpdateSearchIndex)
            .await
    }

    pub async fn register_unexpected_search_index_removal_failure(
        &self,
        run: RunId,
        document_id: &str,
    ) -> Result<()> {
        self.register_document_event(
            run,
            document_id,
            TrackerLogType::UnexpectedSearchIndexRemovalFailure,
        )
        .await
    }

    /// Applies any per-document event that carries no payload. The named
    /// `register_*` methods are thin wrappers over this.
    pub async fn register_document_event(
        &self,
        run: RunId,
        document_id: &str,
        log_type: TrackerLogType,
    ) -> Result<()> {
        if log_type == TrackerLogType::RegisteredPdfBlobName {
            return Err(TrackerError::invariant(
                &self.case_id,
                "pdf blob registration requires a blob name",
            ));
        }
        self.apply_document_event(run, document_id, log_type, None)
            .await
    }

    pub async fn register_no_documents_found_in_source(&self, run: RunId) -> Result<()> {
        self.set_case_status(
            run,
            CaseStatus::NoDocumentsFoundInSource,
            TrackerLogType::NoDocumentsFoundInSource,
        )
        .await
    }

    pub async fn register_completed(&self, run: RunId) -> Result<()> {
        self.set_case_status(run, CaseStatus::Completed, TrackerLogType::Completed)
            .await
    }

    pub async fn register_failed(&self, run: RunId) -> Result<()> {
        self.set_case_status(run, CaseStatus::Failed, TrackerLogType::Failed)
            .await
    }

    /// Read-only snapshot of the document list.
    pub async fn get_documents(&self) -> Vec<DocumentRecord> {
        self.state.lock().await.documents.clone()
    }

    /// Read-only snapshot of the whole tracker.
    pub async fn snapshot(&self) -> TrackerSnapshot {
        self.state.lock().await.clone()
    }

    /// Looks up one document, ignoring id case.
    pub async fn document(&self, document_id: &str) -> Option<DocumentRecord> {
        let state = self.state.lock().await;
        state
            .position_of(document_id)
            .map(|i| state.documents[i].clone())
    }

    /// True iff every document ended NotFoundInSource, UnableToConvertToPdf
    /// or UnexpectedFailure.
    pub async fn all_documents_failed(&self) -> bool {
        self.state.lock().await.all_documents_failed()
    }

    /// True iff the last run finished Completed or NoDocumentsFoundInSource.
    pub async fn is_already_processed(&self) -> bool {
        self.state.lock().await.is_already_processed()
    }

    pub async fn status(&self) -> CaseStatus {
        self.state.lock().await.status
    }

    pub async fn run_id(&self) -> RunId {
        self.state.lock().await.run_id
    }

    async fn apply_document_event(
        &self,
        run: RunId,
        document_id: &str,
        log_type: TrackerLogType,
        blob_name: Option<&str>,
    ) -> Result<()> {
        let Some(status) = log_type.document_status() else {
            return Err(TrackerError::invariant(
                &self.case_id,
                format!("'{}' is not a document event", log_type),
            ));
        };

        let mut state = self.state.lock().await;
        self.check_running(&state, run)?;

        let position = state.position_of(document_id).ok_or_else(|| {
            TrackerError::invariant(
                &self.case_id,
                format!("document '{}' is not registered", document_id),
            )
        })?;

        let current = &state.documents[position];
        if current.status.is_terminal() {
            if current.status == status {
                debug!(
                    "Document '{}' already {} in case '{}', ignoring repeat",
                    current.document_id, status, self.case_id
                );
                return Ok(());
            }
            return Err(TrackerError::invariant(
                &self.case_id,
                format!(
                    "document '{}' is already {} and cannot become {}",
                    current.document_id, current.status, status
                ),
            ));
        }

        let mut updated = current.clone();
        updated.status = status;
        if let Some(blob_name) = blob_name {
            updated.pdf_blob_name = Some(blob_name.to_string());
        }

        let entry = LogEntry::new(log_type, Some(&updated.document_id));
        let seq = state.logs.len();
        let (case_id, record, log) = (self.case_id.clone(), updated.clone(), entry.clone());
        self.persist(move |db| {
            tracker_repo::update_document(db, &case_id, position, &record, seq, &log)
        })
        .await?;

        debug!(
            "Case '{}' document '{}': {} -> {}",
            self.case_id, updated.document_id, state.documents[position].status, status
        );
        state.documents[position] = updated;
        state.logs.push(entry.clone());
        self.publish(&state, &entry, Some(status));
        Ok(())
    }

    async fn set_case_status(
        &self,
        run: RunId,
        status: CaseStatus,
        log_type: TrackerLogType,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        self.check_running(&state, run)?;

        let entry = LogEntry::new(log_type, None);
        let seq = state.logs.len();
        let (case_id, log) = (self.case_id.clone(), entry.clone());
        self.persist(move |db| tracker_repo::update_case_status(db, &case_id, status, seq, &log))
            .await?;

        state.status = status;
        state.logs.push(entry.clone());
        match status {
            CaseStatus::Failed => warn!("Case '{}' run {} failed", self.case_id, run),
            _ => info!("Case '{}' run {} finished: {}", self.case_id, run, status),
        }
        self.publish(&state, &entry, None);
        Ok(())
    }

    /// True when no run is in flight and nobody holds the state lock.
    pub(crate) fn is_idle(&self) -> bool {
        self.state
            .try_lock()
            .map(|state| state.status != CaseStatus::Running)
            .unwrap_or(false)
    }

    async fn persist<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&Database) -> std::result::Result<(), DatabaseError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || write(&db))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))??;
        Ok(())
    }

    /// Rejects writes from superseded runs and writes to finished runs.
    fn check_running(&self, state: &TrackerSnapshot, run: RunId) -> Result<()> {
        if state.run_id != run {
            return Err(TrackerError::StaleRun {
                case_id: self.case_id.clone(),
                attempted: run,
                current: state.run_id,
            });
        }
        if state.status != CaseStatus::Running {
            return Err(TrackerError::invariant(
                &self.case_id,
                format!("case is {}, not Running", state.status),
            ));
        }
        Ok(())
    }

    fn publish(
        &self,
        state: &TrackerSnapshot,
        entry: &LogEntry,
        document_status: Option<DocumentStatus>,
    ) {
        self.broadcaster.send(CaseProgressEvent::from_log(
            &self.case_id,
            state.run_id,
            entry,
            document_status,
            state.status,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CaseTracker {
        let db = Database::open_in_memory().expect("Failed to create test database");
        CaseTracker::new(
            TrackerSnapshot::new("case-1"),
            db,
            CaseProgressBroadcaster::default(),
        )
    }

    fn docs(ids: &[&str]) -> Vec<CaseDocument> {
        ids.iter()
            .map(|id| CaseDocument {
                document_id: id.to_string(),
                version_id: 1,
                file_name: format!("{}.docx", id),
                category: None,
            })
            .collect()
    }

    fn log_types(snapshot: &TrackerSnapshot) -> Vec<TrackerLogType> {
        snapshot.logs.iter().map(|l| l.log_type).collect()
    }

    #[tokio::test]
    async fn test_initialise_resets_everything() {
        let tracker = tracker();
        let run = tracker.initialise("txn-1").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a", "b"]))
            .await
            .unwrap();
        tracker.register_indexed(run, "a").await.unwrap();

        let run2 = tracker.initialise("txn-2").await.unwrap();
        assert!(run2 > run);

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, CaseStatus::Running);
        assert!(snapshot.documents.is_empty());
        assert_eq!(log_types(&snapshot), vec![TrackerLogType::Initialised]);
        assert_eq!(snapshot.transaction_id.as_deref(), Some("txn-2"));
    }

    #[tokio::test]
    async fn test_every_mutation_appends_one_log_entry() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a", "b"]))
            .await
            .unwrap();
        tracker.register_document_evaluated(run, "a").await.unwrap();
        tracker
            .register_pdf_blob_name(run, "a", "case-1/pdfs/a.pdf")
            .await
            .unwrap();
        tracker.register_indexed(run, "a").await.unwrap();
        tracker
            .register_document_not_found_in_source(run, "b")
            .await
            .unwrap();
        tracker.register_completed(run).await.unwrap();

        let snapshot = tracker.snapshot().await;
        assert_eq!(
            log_types(&snapshot),
            vec![
                TrackerLogType::Initialised,
                TrackerLogType::RegisteredDocumentIds,
                TrackerLogType::DocumentEvaluated,
                TrackerLogType::RegisteredPdfBlobName,
                TrackerLogType::Indexed,
                TrackerLogType::DocumentNotFoundInSource,
                TrackerLogType::Completed,
            ]
        );
        assert_eq!(snapshot.logs[4].document_id.as_deref(), Some("a"));
        assert_eq!(snapshot.logs[6].document_id, None);
    }

    #[tokio::test]
    async fn test_pdf_blob_name_visible_in_documents() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["Doc-1"]))
            .await
            .unwrap();
        tracker
            .register_pdf_blob_name(run, "doc-1", "case-1/pdfs/Doc-1.pdf")
            .await
            .unwrap();

        let documents = tracker.get_documents().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].status, DocumentStatus::PdfUploadedToBlob);
        assert_eq!(
            documents[0].pdf_blob_name.as_deref(),
            Some("case-1/pdfs/Doc-1.pdf")
        );
        // Log keeps the registered spelling of the id.
        assert_eq!(
            tracker.snapshot().await.logs[2].document_id.as_deref(),
            Some("Doc-1")
        );
    }

    #[tokio::test]
    async fn test_unregistered_document_is_invariant_violation() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a"]))
            .await
            .unwrap();

        let err = tracker.register_indexed(run, "missing").await.unwrap_err();
        assert!(matches!(err, TrackerError::InvariantViolation { .. }));
        assert_eq!(tracker.snapshot().await.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();

        let err = tracker
            .register_document_ids(run, &docs(&["a", "A"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvariantViolation { .. }));
        assert!(tracker.get_documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_cannot_be_resurrected() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a"]))
            .await
            .unwrap();
        tracker
            .register_unable_to_convert_document_to_pdf(run, "a")
            .await
            .unwrap();

        let err = tracker.register_indexed(run, "a").await.unwrap_err();
        assert!(matches!(err, TrackerError::InvariantViolation { .. }));

        // Repeating the same terminal status is a no-op.
        tracker
            .register_unable_to_convert_document_to_pdf(run, "a")
            .await
            .unwrap();
        assert_eq!(tracker.snapshot().await.logs.len(), 3);
    }

    #[tokio::test]
    async fn test_stale_run_writes_rejected() {
        let tracker = tracker();
        let old = tracker.initialise("txn-1").await.unwrap();
        tracker
            .register_document_ids(old, &docs(&["a"]))
            .await
            .unwrap();
        let new = tracker.initialise("txn-2").await.unwrap();
        tracker
            .register_document_ids(new, &docs(&["a"]))
            .await
            .unwrap();

        let err = tracker.register_indexed(old, "a").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::StaleRun { attempted, current, .. } if attempted == old && current == new
        ));
        assert_eq!(
            tracker.get_documents().await[0].status,
            DocumentStatus::None
        );
    }

    #[tokio::test]
    async fn test_queries_do_not_mutate() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a"]))
            .await
            .unwrap();
        let before = tracker.snapshot().await;

        let _ = tracker.get_documents().await;
        let _ = tracker.is_already_processed().await;
        let _ = tracker.all_documents_failed().await;

        assert_eq!(tracker.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_already_processed_states() {
        let tracker = tracker();
        assert!(!tracker.is_already_processed().await);

        let run = tracker.initialise("txn").await.unwrap();
        assert!(!tracker.is_already_processed().await);
        tracker.register_no_documents_found_in_source(run).await.unwrap();
        assert!(tracker.is_already_processed().await);

        let run = tracker.initialise("txn").await.unwrap();
        tracker.register_failed(run).await.unwrap();
        assert!(!tracker.is_already_processed().await);
    }

    #[tokio::test]
    async fn test_writes_after_case_finished_rejected() {
        let tracker = tracker();
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a"]))
            .await
            .unwrap();
        tracker.register_completed(run).await.unwrap();

        let err = tracker.register_indexed(run, "a").await.unwrap_err();
        assert!(matches!(err, TrackerError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast() {
        let db = Database::open_in_memory().unwrap();
        let broadcaster = CaseProgressBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let tracker = CaseTracker::new(TrackerSnapshot::new("case-9"), db, broadcaster);

        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a"]))
            .await
            .unwrap();
        tracker.register_ocr_and_index_failure(run, "a").await.unwrap();

        assert_eq!(rx.try_recv().unwrap().log_type, TrackerLogType::Initialised);
        assert_eq!(
            rx.try_recv().unwrap().log_type,
            TrackerLogType::RegisteredDocumentIds
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.case_id, "case-9");
        assert_eq!(event.document_status, Some(DocumentStatus::OcrAndIndexFailure));
    }

    #[tokio::test]
    async fn test_state_is_persisted() {
        let db = Database::open_in_memory().unwrap();
        let tracker = CaseTracker::new(
            TrackerSnapshot::new("case-1"),
            db.clone(),
            CaseProgressBroadcaster::default(),
        );
        let run = tracker.initialise("txn").await.unwrap();
        tracker
            .register_document_ids(run, &docs(&["a", "b"]))
            .await
            .unwrap();
        tracker.register_indexed(run, "b").await.unwrap();

        let persisted = tracker_repo::load(&db, "case-1").unwrap().unwrap();
        assert_eq!(persisted, tracker.snapshot().await);
    }
}
