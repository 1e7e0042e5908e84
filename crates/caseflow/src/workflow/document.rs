//! Per-document workflow: evaluate, optionally clear the search index,
//! convert to PDF, then extract and index the text.
//!
//! Every outcome goes through [`classify`] and is recorded on the tracker
//! before the workflow continues or aborts. An abort always leaves the
//! document in a terminal status.

use std::sync::Arc;

use log::{debug, info, warn};
use tracing::{info_span, Instrument};

use crate::classify::{classify, Action, Classification, Stage, NO_RESPONSE};
use crate::services::{
    pdf_blob_name, CallContext, DocumentServices, EvaluationRequest, EvaluationResult,
    ExtractionRequest, PdfRequest, RemovalRequest, ServiceError, ServiceResponse,
};
use crate::tracker::types::{CaseDocument, DocumentRecord, DocumentStatus, TrackerLogType};
use crate::tracker::CaseTracker;

use super::context::RunContext;
use super::error::{Result, WorkflowError};

/// Where a (possibly resumed) document picks up.
#[derive(Debug, PartialEq, Eq)]
enum ResumePoint {
    Done,
    Evaluate,
    Convert,
    Extract(String),
}

fn resume_point(record: Option<&DocumentRecord>) -> ResumePoint {
    let Some(record) = record else {
        return ResumePoint::Evaluate;
    };
    match record.status {
        status if status.is_terminal() => ResumePoint::Done,
        DocumentStatus::PdfUploadedToBlob => match &record.pdf_blob_name {
            Some(blob_name) => ResumePoint::Extract(blob_name.clone()),
            None => ResumePoint::Convert,
        },
        // The index clean-up only runs after an "acquire" answer.
        DocumentStatus::DocumentRemovedFromSearchIndex
        | DocumentStatus::SearchIndexUpdateFailure
        | DocumentStatus::UnexpectedSearchIndexRemovalFailure => ResumePoint::Convert,
        _ => ResumePoint::Evaluate,
    }
}

pub struct DocumentWorkflow {
    run: RunContext,
    document: CaseDocument,
    tracker: Arc<CaseTracker>,
    services: Arc<dyn DocumentServices>,
    evaluation_enabled: bool,
}

impl DocumentWorkflow {
    pub fn new(
        run: RunContext,
        document: CaseDocument,
        tracker: Arc<CaseTracker>,
        services: Arc<dyn DocumentServices>,
        evaluation_enabled: bool,
    ) -> Self {
        Self {
            run,
            document,
            tracker,
            services,
            evaluation_enabled,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document.document_id
    }

    /// Runs the document to a terminal status.
    ///
    /// Returns `WorkflowError::Document` after recording an abort, and
    /// tracker errors (stale run, invariant violations) unchanged.
    pub async fn run(&self) -> Result<()> {
        let span = info_span!("document",
            case_id = %self.run.case_id,
            document_id = %self.document.document_id,
            correlation_id = %self.run.correlation_id,
            run_id = self.run.run_id.0,
        );
        self.execute().instrument(span).await
    }

    async fn execute(&self) -> Result<()> {
        let ctx = self.run.call_context();
        let record = self.tracker.document(&self.document.document_id).await;

        let blob_name = match resume_point(record.as_ref()) {
            ResumePoint::Done => {
                debug!(
                    "Document '{}' already finished, skipping",
                    self.document.document_id
                );
                return Ok(());
            }
            ResumePoint::Extract(blob_name) => blob_name,
            ResumePoint::Convert => self.step_generate_pdf(&ctx).await?,
            ResumePoint::Evaluate => {
                if self.evaluation_enabled && !self.step_evaluate(&ctx).await? {
                    return Ok(());
                }
                self.step_generate_pdf(&ctx).await?
            }
        };

        self.step_extract_text(&ctx, blob_name).await
    }

    /// Returns false when the document is unchanged and already indexed.
    async fn step_evaluate(&self, ctx: &CallContext) -> Result<bool> {
        let request = EvaluationRequest::new(&self.run.case_id, &self.document);
        let outcome = self.services.evaluate(&request, ctx).await;
        let (classification, evaluation) = self.classify_with_body(Stage::Evaluation, outcome);

        self.record(classification).await?;
        self.check_abort(classification)?;
        let Some(evaluation) = evaluation else {
            return Ok(true);
        };

        match evaluation.evaluation_result {
            EvaluationResult::DocumentUnchanged => {
                info!(
                    "Document '{}' unchanged, keeping existing index entry",
                    self.document.document_id
                );
                self.tracker
                    .register_indexed(self.run.run_id, &self.document.document_id)
                    .await?;
                Ok(false)
            }
            EvaluationResult::AcquireDocument => {
                if evaluation.update_search_index {
                    self.step_remove_from_search_index(ctx).await?;
                }
                Ok(true)
            }
        }
    }

    async fn step_remove_from_search_index(&self, ctx: &CallContext) -> Result<()> {
        let request = RemovalRequest {
            case_id: self.run.case_id.clone(),
            document_id: self.document.document_id.clone(),
            blob_name: Some(pdf_blob_name(
                &self.run.case_id,
                &self.document.document_id,
            )),
        };
        let outcome = self.services.remove_from_search_index(&request, ctx).await;
        let classification = self.classify_status(Stage::SearchIndexRemoval, outcome);

        if !classification.is_success() {
            warn!(
                "Could not remove stale index entry for document '{}' ({}), continuing",
                self.document.document_id, classification.event
            );
        }
        self.record(classification).await
    }

    async fn step_generate_pdf(&self, ctx: &CallContext) -> Result<String> {
        let request = PdfRequest::new(&self.run.case_id, &self.document);
        let outcome = self.services.generate_pdf(&request, ctx).await;
        let (classification, pdf) = self.classify_with_body(Stage::PdfGeneration, outcome);

        match (classification.action, pdf) {
            (Action::Continue, Some(pdf)) => {
                self.tracker
                    .register_pdf_blob_name(
                        self.run.run_id,
                        &self.document.document_id,
                        &pdf.blob_name,
                    )
                    .await?;
                Ok(pdf.blob_name)
            }
            _ => {
                self.record(classification).await?;
                Err(self.aborted(classification))
            }
        }
    }

    async fn step_extract_text(&self, ctx: &CallContext, blob_name: String) -> Result<()> {
        let request = ExtractionRequest {
            case_id: self.run.case_id.clone(),
            document_id: self.document.document_id.clone(),
            blob_name,
        };
        let outcome = self.services.extract_text(&request, ctx).await;
        let classification = self.classify_status(Stage::TextExtraction, outcome);

        self.record(classification).await?;
        self.check_abort(classification)
    }

    /// Classifies a call whose success must carry a body. A 2xx without one
    /// counts as no usable response.
    fn classify_with_body<T>(
        &self,
        stage: Stage,
        outcome: std::result::Result<ServiceResponse<T>, ServiceError>,
    ) -> (Classification, Option<T>) {
        match outcome {
            Ok(response) => {
                let classification = classify(stage, response.status);
                match (classification.action, classification.is_success(), response.body) {
                    (Action::Continue, true, Some(body)) => (classification, Some(body)),
                    (_, true, None) => {
                        warn!(
                            "{} returned {} without a body for document '{}'",
                            stage, response.status, self.document.document_id
                        );
                        (classify(stage, NO_RESPONSE), None)
                    }
                    (_, _, body) => (classification, body),
                }
            }
            Err(e) => {
                warn!(
                    "{} failed for document '{}': {}",
                    stage, self.document.document_id, e
                );
                (classify(stage, NO_RESPONSE), None)
            }
        }
    }

    fn classify_status(
        &self,
        stage: Stage,
        outcome: std::result::Result<ServiceResponse<()>, ServiceError>,
    ) -> Classification {
        match outcome {
            Ok(response) => classify(stage, response.status),
            Err(e) => {
                warn!(
                    "{} failed for document '{}': {}",
                    stage, self.document.document_id, e
                );
                classify(stage, NO_RESPONSE)
            }
        }
    }

    async fn record(&self, classification: Classification) -> Result<()> {
        debug_assert!(classification.event != TrackerLogType::RegisteredPdfBlobName);
        self.tracker
            .register_document_event(
                self.run.run_id,
                &self.document.document_id,
                classification.event,
            )
            .await?;
        Ok(())
    }

    fn check_abort(&self, classification: Classification) -> Result<()> {
        match classification.action {
            Action::Continue => Ok(()),
            Action::Abort => Err(self.aborted(classification)),
        }
    }

    fn aborted(&self, classification: Classification) -> WorkflowError {
        let status = classification
            .status()
            .unwrap_or(DocumentStatus::UnexpectedFailure);
        warn!(
            "Document '{}' in case '{}' aborted: {}",
            self.document.document_id, self.run.case_id, status
        );
        WorkflowError::Document {
            case_id: self.run.case_id.clone(),
            document_id: self.document.document_id.clone(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::Credential;
    use crate::tracker::{TrackerError, TrackerRegistry};
    use crate::workflow::fakes::{document, FakeDocumentServices, TRANSPORT_ERROR};

    struct Harness {
        tracker: Arc<CaseTracker>,
        run: RunContext,
    }

    async fn harness(ids: &[&str]) -> Harness {
        let registry = TrackerRegistry::open(Database::open_in_memory().unwrap());
        let tracker = registry.tracker("case-1").await.unwrap();
        let run_id = tracker.initialise("corr-1").await.unwrap();
        let documents: Vec<_> = ids.iter().map(|id| document(id)).collect();
        tracker.register_document_ids(run_id, &documents).await.unwrap();
        Harness {
            tracker,
            run: RunContext {
                case_id: "case-1".to_string(),
                correlation_id: "corr-1".to_string(),
                credential: Credential::new("token"),
                run_id,
            },
        }
    }

    impl Harness {
        fn workflow(
            &self,
            id: &str,
            services: &Arc<FakeDocumentServices>,
            evaluation_enabled: bool,
        ) -> DocumentWorkflow {
            let services: Arc<dyn DocumentServices> = services.clone();
            DocumentWorkflow::new(
                self.run.clone(),
                document(id),
                Arc::clone(&self.tracker),
                services,
                evaluation_enabled,
            )
        }

        async fn status(&self, id: &str) -> DocumentStatus {
            self.tracker.document(id).await.unwrap().status
        }

        async fn log_types(&self) -> Vec<TrackerLogType> {
            self.tracker
                .snapshot()
                .await
                .logs
                .iter()
                .map(|l| l.log_type)
                .collect()
        }
    }

    fn abort_status(result: Result<()>) -> DocumentStatus {
        match result {
            Err(WorkflowError::Document { status, .. }) => status,
            other => panic!("expected document abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_legacy_path_converts_and_indexes() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new());

        h.workflow("a", &services, false).run().await.unwrap();

        assert_eq!(h.status("a").await, DocumentStatus::Indexed);
        assert!(services.calls("evaluate").is_empty());
        assert_eq!(services.calls("pdf"), vec!["a"]);
        assert_eq!(services.calls("extract"), vec!["a"]);
        let record = h.tracker.document("a").await.unwrap();
        assert_eq!(record.pdf_blob_name.as_deref(), Some("case-1/pdfs/a.pdf"));
    }

    #[tokio::test]
    async fn test_unchanged_document_skips_conversion() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new().evaluation_result(
            "a",
            EvaluationResult::DocumentUnchanged,
            false,
        ));

        h.workflow("a", &services, true).run().await.unwrap();

        assert_eq!(h.status("a").await, DocumentStatus::Indexed);
        assert!(services.calls("pdf").is_empty());
        assert!(services.calls("extract").is_empty());
        assert_eq!(
            h.log_types().await[2..],
            [TrackerLogType::DocumentEvaluated, TrackerLogType::Indexed]
        );
    }

    #[tokio::test]
    async fn test_acquire_runs_full_pipeline() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new());

        h.workflow("a", &services, true).run().await.unwrap();

        assert_eq!(
            h.log_types().await[2..],
            [
                TrackerLogType::DocumentEvaluated,
                TrackerLogType::RegisteredPdfBlobName,
                TrackerLogType::Indexed,
            ]
        );
        assert!(services.calls("remove").is_empty());
    }

    #[tokio::test]
    async fn test_stale_index_entry_removed_before_conversion() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new().evaluation_result(
            "a",
            EvaluationResult::AcquireDocument,
            true,
        ));

        h.workflow("a", &services, true).run().await.unwrap();

        assert_eq!(
            h.log_types().await[2..],
            [
                TrackerLogType::DocumentEvaluated,
                TrackerLogType::DocumentRemovedFromSearchIndex,
                TrackerLogType::RegisteredPdfBlobName,
                TrackerLogType::Indexed,
            ]
        );
    }

    #[tokio::test]
    async fn test_search_index_removal_failure_does_not_abort() {
        for (status, expected) in [
            (404, TrackerLogType::UnableToUpdateSearchIndex),
            (501, TrackerLogType::UnableToUpdateSearchIndex),
            (TRANSPORT_ERROR, TrackerLogType::UnexpectedSearchIndexRemovalFailure),
        ] {
            let h = harness(&["a"]).await;
            let services = Arc::new(
                FakeDocumentServices::new()
                    .evaluation_result("a", EvaluationResult::AcquireDocument, true)
                    .removal_status("a", status),
            );

            h.workflow("a", &services, true).run().await.unwrap();

            assert_eq!(h.log_types().await[3], expected);
            assert_eq!(h.status("a").await, DocumentStatus::Indexed);
        }
    }

    #[tokio::test]
    async fn test_evaluation_failures_abort() {
        for (status, expected) in [
            (404, DocumentStatus::NotFoundInSource),
            (501, DocumentStatus::UnableToEvaluateDocument),
            (500, DocumentStatus::UnexpectedFailure),
            (TRANSPORT_ERROR, DocumentStatus::UnexpectedFailure),
        ] {
            let h = harness(&["a"]).await;
            let services = Arc::new(FakeDocumentServices::new().evaluation_status("a", status));

            let result = h.workflow("a", &services, true).run().await;

            assert_eq!(abort_status(result), expected);
            assert_eq!(h.status("a").await, expected);
            assert!(services.calls("pdf").is_empty());
        }
    }

    #[tokio::test]
    async fn test_evaluation_success_without_body_is_unexpected() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new().evaluation_status("a", 200));

        let result = h.workflow("a", &services, true).run().await;

        assert_eq!(abort_status(result), DocumentStatus::UnexpectedFailure);
        assert_eq!(
            h.log_types().await[2],
            TrackerLogType::UnexpectedDocumentEvaluationFailure
        );
    }

    #[tokio::test]
    async fn test_pdf_failures_abort_with_one_terminal_status() {
        for (status, expected) in [
            (404, DocumentStatus::NotFoundInSource),
            (501, DocumentStatus::UnableToConvertToPdf),
            (503, DocumentStatus::UnexpectedFailure),
            (TRANSPORT_ERROR, DocumentStatus::UnexpectedFailure),
        ] {
            let h = harness(&["a"]).await;
            let services = Arc::new(FakeDocumentServices::new().pdf_status("a", status));

            let result = h.workflow("a", &services, false).run().await;

            assert_eq!(abort_status(result), expected);
            assert_eq!(h.status("a").await, expected);
            assert_eq!(h.log_types().await.len(), 3);
            assert!(services.calls("extract").is_empty());
        }
    }

    #[tokio::test]
    async fn test_extraction_failure_aborts() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new().extraction_status("a", 500));

        let result = h.workflow("a", &services, false).run().await;

        assert_eq!(abort_status(result), DocumentStatus::OcrAndIndexFailure);
        let record = h.tracker.document("a").await.unwrap();
        assert_eq!(record.status, DocumentStatus::OcrAndIndexFailure);
        assert_eq!(record.pdf_blob_name.as_deref(), Some("case-1/pdfs/a.pdf"));
    }

    #[tokio::test]
    async fn test_terminal_document_not_reprocessed() {
        let h = harness(&["a"]).await;
        let services = Arc::new(FakeDocumentServices::new());
        h.workflow("a", &services, false).run().await.unwrap();

        h.workflow("a", &services, false).run().await.unwrap();

        assert_eq!(services.calls("pdf").len(), 1);
        assert_eq!(services.calls("extract").len(), 1);
    }

    #[tokio::test]
    async fn test_resume_after_upload_only_extracts() {
        let h = harness(&["a"]).await;
        h.tracker
            .register_pdf_blob_name(h.run.run_id, "a", "case-1/pdfs/a.pdf")
            .await
            .unwrap();
        let services = Arc::new(FakeDocumentServices::new());

        h.workflow("a", &services, true).run().await.unwrap();

        assert!(services.calls("evaluate").is_empty());
        assert!(services.calls("pdf").is_empty());
        assert_eq!(services.calls("extract"), vec!["a"]);
        assert_eq!(h.status("a").await, DocumentStatus::Indexed);
    }

    #[tokio::test]
    async fn test_superseded_run_is_rejected() {
        let h = harness(&["a"]).await;
        h.tracker.initialise("corr-2").await.unwrap();
        let services = Arc::new(FakeDocumentServices::new());

        let result = h.workflow("a", &services, false).run().await;

        assert!(matches!(
            result,
            Err(WorkflowError::Tracker(TrackerError::StaleRun { .. }))
        ));
    }

    #[test]
    fn test_resume_points() {
        let mut record = DocumentRecord::new(&document("a"));
        assert_eq!(resume_point(None), ResumePoint::Evaluate);
        assert_eq!(resume_point(Some(&record)), ResumePoint::Evaluate);

        record.status = DocumentStatus::SearchIndexUpdateFailure;
        assert_eq!(resume_point(Some(&record)), ResumePoint::Convert);

        record.status = DocumentStatus::PdfUploadedToBlob;
        record.pdf_blob_name = Some("b.pdf".to_string());
        assert_eq!(
            resume_point(Some(&record)),
            ResumePoint::Extract("b.pdf".to_string())
        );

        record.status = DocumentStatus::UnableToEvaluateDocument;
        assert_eq!(resume_point(Some(&record)), ResumePoint::Done);
    }
}
