//! Per-case coordinator: fetches the case's documents, fans out one
//! document workflow per document, joins them and finalises the tracker.

use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tracing::{info_span, Instrument};

use crate::services::{CallContext, CaseDataService, Credential, DocumentServices};
use crate::tracker::types::{CaseDocument, CaseStatus, DocumentRecord, RunId};
use crate::tracker::{CaseTracker, TrackerRegistry};

use super::context::RunContext;
use super::document::DocumentWorkflow;
use super::error::{Result, WorkflowError};

/// Input of one coordinator run.
#[derive(Debug, Clone)]
pub struct CoordinatorRequest {
    pub case_id: String,
    pub force_refresh: bool,
    pub correlation_id: String,
    pub credential: Credential,
}

#[derive(Clone)]
pub struct CoordinatorWorkflow {
    registry: TrackerRegistry,
    case_data: Arc<dyn CaseDataService>,
    documents: Arc<dyn DocumentServices>,
    evaluation_enabled: bool,
}

impl CoordinatorWorkflow {
    pub fn new(
        registry: TrackerRegistry,
        case_data: Arc<dyn CaseDataService>,
        documents: Arc<dyn DocumentServices>,
        evaluation_enabled: bool,
    ) -> Self {
        Self {
            registry,
            case_data,
            documents,
            evaluation_enabled,
        }
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    /// Processes a case and returns its final document list.
    ///
    /// A case already Completed (or found empty) is returned as is unless
    /// `force_refresh` is set.
    pub async fn run(&self, request: CoordinatorRequest) -> Result<Vec<DocumentRecord>> {
        let span = info_span!("coordinator",
            case_id = %request.case_id,
            correlation_id = %request.correlation_id,
            force_refresh = request.force_refresh,
        );
        self.execute(request).instrument(span).await
    }

    async fn execute(&self, request: CoordinatorRequest) -> Result<Vec<DocumentRecord>> {
        let tracker = self.registry.tracker(&request.case_id).await?;

        if !request.force_refresh && tracker.is_already_processed().await {
            info!(
                "Case '{}' already processed, returning previous results",
                request.case_id
            );
            return Ok(tracker.get_documents().await);
        }

        let run_id = tracker.initialise(&request.correlation_id).await?;
        let run = RunContext {
            case_id: request.case_id,
            correlation_id: request.correlation_id,
            credential: request.credential,
            run_id,
        };

        let documents = match self.register_documents(&tracker, &run).await {
            Ok(Some(documents)) => documents,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => return Err(self.fail_run(&tracker, run_id, e).await),
        };

        self.dispatch(&tracker, &run, documents).await;
        self.finalise(&tracker, run_id).await
    }

    /// Picks up an interrupted run under its existing run id. Documents
    /// already in a terminal status are not processed again.
    pub async fn resume(
        &self,
        case_id: &str,
        correlation_id: &str,
        credential: Credential,
    ) -> Result<Vec<DocumentRecord>> {
        let span = info_span!("coordinator",
            case_id = %case_id,
            correlation_id = %correlation_id,
            resumed = true,
        );
        self.execute_resume(case_id, correlation_id, credential)
            .instrument(span)
            .await
    }

    async fn execute_resume(
        &self,
        case_id: &str,
        correlation_id: &str,
        credential: Credential,
    ) -> Result<Vec<DocumentRecord>> {
        let tracker = self.registry.tracker(case_id).await?;
        let snapshot = tracker.snapshot().await;
        if snapshot.status != CaseStatus::Running {
            debug!("Case '{}' is {}, nothing to resume", case_id, snapshot.status);
            return Ok(snapshot.documents);
        }

        let run = RunContext {
            case_id: case_id.to_string(),
            correlation_id: correlation_id.to_string(),
            credential,
            run_id: snapshot.run_id,
        };
        info!("Resuming case '{}' run {}", case_id, run.run_id);

        let documents = if snapshot.documents.is_empty() {
            // Interrupted before the document list was registered.
            match self.register_documents(&tracker, &run).await {
                Ok(Some(documents)) => documents,
                Ok(None) => return Ok(Vec::new()),
                Err(e) => return Err(self.fail_run(&tracker, run.run_id, e).await),
            }
        } else {
            snapshot
                .documents
                .iter()
                .filter(|d| !d.status.is_terminal())
                .map(DocumentRecord::to_case_document)
                .collect()
        };

        self.dispatch(&tracker, &run, documents).await;
        self.finalise(&tracker, run.run_id).await
    }

    /// Fetches and registers the document list. `None` means the case has
    /// no documents and the tracker has been finalised.
    async fn register_documents(
        &self,
        tracker: &CaseTracker,
        run: &RunContext,
    ) -> Result<Option<Vec<CaseDocument>>> {
        let ctx: CallContext = run.call_context();
        let response = self.case_data.list_documents(&run.case_id, &ctx).await?;
        let documents = match (response.is_success(), response.body) {
            (true, Some(documents)) => documents,
            _ => {
                return Err(WorkflowError::CaseDataUnavailable {
                    case_id: run.case_id.clone(),
                    status: response.status,
                })
            }
        };

        if documents.is_empty() {
            info!("No documents found for case '{}'", run.case_id);
            tracker
                .register_no_documents_found_in_source(run.run_id)
                .await?;
            return Ok(None);
        }

        tracker.register_document_ids(run.run_id, &documents).await?;
        info!(
            "Registered {} documents for case '{}'",
            documents.len(),
            run.case_id
        );
        Ok(Some(documents))
    }

    /// Runs every document workflow concurrently and waits for all of them.
    /// Child failures are already recorded on the tracker and only logged here.
    async fn dispatch(&self, tracker: &Arc<CaseTracker>, run: &RunContext, documents: Vec<CaseDocument>) {
        let handles = documents.into_iter().map(|document| {
            let workflow = DocumentWorkflow::new(
                run.clone(),
                document,
                Arc::clone(tracker),
                Arc::clone(&self.documents),
                self.evaluation_enabled,
            );
            tokio::spawn(
                async move {
                    let result = workflow.run().await;
                    (workflow.document_id().to_string(), result)
                }
                .in_current_span(),
            )
        });

        let mut failed = 0;
        for joined in join_all(handles).await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((document_id, Err(e))) => {
                    failed += 1;
                    debug!("Document '{}' finished with error: {}", document_id, e);
                }
                Err(e) => {
                    failed += 1;
                    error!("Document workflow task for case '{}' panicked: {}", run.case_id, e);
                }
            }
        }

        if failed > 0 {
            warn!(
                "{} document workflow(s) for case '{}' did not finish cleanly",
                failed, run.case_id
            );
        }
    }

    async fn finalise(&self, tracker: &CaseTracker, run_id: RunId) -> Result<Vec<DocumentRecord>> {
        if tracker.all_documents_failed().await {
            tracker.register_failed(run_id).await?;
            let count = tracker.get_documents().await.len();
            error!("All {} documents of case '{}' failed", count, tracker.case_id());
            return Err(WorkflowError::AllDocumentsFailed {
                case_id: tracker.case_id().to_string(),
                count,
            });
        }

        tracker.register_completed(run_id).await?;
        Ok(tracker.get_documents().await)
    }

    /// Marks the run failed and hands back the error that caused it.
    async fn fail_run(&self, tracker: &CaseTracker, run_id: RunId, cause: WorkflowError) -> WorkflowError {
        error!("Case '{}' run {} failed: {}", tracker.case_id(), run_id, cause);
        if let Err(e) = tracker.register_failed(run_id).await {
            error!(
                "Could not mark case '{}' as failed: {}",
                tracker.case_id(),
                e
            );
        }
        cause
    }
}
