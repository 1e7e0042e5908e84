//! In-process collaborators with scripted answers for workflow tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::services::error::Result;
use crate::services::{
    pdf_blob_name, CallContext, CaseDataService, DocumentServices, EvaluationRequest,
    EvaluationResponse, EvaluationResult, ExtractionRequest, PdfRequest, PdfResponse,
    RemovalRequest, ServiceError, ServiceResponse,
};
use crate::tracker::types::CaseDocument;

/// Status code that makes a fake fail with a transport error.
pub const TRANSPORT_ERROR: u16 = 0;

pub fn document(id: &str) -> CaseDocument {
    CaseDocument {
        document_id: id.to_string(),
        version_id: 1,
        file_name: format!("{}.docx", id),
        category: None,
    }
}

pub struct FakeCaseData {
    status: u16,
    documents: Vec<CaseDocument>,
    calls: AtomicUsize,
}

impl FakeCaseData {
    pub fn with_documents(ids: &[&str]) -> Self {
        Self {
            status: 200,
            documents: ids.iter().map(|id| document(id)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            status,
            documents: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaseDataService for FakeCaseData {
    async fn list_documents(
        &self,
        _case_id: &str,
        _ctx: &CallContext,
    ) -> Result<ServiceResponse<Vec<CaseDocument>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.status {
            TRANSPORT_ERROR => Err(ServiceError::Transport {
                service: "case data",
                message: "connection refused".to_string(),
            }),
            200 => Ok(ServiceResponse::ok(self.documents.clone())),
            status => Ok(ServiceResponse::empty(status)),
        }
    }
}

#[derive(Default)]
pub struct FakeDocumentServices {
    evaluation: HashMap<String, (u16, Option<EvaluationResponse>)>,
    pdf: HashMap<String, u16>,
    extraction: HashMap<String, u16>,
    removal: HashMap<String, u16>,
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl FakeDocumentServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluation_status(mut self, id: &str, status: u16) -> Self {
        self.evaluation.insert(id.to_string(), (status, None));
        self
    }

    pub fn evaluation_result(
        mut self,
        id: &str,
        result: EvaluationResult,
        update_search_index: bool,
    ) -> Self {
        self.evaluation.insert(
            id.to_string(),
            (
                200,
                Some(EvaluationResponse {
                    evaluation_result: result,
                    update_search_index,
                }),
            ),
        );
        self
    }

    pub fn pdf_status(mut self, id: &str, status: u16) -> Self {
        self.pdf.insert(id.to_string(), status);
        self
    }

    pub fn extraction_status(mut self, id: &str, status: u16) -> Self {
        self.extraction.insert(id.to_string(), status);
        self
    }

    pub fn removal_status(mut self, id: &str, status: u16) -> Self {
        self.removal.insert(id.to_string(), status);
        self
    }

    /// Document ids that reached `stage`, in call order.
    pub fn calls(&self, stage: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn record(&self, stage: &'static str, id: &str) {
        self.calls.lock().unwrap().push((stage, id.to_string()));
    }

    fn status_only(service: &'static str, status: u16) -> Result<ServiceResponse<()>> {
        if status == TRANSPORT_ERROR {
            return Err(ServiceError::Timeout { service });
        }
        Ok(ServiceResponse::empty(status))
    }
}

#[async_trait]
impl DocumentServices for FakeDocumentServices {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        _ctx: &CallContext,
    ) -> Result<ServiceResponse<EvaluationResponse>> {
        self.record("evaluate", &request.document_id);
        match self.evaluation.get(&request.document_id) {
            Some((TRANSPORT_ERROR, _)) => Err(ServiceError::Timeout {
                service: "evaluation",
            }),
            Some((status, body)) => Ok(ServiceResponse {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(ServiceResponse::ok(EvaluationResponse {
                evaluation_result: EvaluationResult::AcquireDocument,
                update_search_index: false,
            })),
        }
    }

    async fn generate_pdf(
        &self,
        request: &PdfRequest,
        _ctx: &CallContext,
    ) -> Result<ServiceResponse<PdfResponse>> {
        self.record("pdf", &request.document_id);
        match self.pdf.get(&request.document_id).copied().unwrap_or(200) {
            TRANSPORT_ERROR => Err(ServiceError::Transport {
                service: "pdf generation",
                message: "connection reset".to_string(),
            }),
            200 => Ok(ServiceResponse::ok(PdfResponse {
                blob_name: pdf_blob_name(&request.case_id, &request.document_id),
            })),
            status => Ok(ServiceResponse::empty(status)),
        }
    }

    async fn extract_text(
        &self,
        request: &ExtractionRequest,
        _ctx: &CallContext,
    ) -> Result<ServiceResponse<()>> {
        self.record("extract", &request.document_id);
        let status = self
            .extraction
            .get(&request.document_id)
            .copied()
            .unwrap_or(200);
        Self::status_only("text extraction", status)
    }

    async fn remove_from_search_index(
        &self,
        request: &RemovalRequest,
        _ctx: &CallContext,
    ) -> Result<ServiceResponse<()>> {
        self.record("remove", &request.document_id);
        let status = self
            .removal
            .get(&request.document_id)
            .copied()
            .unwrap_or(200);
        Self::status_only("search index removal", status)
    }
}
