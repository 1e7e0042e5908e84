//! Collaborator contracts: case data, evaluation, PDF generation, text
//! extraction and search-index removal.
//!
//! Workflows only see the [`CaseDataService`] and [`DocumentServices`]
//! traits. Calls return the raw HTTP status alongside the decoded body so
//! the classification table decides what a status means, not the client.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::tracker::types::CaseDocument;

pub mod error;
pub mod http;
pub mod retry;

pub use error::ServiceError;
pub use http::{create_http_client, HttpCaseDataService, HttpDocumentServices};
pub use retry::RetryPolicy;

/// Header carrying the run's correlation id on every collaborator call.
pub const CORRELATION_ID_HEADER: &str = "Correlation-Id";

/// Caller's bearer credential. Never printed.
#[derive(Clone)]
pub struct Credential(Arc<SecretString>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(token.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Short stable hash for log correlation.
    pub fn fingerprint(&self) -> String {
        crate::sanitize::fingerprint(self.expose())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Per-call context threaded through every collaborator request.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub correlation_id: String,
    pub credential: Credential,
}

/// Status code and, for 2xx responses, the decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse<T> {
    pub status: u16,
    pub body: Option<T>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(body: T) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    /// A response with no (or an ignored) body.
    pub fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blob name the PDF generator writes for a document.
pub fn pdf_blob_name(case_id: &str, document_id: &str) -> String {
    format!("{}/pdfs/{}.pdf", case_id, document_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub case_id: String,
    pub document_id: String,
    pub version_id: i64,
    pub proposed_blob_name: String,
}

impl EvaluationRequest {
    pub fn new(case_id: &str, document: &CaseDocument) -> Self {
        Self {
            case_id: case_id.to_string(),
            document_id: document.document_id.clone(),
            version_id: document.version_id,
            proposed_blob_name: pdf_blob_name(case_id, &document.document_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationResult {
    AcquireDocument,
    DocumentUnchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub evaluation_result: EvaluationResult,
    /// The search index holds an entry for an older version.
    #[serde(default)]
    pub update_search_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfRequest {
    pub case_id: String,
    pub document_id: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub version_id: i64,
}

impl PdfRequest {
    pub fn new(case_id: &str, document: &CaseDocument) -> Self {
        Self {
            case_id: case_id.to_string(),
            document_id: document.document_id.clone(),
            file_name: document.file_name.clone(),
            category: document.category.clone(),
            version_id: document.version_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfResponse {
    pub blob_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub case_id: String,
    pub document_id: String,
    pub blob_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalRequest {
    pub case_id: String,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_name: Option<String>,
}

/// Source of a case's current document list.
#[async_trait]
pub trait CaseDataService: Send + Sync {
    async fn list_documents(
        &self,
        case_id: &str,
        ctx: &CallContext,
    ) -> error::Result<ServiceResponse<Vec<CaseDocument>>>;
}

/// Per-document collaborators used by the document workflow.
#[async_trait]
pub trait DocumentServices: Send + Sync {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        ctx: &CallContext,
    ) -> error::Result<ServiceResponse<EvaluationResponse>>;

    async fn generate_pdf(
        &self,
        request: &PdfRequest,
        ctx: &CallContext,
    ) -> error::Result<ServiceResponse<PdfResponse>>;

    async fn extract_text(
        &self,
        request: &ExtractionRequest,
        ctx: &CallContext,
    ) -> error::Result<ServiceResponse<()>>;

    async fn remove_from_search_index(
        &self,
        request: &RemovalRequest,
        ctx: &CallContext,
    ) -> error::Result<ServiceResponse<()>>;
}
