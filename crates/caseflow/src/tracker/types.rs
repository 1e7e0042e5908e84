//! Tracker state: case status, per-document records and the audit log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic run fence for a case. Bumped by every `initialise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case-level run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    NotStarted,
    Running,
    NoDocumentsFoundInSource,
    Completed,
    Failed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::NotStarted => "NotStarted",
            CaseStatus::Running => "Running",
            CaseStatus::NoDocumentsFoundInSource => "NoDocumentsFoundInSource",
            CaseStatus::Completed => "Completed",
            CaseStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NotStarted" => Some(CaseStatus::NotStarted),
            "Running" => Some(CaseStatus::Running),
            "NoDocumentsFoundInSource" => Some(CaseStatus::NoDocumentsFoundInSource),
            "Completed" => Some(CaseStatus::Completed),
            "Failed" => Some(CaseStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    None,
    DocumentEvaluated,
    DocumentRemovedFromSearchIndex,
    UnableToEvaluateDocument,
    UnexpectedSearchIndexRemovalFailure,
    PdfUploadedToBlob,
    Indexed,
    NotFoundInSource,
    UnableToConvertToPdf,
    UnexpectedFailure,
    OcrAndIndexFailure,
    DocumentAlreadyProcessed,
    SearchIndexUpdateFailure,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::None => "None",
            DocumentStatus::DocumentEvaluated => "DocumentEvaluated",
            DocumentStatus::DocumentRemovedFromSearchIndex => "DocumentRemovedFromSearchIndex",
            DocumentStatus::UnableToEvaluateDocument => "UnableToEvaluateDocument",
            DocumentStatus::UnexpectedSearchIndexRemovalFailure => {
                "UnexpectedSearchIndexRemovalFailure"
            }
            DocumentStatus::PdfUploadedToBlob => "PdfUploadedToBlob",
            DocumentStatus::Indexed => "Indexed",
            DocumentStatus::NotFoundInSource => "NotFoundInSource",
            DocumentStatus::UnableToConvertToPdf => "UnableToConvertToPdf",
            DocumentStatus::UnexpectedFailure => "UnexpectedFailure",
            DocumentStatus::OcrAndIndexFailure => "OcrAndIndexFailure",
            DocumentStatus::DocumentAlreadyProcessed => "DocumentAlreadyProcessed",
            DocumentStatus::SearchIndexUpdateFailure => "SearchIndexUpdateFailure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let status = match s {
            "None" => DocumentStatus::None,
            "DocumentEvaluated" => DocumentStatus::DocumentEvaluated,
            "DocumentRemovedFromSearchIndex" => DocumentStatus::DocumentRemovedFromSearchIndex,
            "UnableToEvaluateDocument" => DocumentStatus::UnableToEvaluateDocument,
            "UnexpectedSearchIndexRemovalFailure" => {
                DocumentStatus::UnexpectedSearchIndexRemovalFailure
            }
            "PdfUploadedToBlob" => DocumentStatus::PdfUploadedToBlob,
            "Indexed" => DocumentStatus::Indexed,
            "NotFoundInSource" => DocumentStatus::NotFoundInSource,
            "UnableToConvertToPdf" => DocumentStatus::UnableToConvertToPdf,
            "UnexpectedFailure" => DocumentStatus::UnexpectedFailure,
            "OcrAndIndexFailure" => DocumentStatus::OcrAndIndexFailure,
            "DocumentAlreadyProcessed" => DocumentStatus::DocumentAlreadyProcessed,
            "SearchIndexUpdateFailure" => DocumentStatus::SearchIndexUpdateFailure,
            _ => return None,
        };
        Some(status)
    }

    /// Terminal statuses end a document's workflow. Once reached they are
    /// never replaced within the same run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Indexed
                | DocumentStatus::NotFoundInSource
                | DocumentStatus::UnableToConvertToPdf
                | DocumentStatus::UnexpectedFailure
                | DocumentStatus::OcrAndIndexFailure
                | DocumentStatus::UnableToEvaluateDocument
                | DocumentStatus::DocumentAlreadyProcessed
        )
    }

    /// Statuses that count towards a case-level failure.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            DocumentStatus::NotFoundInSource
                | DocumentStatus::UnableToConvertToPdf
                | DocumentStatus::UnexpectedFailure
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of tracker mutation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerLogType {
    Initialised,
    RegisteredDocumentIds,
    RegisteredPdfBlobName,
    DocumentNotFoundInSource,
    UnableToConvertDocumentToPdf,
    UnexpectedPdfDocumentFailure,
    Indexed,
    OcrAndIndexFailure,
    DocumentEvaluated,
    UnableToEvaluateDocument,
    UnexpectedDocumentEvaluationFailure,
    DocumentRemovedFromSearchIndex,
    UnableToUpdateSearchIndex,
    UnexpectedSearchIndexRemovalFailure,
    NoDocumentsFoundInSource,
    Completed,
    Failed,
}

impl TrackerLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerLogType::Initialised => "Initialised",
            TrackerLogType::RegisteredDocumentIds => "RegisteredDocumentIds",
            TrackerLogType::RegisteredPdfBlobName => "RegisteredPdfBlobName",
            TrackerLogType::DocumentNotFoundInSource => "DocumentNotFoundInSource",
            TrackerLogType::UnableToConvertDocumentToPdf => "UnableToConvertDocumentToPdf",
            TrackerLogType::UnexpectedPdfDocumentFailure => "UnexpectedPdfDocumentFailure",
            TrackerLogType::Indexed => "Indexed",
            TrackerLogType::OcrAndIndexFailure => "OcrAndIndexFailure",
            TrackerLogType::DocumentEvaluated => "DocumentEvaluated",
            TrackerLogType::UnableToEvaluateDocument => "UnableToEvaluateDocument",
            TrackerLogType::UnexpectedDocumentEvaluationFailure => {
                "UnexpectedDocumentEvaluationFailure"
            }
            TrackerLogType::DocumentRemovedFromSearchIndex => "DocumentRemovedFromSearchIndex",
            TrackerLogType::UnableToUpdateSearchIndex => "UnableToUpdateSearchIndex",
            TrackerLogType::UnexpectedSearchIndexRemovalFailure => {
                "UnexpectedSearchIndexRemovalFailure"
            }
            TrackerLogType::NoDocumentsFoundInSource => "NoDocumentsFoundInSource",
            TrackerLogType::Completed => "Completed",
            TrackerLogType::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let log_type = match s {
            "Initialised" => TrackerLogType::Initialised,
            "RegisteredDocumentIds" => TrackerLogType::RegisteredDocumentIds,
            "RegisteredPdfBlobName" => TrackerLogType::RegisteredPdfBlobName,
            "DocumentNotFoundInSource" => TrackerLogType::DocumentNotFoundInSource,
            "UnableToConvertDocumentToPdf" => TrackerLogType::UnableToConvertDocumentToPdf,
            "UnexpectedPdfDocumentFailure" => TrackerLogType::UnexpectedPdfDocumentFailure,
            "Indexed" => TrackerLogType::Indexed,
            "OcrAndIndexFailure" => TrackerLogType::OcrAndIndexFailure,
            "DocumentEvaluated" => TrackerLogType::DocumentEvaluated,
            "UnableToEvaluateDocument" => TrackerLogType::UnableToEvaluateDocument,
            "UnexpectedDocumentEvaluationFailure" => {
                TrackerLogType::UnexpectedDocumentEvaluationFailure
            }
            "DocumentRemovedFromSearchIndex" => TrackerLogType::DocumentRemovedFromSearchIndex,
            "UnableToUpdateSearchIndex" => TrackerLogType::UnableToUpdateSearchIndex,
            "UnexpectedSearchIndexRemovalFailure" => {
                TrackerLogType::UnexpectedSearchIndexRemovalFailure
            }
            "NoDocumentsFoundInSource" => TrackerLogType::NoDocumentsFoundInSource,
            "Completed" => TrackerLogType::Completed,
            "Failed" => TrackerLogType::Failed,
            _ => return None,
        };
        Some(log_type)
    }

    /// The document status a per-document log type sets, if any.
    pub fn document_status(&self) -> Option<DocumentStatus> {
        match self {
            TrackerLogType::RegisteredPdfBlobName => Some(DocumentStatus::PdfUploadedToBlob),
            TrackerLogType::DocumentNotFoundInSource => Some(DocumentStatus::NotFoundInSource),
            TrackerLogType::UnableToConvertDocumentToPdf => {
                Some(DocumentStatus::UnableToConvertToPdf)
            }
            TrackerLogType::UnexpectedPdfDocumentFailure
            | TrackerLogType::UnexpectedDocumentEvaluationFailure => {
                Some(DocumentStatus::UnexpectedFailure)
            }
            TrackerLogType::Indexed => Some(DocumentStatus::Indexed),
            TrackerLogType::OcrAndIndexFailure => Some(DocumentStatus::OcrAndIndexFailure),
            TrackerLogType::DocumentEvaluated => Some(DocumentStatus::DocumentEvaluated),
            TrackerLogType::UnableToEvaluateDocument => {
                Some(DocumentStatus::UnableToEvaluateDocument)
            }
            TrackerLogType::DocumentRemovedFromSearchIndex => {
                Some(DocumentStatus::DocumentRemovedFromSearchIndex)
            }
            TrackerLogType::UnableToUpdateSearchIndex => {
                Some(DocumentStatus::SearchIndexUpdateFailure)
            }
            TrackerLogType::UnexpectedSearchIndexRemovalFailure => {
                Some(DocumentStatus::UnexpectedSearchIndexRemovalFailure)
            }
            TrackerLogType::Initialised
            | TrackerLogType::RegisteredDocumentIds
            | TrackerLogType::NoDocumentsFoundInSource
            | TrackerLogType::Completed
            | TrackerLogType::Failed => None,
        }
    }
}

impl fmt::Display for TrackerLogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document discovered in the case-management system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDocument {
    pub document_id: String,
    pub version_id: i64,
    pub file_name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Per-document status entry inside a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub document_id: String,
    pub version_id: i64,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub pdf_blob_name: Option<String>,
    pub status: DocumentStatus,
}

impl DocumentRecord {
    pub fn new(document: &CaseDocument) -> Self {
        Self {
            document_id: document.document_id.clone(),
            version_id: document.version_id,
            file_name: document.file_name.clone(),
            category: document.category.clone(),
            pdf_blob_name: None,
            status: DocumentStatus::None,
        }
    }

    /// Rebuilds the collaborator-facing description of this document.
    pub fn to_case_document(&self) -> CaseDocument {
        CaseDocument {
            document_id: self.document_id.clone(),
            version_id: self.version_id,
            file_name: self.file_name.clone(),
            category: self.category.clone(),
        }
    }
}

/// One audit log entry. Every tracker mutation appends exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub log_type: TrackerLogType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl LogEntry {
    pub fn new(log_type: TrackerLogType, document_id: Option<&str>) -> Self {
        Self {
            log_type,
            timestamp: Utc::now(),
            document_id: document_id.map(str::to_string),
        }
    }
}

/// Complete persisted state of one case tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub case_id: String,
    pub transaction_id: Option<String>,
    pub run_id: RunId,
    pub status: CaseStatus,
    pub documents: Vec<DocumentRecord>,
    pub logs: Vec<LogEntry>,
}

impl TrackerSnapshot {
    pub fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            transaction_id: None,
            run_id: RunId(0),
            status: CaseStatus::NotStarted,
            documents: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Index of a document, matching ids case-insensitively.
    ///
    /// ASCII-only folding keeps this in step with SQLite `COLLATE NOCASE`.
    pub fn position_of(&self, document_id: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|d| d.document_id.eq_ignore_ascii_case(document_id))
    }

    pub fn all_documents_failed(&self) -> bool {
        self.documents.iter().all(|d| d.status.is_failed())
    }

    pub fn is_already_processed(&self) -> bool {
        matches!(
            self.status,
            CaseStatus::Completed | CaseStatus::NoDocumentsFoundInSource
        )
    }
}
