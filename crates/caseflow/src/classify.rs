//! Maps a collaborator's HTTP outcome at a pipeline stage to the tracker
//! event to record and whether the document workflow carries on.
//!
//! This is the only place the mapping lives; every stage goes through
//! [`classify`].

use crate::tracker::types::{DocumentStatus, TrackerLogType};

/// Pipeline stage that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Evaluation,
    SearchIndexRemoval,
    PdfGeneration,
    TextExtraction,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Evaluation => "evaluation",
            Stage::SearchIndexRemoval => "search index removal",
            Stage::PdfGeneration => "pdf generation",
            Stage::TextExtraction => "text extraction",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Abort,
}

/// Result of classifying one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Event to register on the tracker.
    pub event: TrackerLogType,
    pub action: Action,
}

impl Classification {
    /// Document status the event sets.
    pub fn status(&self) -> Option<DocumentStatus> {
        self.event.document_status()
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.event,
            TrackerLogType::DocumentEvaluated
                | TrackerLogType::DocumentRemovedFromSearchIndex
                | TrackerLogType::RegisteredPdfBlobName
                | TrackerLogType::Indexed
        )
    }
}

fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

/// Classifies an HTTP status code returned at `stage`.
///
/// Transport failures and timeouts carry no status code; callers pass
/// [`NO_RESPONSE`] for those so they land in the "other" bucket.
pub fn classify(stage: Stage, status_code: u16) -> Classification {
    use TrackerLogType as T;

    let (event, action) = match (stage, status_code) {
        (Stage::Evaluation, code) if is_success(code) => (T::DocumentEvaluated, Action::Continue),
        (Stage::Evaluation, 404) => (T::DocumentNotFoundInSource, Action::Abort),
        (Stage::Evaluation, 501) => (T::UnableToEvaluateDocument, Action::Abort),
        (Stage::Evaluation, _) => (T::UnexpectedDocumentEvaluationFailure, Action::Abort),

        // Removal never aborts: the later OCR pass rewrites the index entry.
        (Stage::SearchIndexRemoval, code) if is_success(code) => {
            (T::DocumentRemovedFromSearchIndex, Action::Continue)
        }
        (Stage::SearchIndexRemoval, 404 | 501) => (T::UnableToUpdateSearchIndex, Action::Continue),
        (Stage::SearchIndexRemoval, _) => {
            (T::UnexpectedSearchIndexRemovalFailure, Action::Continue)
        }

        (Stage::PdfGeneration, code) if is_success(code) => {
            (T::RegisteredPdfBlobName, Action::Continue)
        }
        (Stage::PdfGeneration, 404) => (T::DocumentNotFoundInSource, Action::Abort),
        (Stage::PdfGeneration, 501) => (T::UnableToConvertDocumentToPdf, Action::Abort),
        (Stage::PdfGeneration, _) => (T::UnexpectedPdfDocumentFailure, Action::Abort),

        (Stage::TextExtraction, code) if is_success(code) => (T::Indexed, Action::Continue),
        (Stage::TextExtraction, _) => (T::OcrAndIndexFailure, Action::Abort),
    };

    Classification { event, action }
}

/// Status code stand-in for calls that never produced a response.
pub const NO_RESPONSE: u16 = 0;
