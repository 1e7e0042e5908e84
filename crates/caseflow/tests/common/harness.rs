#![allow(dead_code)]

use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use caseflow::{load_config_from_str, CaseService, Config, Credential, StartRunRequest};

pub const TOKEN: &str = "integration-token";

pub struct TestHarness {
    temp_dir: TempDir,
    pub server: MockServer,
    pub db_path: PathBuf,
}

impl TestHarness {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("data").join("caseflow.db");
        Self {
            temp_dir,
            server: MockServer::start().await,
            db_path,
        }
    }

    pub fn config(&self, evaluation_enabled: bool) -> Config {
        let uri = self.server.uri();
        let json = json!({
            "version": "1.0",
            "services": {
                "caseData": format!("{}/casedata", uri),
                "evaluation": format!("{}/evaluation", uri),
                "pdfGenerator": format!("{}/pdf", uri),
                "textExtractor": format!("{}/ocr", uri),
                "searchIndex": format!("{}/search", uri)
            },
            "workflow": { "evaluationEnabled": evaluation_enabled },
            "http": { "connectTimeoutSecs": 2, "requestTimeoutSecs": 5 },
            "retry": { "maxRetries": 1, "baseDelayMs": 1, "maxDelayMs": 2 },
            "database": { "path": self.db_path.to_string_lossy() }
        });
        load_config_from_str(&json.to_string()).expect("Test config should be valid")
    }

    pub fn service(&self, evaluation_enabled: bool) -> CaseService {
        CaseService::from_config(&self.config(evaluation_enabled))
            .expect("Failed to build case service")
    }

    pub fn request(case_id: &str, force_refresh: bool) -> StartRunRequest {
        StartRunRequest {
            case_id: case_id.to_string(),
            force_refresh,
            credential: Credential::new(TOKEN),
        }
    }

    /// Serves the document list of a case, expecting `times` fetches.
    pub async fn mock_case_documents(&self, case_id: &str, ids: &[&str], times: u64) {
        let documents: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                json!({
                    "documentId": id,
                    "versionId": i + 1,
                    "fileName": format!("{}.docx", id),
                    "category": "Statement"
                })
            })
            .collect();

        Mock::given(method("GET"))
            .and(path(format!("/casedata/cases/{}/documents", case_id)))
            .and(header_exists("Correlation-Id"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(documents))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Makes PDF generation for one document answer `status`.
    pub async fn mock_pdf_status(&self, document_id: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path("/pdf/generate"))
            .and(body_partial_json(json!({ "documentId": document_id })))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// PDF generation succeeds for every other document.
    pub async fn mock_pdf_success(&self, case_id: &str) {
        Mock::given(method("POST"))
            .and(path("/pdf/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blobName": format!("{}/pdfs/generated.pdf", case_id)
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_extract_success(&self) {
        Mock::given(method("POST"))
            .and(path("/ocr/extract"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_evaluation(&self, document_id: &str, result: &str, update_search_index: bool) {
        Mock::given(method("POST"))
            .and(path("/evaluation/evaluate"))
            .and(body_partial_json(json!({ "documentId": document_id })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "evaluationResult": result,
                "updateSearchIndex": update_search_index
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of requests the mock server received on `route`.
    pub async fn calls_to(&self, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }
}
