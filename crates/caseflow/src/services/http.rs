//! reqwest implementations of the collaborator traits.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{Result, ServiceError};
use super::retry::RetryPolicy;
use super::{
    CallContext, CaseDataService, DocumentServices, EvaluationRequest, EvaluationResponse,
    ExtractionRequest, PdfRequest, PdfResponse, RemovalRequest, ServiceResponse,
    CORRELATION_ID_HEADER,
};
use crate::config::{HttpConfig, ServicesConfig};
use crate::sanitize::redact_url;
use crate::tracker::types::CaseDocument;

const CASE_DATA: &str = "case data";
const EVALUATION: &str = "evaluation";
const PDF_GENERATOR: &str = "pdf generation";
const TEXT_EXTRACTOR: &str = "text extraction";
const SEARCH_INDEX: &str = "search index removal";

/// Creates the shared client with the configured timeouts.
pub fn create_http_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ServiceError::ClientBuild(e.to_string()))
}

/// Appends path segments to a base URL, percent-encoding each one.
fn endpoint(service: &'static str, base: &str, segments: &[&str]) -> Result<Url> {
    let invalid = |message: String| ServiceError::Transport { service, message };

    let mut url = Url::parse(base)
        .map_err(|e| invalid(format!("invalid base URL '{}': {}", redact_url(base), e)))?;
    url.path_segments_mut()
        .map_err(|_| invalid(format!("base URL '{}' cannot have a path", redact_url(base))))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn authorize(request: RequestBuilder, ctx: &CallContext) -> RequestBuilder {
    request
        .bearer_auth(ctx.credential.expose())
        .header(CORRELATION_ID_HEADER, &ctx.correlation_id)
}

async fn send(service: &'static str, request: RequestBuilder) -> Result<reqwest::Response> {
    request
        .send()
        .await
        .map_err(|e| ServiceError::from_reqwest(service, e))
}

/// Decodes the body of a 2xx response. Other statuses carry no body.
async fn decode<T: DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<ServiceResponse<T>> {
    let status = response.status().as_u16();
    if !response.status().is_success() {
        return Ok(ServiceResponse::empty(status));
    }

    let body = response
        .json::<T>()
        .await
        .map_err(|e| ServiceError::Decode {
            service,
            message: e.without_url().to_string(),
        })?;
    Ok(ServiceResponse {
        status,
        body: Some(body),
    })
}

/// Case-management system client.
pub struct HttpCaseDataService {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpCaseDataService {
    pub fn new(client: Client, base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
        }
    }
}

#[async_trait]
impl CaseDataService for HttpCaseDataService {
    async fn list_documents(
        &self,
        case_id: &str,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<Vec<CaseDocument>>> {
        let url = endpoint(CASE_DATA, &self.base_url, &["cases", case_id, "documents"])?;
        debug!("Fetching documents for case '{}' from {}", case_id, redact_url(url.as_str()));

        let client = &self.client;
        let url = &url;
        self.retry
            .run(CASE_DATA, move || async move {
                let response = send(CASE_DATA, authorize(client.get(url.clone()), ctx)).await?;
                decode(CASE_DATA, response).await
            })
            .await
    }
}

/// Evaluation, PDF generation, text extraction and search-index clients
/// sharing one connection pool.
pub struct HttpDocumentServices {
    client: Client,
    services: ServicesConfig,
    retry: RetryPolicy,
}

impl HttpDocumentServices {
    pub fn new(client: Client, services: ServicesConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            services,
            retry,
        }
    }

    async fn post_json<B, T>(
        &self,
        service: &'static str,
        url: Url,
        body: &B,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let client = &self.client;
        let url = &url;
        self.retry
            .run(service, move || async move {
                let request = authorize(client.post(url.clone()), ctx).json(body);
                decode(service, send(service, request).await?).await
            })
            .await
    }

    /// POSTs and keeps only the status code.
    async fn post_status<B>(
        &self,
        service: &'static str,
        url: Url,
        body: &B,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<()>>
    where
        B: Serialize + Sync,
    {
        let client = &self.client;
        let url = &url;
        self.retry
            .run(service, move || async move {
                let request = authorize(client.post(url.clone()), ctx).json(body);
                let response = send(service, request).await?;
                Ok(ServiceResponse::empty(response.status().as_u16()))
            })
            .await
    }
}

#[async_trait]
impl DocumentServices for HttpDocumentServices {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<EvaluationResponse>> {
        let url = endpoint(EVALUATION, &self.services.evaluation, &["evaluate"])?;
        self.post_json(EVALUATION, url, request, ctx).await
    }

    async fn generate_pdf(
        &self,
        request: &PdfRequest,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<PdfResponse>> {
        let url = endpoint(PDF_GENERATOR, &self.services.pdf_generator, &["generate"])?;
        self.post_json(PDF_GENERATOR, url, request, ctx).await
    }

    async fn extract_text(
        &self,
        request: &ExtractionRequest,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<()>> {
        let url = endpoint(TEXT_EXTRACTOR, &self.services.text_extractor, &["extract"])?;
        self.post_status(TEXT_EXTRACTOR, url, request, ctx).await
    }

    async fn remove_from_search_index(
        &self,
        request: &RemovalRequest,
        ctx: &CallContext,
    ) -> Result<ServiceResponse<()>> {
        let url = endpoint(SEARCH_INDEX, &self.services.search_index, &["remove"])?;
        self.post_status(SEARCH_INDEX, url, request, ctx).await
    }
}
