//! Entry points for starting runs and answering status queries.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broadcast::{CaseProgressBroadcaster, CaseProgressEvent};
use crate::config::Config;
use crate::db::{default_database_path, Database};
use crate::error::{CaseflowError, ConfigError, Result};
use crate::services::{
    create_http_client, Credential, HttpCaseDataService, HttpDocumentServices, RetryPolicy,
};
use crate::tracker::types::{DocumentRecord, TrackerSnapshot};
use crate::tracker::TrackerRegistry;
use crate::workflow::{CoordinatorRequest, CoordinatorWorkflow, WorkflowError};

#[derive(Debug, Clone)]
pub struct StartRunRequest {
    pub case_id: String,
    pub force_refresh: bool,
    pub credential: Credential,
}

/// A run in progress. Dropping the handle does not cancel the run.
pub struct RunHandle {
    pub case_id: String,
    pub correlation_id: String,
    handle: JoinHandle<std::result::Result<Vec<DocumentRecord>, WorkflowError>>,
}

impl RunHandle {
    /// Waits for the coordinator and returns the case's final documents.
    pub async fn wait(self) -> Result<Vec<DocumentRecord>> {
        match self.handle.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(CaseflowError::RunAborted {
                case_id: self.case_id,
                message: e.to_string(),
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Clone)]
pub struct CaseService {
    coordinator: CoordinatorWorkflow,
}

impl CaseService {
    pub fn new(coordinator: CoordinatorWorkflow) -> Self {
        Self { coordinator }
    }

    /// Wires the database, HTTP collaborators and coordinator from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = match &config.database.path {
            Some(path) => path.clone(),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "database.path not set and no home directory found".to_string(),
            })?,
        };
        let db = Database::open(&path)?;

        let client = create_http_client(&config.http)?;
        let retry = RetryPolicy::from(&config.retry);
        let case_data = HttpCaseDataService::new(
            client.clone(),
            config.services.case_data.clone(),
            retry.clone(),
        );
        let documents = HttpDocumentServices::new(client, config.services.clone(), retry);

        let registry = TrackerRegistry::with_broadcaster(db, CaseProgressBroadcaster::default());
        Ok(Self::new(CoordinatorWorkflow::new(
            registry,
            Arc::new(case_data),
            Arc::new(documents),
            config.workflow.evaluation_enabled,
        )))
    }

    /// Starts a coordinator run on the current tokio runtime.
    pub fn start_run(&self, request: StartRunRequest) -> Result<RunHandle> {
        if request.case_id.trim().is_empty() {
            return Err(CaseflowError::InvalidRequest(
                "case id must not be empty".to_string(),
            ));
        }

        let correlation_id = Uuid::new_v4().to_string();
        info!(
            "Starting run for case '{}' (correlation {}, force_refresh={}, caller {})",
            request.case_id,
            correlation_id,
            request.force_refresh,
            request.credential.fingerprint()
        );

        let coordinator = self.coordinator.clone();
        let coordinator_request = CoordinatorRequest {
            case_id: request.case_id.clone(),
            force_refresh: request.force_refresh,
            correlation_id: correlation_id.clone(),
            credential: request.credential,
        };
        let handle = tokio::spawn(async move { coordinator.run(coordinator_request).await });

        Ok(RunHandle {
            case_id: request.case_id,
            correlation_id,
            handle,
        })
    }

    /// Latest persisted state of a case, or `None` if it never ran.
    pub async fn status(&self, case_id: &str) -> Result<Option<TrackerSnapshot>> {
        Ok(self.coordinator.registry().status(case_id).await?)
    }

    /// Live tracker mutations across all cases.
    pub fn subscribe(&self) -> broadcast::Receiver<CaseProgressEvent> {
        self.coordinator.registry().broadcaster().subscribe()
    }

    /// Resumes every case whose last run was interrupted (e.g. by a restart).
    pub fn resume_interrupted(&self, credential: Credential) -> Result<Vec<RunHandle>> {
        let case_ids = self.coordinator.registry().interrupted_cases()?;
        if !case_ids.is_empty() {
            warn!("Resuming {} interrupted case run(s)", case_ids.len());
        }

        let handles = case_ids
            .into_iter()
            .map(|case_id| {
                let correlation_id = Uuid::new_v4().to_string();
                let coordinator = self.coordinator.clone();
                let credential = credential.clone();
                let (id, corr) = (case_id.clone(), correlation_id.clone());
                let handle = tokio::spawn(async move {
                    coordinator.resume(&id, &corr, credential).await
                });
                RunHandle {
                    case_id,
                    correlation_id,
                    handle,
                }
            })
            .collect();
        Ok(handles)
    }
}
