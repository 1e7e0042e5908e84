pub mod broadcast;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod ingress;
pub mod sanitize;
pub mod services;
pub mod telemetry;
pub mod tracker;
pub mod workflow;

pub use broadcast::{CaseProgressBroadcaster, CaseProgressEvent};
pub use classify::{classify, Action, Classification, Stage};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{CaseflowError, ConfigError, Result};
pub use ingress::{CaseService, RunHandle, StartRunRequest};
pub use services::{CaseDataService, Credential, DocumentServices, ServiceError};
pub use telemetry::init_logging;
pub use tracker::{
    CaseDocument, CaseStatus, CaseTracker, DocumentRecord, DocumentStatus, RunId, TrackerError,
    TrackerLogType, TrackerRegistry, TrackerSnapshot,
};
pub use workflow::{CoordinatorRequest, CoordinatorWorkflow, DocumentWorkflow, WorkflowError};
