use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaseflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    #[error("Service error: {0}")]
    Service(#[from] crate::services::ServiceError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] crate::workflow::WorkflowError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run for case '{case_id}' was cancelled or panicked: {message}")]
    RunAborted { case_id: String, message: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid URL for '{name}': '{url}' (expected an absolute http(s) URL)")]
    InvalidServiceUrl { name: &'static str, url: String },
}

pub type Result<T> = std::result::Result<T, CaseflowError>;
