use thiserror::Error;

/// Errors from collaborator calls that never produced a usable response.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} returned an undecodable body: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    /// Transport failures and timeouts may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Transport { .. } | ServiceError::Timeout { .. }
        )
    }

    pub(crate) fn from_reqwest(service: &'static str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout { service }
        } else if e.is_decode() {
            ServiceError::Decode {
                service,
                message: e.to_string(),
            }
        } else {
            ServiceError::Transport {
                service,
                message: e.without_url().to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
