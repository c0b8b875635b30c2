//! HTTP error types

use thiserror::Error;

/// Errors returned by the REST collaborator
#[derive(Debug, Error)]
pub enum HttpError {
    /// The gateway URL could not be retrieved
    #[error("gateway URL not found")]
    GatewayNotFound,

    /// The token was rejected
    #[error("improper token has been passed")]
    Unauthorized,

    /// Non-success response
    #[error("request failed with status {status}")]
    Status {
        status: u16,
        /// Seconds to wait before retrying, present on 429
        retry_after: Option<f64>,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    /// Status code of the failed response, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Result alias for HTTP operations
pub type HttpResult<T> = Result<T, HttpError>;
