//! Client error types

use cord_common::ConfigError;
use cord_gateway::GatewayError;
use cord_http::HttpError;
use thiserror::Error;

use crate::dispatcher::WaitError;

/// Errors returned by the [`Client`](crate::Client) API
#[derive(Debug, Error)]
pub enum ClientError {
    /// The token was rejected by `static_login`
    #[error("improper token has been passed")]
    LoginFailure,

    /// `connect` was called before `login`
    #[error("client is not logged in")]
    NotLoggedIn,

    /// The operation needs a running gateway connection
    #[error("client is not connected to the gateway")]
    NotConnected,

    #[error("client is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ClientError {
    /// Whether this error ends the client for good
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::LoginFailure => true,
            Self::Gateway(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Client result type
pub type ClientResult<T> = Result<T, ClientError>;
