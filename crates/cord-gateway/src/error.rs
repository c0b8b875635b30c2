//! Gateway error types

use cord_http::HttpError;
use thiserror::Error;

use crate::protocol::{CloseAction, CloseCode};
use crate::transport::TransportError;

/// Errors that end or interrupt a shard's run loop
#[derive(Debug, Error)]
pub enum GatewayError {
    // === Fatal: retrying cannot help ===
    #[error("authentication failed, the token is invalid")]
    AuthenticationFailed,

    #[error("shard {shard_id} requested privileged intents that are not enabled for the application")]
    PrivilegedIntentsRequired { shard_id: u32 },

    #[error("invalid shard")]
    InvalidShard,

    #[error("sharding is required for this many guilds")]
    ShardingRequired,

    #[error("invalid gateway API version")]
    InvalidApiVersion,

    #[error("invalid intents")]
    InvalidIntents,

    // === Transient ===
    /// The gateway closed the socket and the shard was not asked to reconnect
    #[error("gateway closed the connection (code {code:?})")]
    Closed { code: Option<u16> },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("gateway URL lookup failed: {0}")]
    Http(#[from] HttpError),

    #[error("timed out waiting for HELLO")]
    HelloTimeout,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Local ===
    /// The shard's command channel is gone
    #[error("shard is not running")]
    ShardStopped,
}

impl GatewayError {
    /// Error for a fatal close code, `None` for every other code
    pub fn from_close_code(code: u16, shard_id: u32) -> Option<Self> {
        let close = CloseCode::from_u16(code)?;
        if close.action() != CloseAction::Fatal {
            return None;
        }
        Some(match close {
            CloseCode::AuthenticationFailed => Self::AuthenticationFailed,
            CloseCode::InvalidShard => Self::InvalidShard,
            CloseCode::ShardingRequired => Self::ShardingRequired,
            CloseCode::InvalidApiVersion => Self::InvalidApiVersion,
            CloseCode::InvalidIntents => Self::InvalidIntents,
            _ => Self::PrivilegedIntentsRequired { shard_id },
        })
    }

    /// Fatal errors stop the reconnect loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::PrivilegedIntentsRequired { .. }
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
        )
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_close_codes_map_to_errors() {
        assert!(matches!(
            GatewayError::from_close_code(4004, 0),
            Some(GatewayError::AuthenticationFailed)
        ));
        assert!(matches!(
            GatewayError::from_close_code(4014, 3),
            Some(GatewayError::PrivilegedIntentsRequired { shard_id: 3 })
        ));
        assert!(matches!(
            GatewayError::from_close_code(4013, 0),
            Some(GatewayError::InvalidIntents)
        ));
    }

    #[test]
    fn test_non_fatal_close_codes_have_no_error() {
        for code in [1000, 1001, 4000, 4003, 4007, 4008, 4009, 4999] {
            assert!(GatewayError::from_close_code(code, 0).is_none(), "{code}");
        }
    }

    #[test]
    fn test_only_close_code_errors_are_fatal() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            let err = GatewayError::from_close_code(code, 0);
            assert!(err.is_some_and(|e| e.is_fatal()), "{code}");
        }
        assert!(!GatewayError::HelloTimeout.is_fatal());
        assert!(!GatewayError::Closed { code: Some(4000) }.is_fatal());
        assert!(!GatewayError::Http(HttpError::GatewayNotFound).is_fatal());
    }
}
