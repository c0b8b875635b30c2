//! # cord-http
//!
//! The REST calls the gateway client depends on, behind the [`Http`] trait.
//! Route tables and rate-limit buckets live outside this crate; only gateway
//! discovery, token login and a generic request are exposed.

mod client;
mod error;

pub use client::RestClient;
pub use error::{HttpError, HttpResult};
pub use reqwest::Method;

use async_trait::async_trait;
use cord_core::User;
use serde_json::Value;

/// REST collaborator consumed by the gateway and the client facade
#[async_trait]
pub trait Http: Send + Sync {
    /// WebSocket URL of the gateway
    async fn get_gateway_url(&self) -> HttpResult<String>;

    /// Validate `token` and return the user it belongs to.
    ///
    /// Later requests are authorized with this token.
    async fn static_login(&self, token: &str) -> HttpResult<User>;

    /// Perform an authorized request against `route` (e.g. `/users/@me`)
    async fn request(&self, method: Method, route: &str, body: Option<Value>) -> HttpResult<Value>;
}
