//! reqwest implementation of [`Http`]

use async_trait::async_trait;
use cord_core::User;
use parking_lot::RwLock;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::{Http, HttpError, HttpResult};

/// Discord REST API v10
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// REST client backed by `reqwest`
pub struct RestClient {
    http: reqwest::Client,
    api_base: String,
    token: RwLock<Option<String>>,
}

impl RestClient {
    /// Create a client for `api_base`; no token until [`Http::static_login`]
    #[must_use]
    pub fn new(api_base: impl Into<String>) -> Self {
        let user_agent = format!(
            "DiscordBot ({}, {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    /// Create a client with a token already set
    #[must_use]
    pub fn with_token(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Self::new(api_base);
        *client.token.write() = Some(token.into());
        client
    }

    /// Full URL for a route
    pub fn url(&self, route: &str) -> String {
        if route.starts_with('/') {
            format!("{}{route}", self.api_base)
        } else {
            format!("{}/{route}", self.api_base)
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().as_deref() {
            Some(token) => builder.header("Authorization", format!("Bot {token}")),
            None => builder,
        }
    }

    async fn check(response: Response) -> HttpResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(HttpError::Unauthorized);
        }

        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .json::<RateLimitBody>()
                .await
                .ok()
                .map(|body| body.retry_after)
        } else {
            None
        };
        tracing::debug!(status = status.as_u16(), retry_after = ?retry_after, "REST request failed");

        Err(HttpError::Status {
            status: status.as_u16(),
            retry_after,
        })
    }
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("api_base", &self.api_base)
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

#[async_trait]
impl Http for RestClient {
    async fn get_gateway_url(&self) -> HttpResult<String> {
        let url = self.url("/gateway");
        tracing::debug!(url = %url, "Fetching gateway URL");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|_| HttpError::GatewayNotFound)?;
        if !response.status().is_success() {
            return Err(HttpError::GatewayNotFound);
        }
        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|_| HttpError::GatewayNotFound)?;
        Ok(body.url)
    }

    async fn static_login(&self, token: &str) -> HttpResult<User> {
        let previous = self.token.write().replace(token.to_string());

        match self.request(Method::GET, "/users/@me", None).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(err) => {
                *self.token.write() = previous;
                Err(err)
            }
        }
    }

    async fn request(&self, method: Method, route: &str, body: Option<Value>) -> HttpResult<Value> {
        let url = self.url(route);
        tracing::trace!(method = %method, url = %url, "REST request");

        let mut builder = self.authorized(self.http.request(method, &url));
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = Self::check(builder.send().await?).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_routes() {
        let client = RestClient::new("https://discord.com/api/v10/");
        assert_eq!(client.url("/gateway"), "https://discord.com/api/v10/gateway");
        assert_eq!(
            client.url("channels/1/messages/2"),
            "https://discord.com/api/v10/channels/1/messages/2"
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let client = RestClient::with_token(DEFAULT_API_BASE, "secret");
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("has_token: true"));
    }

    #[tokio::test]
    async fn test_gateway_lookup_against_unreachable_host_is_not_found() {
        let client = RestClient::new("http://127.0.0.1:1/api/v10");
        let err = client.get_gateway_url().await.unwrap_err();
        assert!(matches!(err, HttpError::GatewayNotFound));
    }
}
