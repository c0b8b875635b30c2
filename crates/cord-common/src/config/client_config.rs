//! Client configuration
//!
//! Defaults suit a single-shard bot; `from_env` overrides them from
//! environment variables (and a `.env` file when present).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use cord_core::{Intents, MemberCachePolicy};

/// REST API root used when `DISCORD_API_BASE` is not set
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Everything the client needs to connect and cache
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bot token, without the `Bot ` prefix
    pub token: Option<String>,
    pub intents: Intents,
    pub shard_id: u32,
    pub shard_count: u32,
    /// Message cache capacity, `None` disables it
    pub max_messages: Option<usize>,
    pub member_cache: MemberCachePolicy,
    /// Idle time allowed between startup GUILD_CREATEs before `ready` fires anyway
    pub guild_ready_timeout: Duration,
    /// How long to wait for one guild's member chunks
    pub chunk_timeout: Duration,
    /// How long to wait for HELLO after the handshake
    pub hello_timeout: Duration,
    /// Pause before any IDENTIFY that is not the first one
    pub identify_delay: Duration,
    pub api_base: String,
    /// Skip the `GET /gateway` lookup and connect here
    pub gateway_url: Option<String>,
    /// Member count above which the gateway stops sending offline members (50..=250)
    pub large_threshold: u8,
    /// Emit `socket_raw_receive` for every inbound frame
    pub enable_debug_events: bool,
}

fn default_max_messages() -> Option<usize> {
    Some(1000)
}

fn default_guild_ready_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_chunk_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_hello_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_identify_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_large_threshold() -> u8 {
    250
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: None,
            intents: Intents::default(),
            shard_id: 0,
            shard_count: 1,
            max_messages: default_max_messages(),
            member_cache: MemberCachePolicy::default(),
            guild_ready_timeout: default_guild_ready_timeout(),
            chunk_timeout: default_chunk_timeout(),
            hello_timeout: default_hello_timeout(),
            identify_delay: default_identify_delay(),
            api_base: DEFAULT_API_BASE.to_string(),
            gateway_url: None,
            large_threshold: default_large_threshold(),
            enable_debug_events: false,
        }
    }
}

// Keep the token out of logs
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("intents", &self.intents)
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("max_messages", &self.max_messages)
            .field("member_cache", &self.member_cache)
            .field("guild_ready_timeout", &self.guild_ready_timeout)
            .field("chunk_timeout", &self.chunk_timeout)
            .field("hello_timeout", &self.hello_timeout)
            .field("identify_delay", &self.identify_delay)
            .field("api_base", &self.api_base)
            .field("gateway_url", &self.gateway_url)
            .field("large_threshold", &self.large_threshold)
            .field("enable_debug_events", &self.enable_debug_events)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `DISCORD_TOKEN` is missing or a variable has an
    /// unparseable value
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self::from_lookup(|name| env::var(name).ok())?;
        if config.token.is_none() {
            return Err(ConfigError::MissingVar("DISCORD_TOKEN"));
        }
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let intents = match lookup("DISCORD_INTENTS") {
            Some(raw) => Intents::parse(&raw)
                .map_err(|e| ConfigError::InvalidValue("DISCORD_INTENTS", e.to_string()))?,
            None => defaults.intents,
        };

        let max_messages = match lookup("DISCORD_MAX_MESSAGES") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("none") => None,
            Some(raw) => Some(parse("DISCORD_MAX_MESSAGES", &raw)?),
            None => defaults.max_messages,
        };

        let member_cache = match lookup("DISCORD_MEMBER_CACHE") {
            Some(raw) => raw
                .parse::<MemberCachePolicy>()
                .map_err(|e| ConfigError::InvalidValue("DISCORD_MEMBER_CACHE", e.to_string()))?,
            None => defaults.member_cache,
        };

        let large_threshold = match lookup("DISCORD_LARGE_THRESHOLD") {
            Some(raw) => {
                let value: u8 = parse("DISCORD_LARGE_THRESHOLD", &raw)?;
                if !(50..=250).contains(&value) {
                    return Err(ConfigError::InvalidValue(
                        "DISCORD_LARGE_THRESHOLD",
                        format!("{value} is outside 50..=250"),
                    ));
                }
                value
            }
            None => defaults.large_threshold,
        };

        let config = Self {
            token: lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()),
            intents,
            shard_id: optional(&lookup, "DISCORD_SHARD_ID")?.unwrap_or(defaults.shard_id),
            shard_count: optional(&lookup, "DISCORD_SHARD_COUNT")?.unwrap_or(defaults.shard_count),
            max_messages,
            member_cache,
            guild_ready_timeout: millis(&lookup, "DISCORD_GUILD_READY_TIMEOUT_MS")?
                .unwrap_or(defaults.guild_ready_timeout),
            chunk_timeout: millis(&lookup, "DISCORD_CHUNK_TIMEOUT_MS")?
                .unwrap_or(defaults.chunk_timeout),
            hello_timeout: millis(&lookup, "DISCORD_HELLO_TIMEOUT_MS")?
                .unwrap_or(defaults.hello_timeout),
            identify_delay: millis(&lookup, "DISCORD_IDENTIFY_DELAY_MS")?
                .unwrap_or(defaults.identify_delay),
            api_base: lookup("DISCORD_API_BASE").unwrap_or(defaults.api_base),
            gateway_url: lookup("DISCORD_GATEWAY_URL"),
            large_threshold,
            enable_debug_events: optional(&lookup, "DISCORD_DEBUG_EVENTS")?
                .unwrap_or(defaults.enable_debug_events),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_count == 0 {
            return Err(ConfigError::InvalidValue(
                "DISCORD_SHARD_COUNT",
                "must be at least 1".to_string(),
            ));
        }
        if self.shard_id >= self.shard_count {
            return Err(ConfigError::InvalidValue(
                "DISCORD_SHARD_ID",
                format!("{} is not below shard count {}", self.shard_id, self.shard_count),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub fn with_shard(mut self, shard_id: u32, shard_count: u32) -> Self {
        self.shard_id = shard_id;
        self.shard_count = shard_count;
        self
    }

    #[must_use]
    pub fn with_max_messages(mut self, max_messages: Option<usize>) -> Self {
        self.max_messages = max_messages;
        self
    }

    #[must_use]
    pub fn with_member_cache(mut self, policy: MemberCachePolicy) -> Self {
        self.member_cache = policy;
        self
    }

    #[must_use]
    pub fn with_guild_ready_timeout(mut self, timeout: Duration) -> Self {
        self.guild_ready_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_identify_delay(mut self, delay: Duration) -> Self {
        self.identify_delay = delay;
        self
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_debug_events(mut self, enabled: bool) -> Self {
        self.enable_debug_events = enabled;
        self
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name, e.to_string()))
}

fn optional<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name).map(|raw| parse(name, &raw)).transpose()
}

fn millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(optional::<u64, F>(lookup, name)?.map(Duration::from_millis))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
