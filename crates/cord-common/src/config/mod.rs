//! Configuration structs

mod client_config;

pub use client_config::{ClientConfig, ConfigError, DEFAULT_API_BASE};
