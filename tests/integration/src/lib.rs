//! Integration test utilities for the gateway client
//!
//! This crate provides an in-process mock gateway, a mock REST collaborator
//! and payload fixtures for end-to-end tests of the client.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
