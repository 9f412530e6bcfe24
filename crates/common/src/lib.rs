//! Common utilities and types shared across the call bot crates.

#![warn(clippy::pedantic)]

/// Module for chat-protocol identifier types
pub mod types;

/// Module for logging configuration
pub mod config;

/// Module for tracing subscriber setup
pub mod logging;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for exponential backoff
pub mod retry;
