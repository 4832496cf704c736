//! # latchkey-client
//!
//! HTTP client library for the latchkey smart-lock access system.
//!
//! Provides the [`http::HttpBackend`] implementation of the core backend
//! contract, client configuration, and logging bootstrap for the
//! `latchkey` CLI.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod config;
pub mod http;
pub mod logging;

pub use config::{ClientConfig, ConfigError, RetryConfig};
pub use http::HttpBackend;
