//! Shared utilities for the toolrelay workspace
//!
//! Logging setup and configuration file lookup used by the binaries.

pub mod config;
pub mod logging;

pub use config::{config_path, require_config};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
