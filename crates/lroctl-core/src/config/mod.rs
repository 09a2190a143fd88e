//! Configuration file for lroctl
//!
// Allow nested config module - this is intentional for the config subsystem
#![allow(clippy::module_inception)]
//!
//! Holds the defaults every wait starts from: the polling schedule, the
//! transient-failure budget, and the progress presentation style. Command
//! line flags are layered on top by the caller.
//!
//! # Features
//!
//! - Environment variable expansion in config files
//! - Platform-specific config file locations
//! - `LROCTL_CONFIG_FILE` override for the file location

pub mod config;
pub mod error;

pub use config::{CONFIG_FILE_ENV, Config, ProgressConfig};
pub use error::{ConfigError, Result};
