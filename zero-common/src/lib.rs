//! Zero Common - Shared configuration, logging and error types for Zero services.
//!
//! This crate provides:
//! - Configuration types and modular loading (`config.json` + `screener.json`)
//! - Error types and handling utilities
//! - Logging setup with noise filtering
//! - Small utility functions used across Zero services

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{Config, ObservabilityConfig};
pub use error::{Error, Result, ResultExt};
