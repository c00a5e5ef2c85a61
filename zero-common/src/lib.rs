//! Zero Common - Shared configuration, errors and logging for the Zero planner services.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and request tracing helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, NetworkConfig, ObservabilityConfig, PlannerServiceConfig, ServicePortConfig,
    ServicesConfig, DEFAULT_PLANNER_PORT,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
