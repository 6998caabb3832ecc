//! `portbridge` Core Library
//!
//! Shared functionality for `portbridge` components:
//! - Configuration resolution and hierarchy
//! - Common error types
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
