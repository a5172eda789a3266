//! # mirror-core
//!
//! Core types, errors, and configuration for Variant Mirror.
//!
//! This crate provides the building blocks shared by the other crates:
//! - The crate-wide error type and its stable error codes
//! - `MirrorConfig`, loaded once per process from an environment-keyed YAML file
//! - Identifier types for owning records and their attachments

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, MirrorConfig};
pub use error::*;
pub use types::*;
