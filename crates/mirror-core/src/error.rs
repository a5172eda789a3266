//! Core error type for Variant Mirror
//!
//! Each crate defines its own narrow error (`TransferError`,
//! `PathResolutionError`, ...) and converts into `MirrorError` at the edges.

use thiserror::Error;

use crate::config::ConfigError;

/// Umbrella error for all mirror operations
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transfer failed during {operation} of {remote_path}: {message}")]
    Transfer {
        operation: String,
        remote_path: String,
        message: String,
    },

    #[error("Path resolution failed: {0}")]
    PathResolution(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Whether the failure is expected to go away on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::Transfer { .. } | MirrorError::Store(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            MirrorError::Config(_) => "configuration_error",
            MirrorError::Transfer { .. } => "transfer_failed",
            MirrorError::PathResolution(_) => "path_resolution_failed",
            MirrorError::Store(_) => "store_error",
            MirrorError::Job(_) => "job_error",
            MirrorError::NotFound(_) => "not_found",
            MirrorError::Internal(_) => "internal_error",
        }
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;
