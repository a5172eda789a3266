//! Transport abstraction
//!
//! Unified interface over the ways a mirror can be reached.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Kind of remote operation, carried by every `TransferError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Connect,
    EnsureDir,
    PurgeDir,
    Upload,
    Close,
}

impl TransferOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::EnsureDir => "ensure_dir",
            Self::PurgeDir => "purge_dir",
            Self::Upload => "upload",
            Self::Close => "close",
        }
    }
}

impl std::fmt::Display for TransferOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Any session, command or copy failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed for {remote_path}: {message}")]
pub struct TransferError {
    /// Operation that was attempted
    pub operation: TransferOp,
    /// Remote path (or destination for `connect`)
    pub remote_path: String,
    /// Underlying cause
    pub message: String,
}

impl TransferError {
    pub fn new(
        operation: TransferOp,
        remote_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            remote_path: remote_path.into(),
            message: message.into(),
        }
    }

    pub fn io(operation: TransferOp, remote_path: impl Into<String>, err: std::io::Error) -> Self {
        Self::new(operation, remote_path, err.to_string())
    }
}

impl From<TransferError> for mirror_core::MirrorError {
    fn from(err: TransferError) -> Self {
        mirror_core::MirrorError::Transfer {
            operation: err.operation.to_string(),
            remote_path: err.remote_path,
            message: err.message,
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// One step of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `mkdir -p`
    EnsureDir(String),
    /// Remove the files directly inside a directory
    PurgeDir(String),
    /// Copy one local file, overwriting
    Upload {
        local_path: PathBuf,
        remote_path: String,
    },
}

impl Operation {
    pub fn ensure_dir(path: impl Into<String>) -> Self {
        Self::EnsureDir(path.into())
    }

    pub fn purge_dir(path: impl Into<String>) -> Self {
        Self::PurgeDir(path.into())
    }

    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self::Upload {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }

    pub fn kind(&self) -> TransferOp {
        match self {
            Self::EnsureDir(_) => TransferOp::EnsureDir,
            Self::PurgeDir(_) => TransferOp::PurgeDir,
            Self::Upload { .. } => TransferOp::Upload,
        }
    }

    pub fn remote_path(&self) -> &str {
        match self {
            Self::EnsureDir(path) | Self::PurgeDir(path) => path,
            Self::Upload { remote_path, .. } => remote_path,
        }
    }

    /// Run this operation on an open session
    pub async fn apply(&self, session: &mut dyn RemoteSession) -> TransferResult<()> {
        match self {
            Self::EnsureDir(path) => session.ensure_dir(path).await,
            Self::PurgeDir(path) => session.purge_dir(path).await,
            Self::Upload {
                local_path,
                remote_path,
            } => session.upload(local_path, remote_path).await,
        }
    }
}

/// An open, authenticated session to the mirror.
///
/// Dropping a session without `close` must still release it.
#[async_trait]
pub trait RemoteSession: Send {
    /// Create a directory and its parents; succeeds if it already exists
    async fn ensure_dir(&mut self, path: &str) -> TransferResult<()>;

    /// Remove the files directly inside `path`; succeeds on empty or missing directories
    async fn purge_dir(&mut self, path: &str) -> TransferResult<()>;

    /// Copy one local file to `remote_path`, overwriting
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransferResult<()>;

    /// Release the session
    async fn close(self: Box<Self>) -> TransferResult<()>;
}

/// Opens sessions to a mirror
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Open a new session; sessions are never shared
    async fn open(&self) -> TransferResult<Box<dyn RemoteSession>>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Run `operations` in order inside one session.
///
/// The session is closed on success and on error; a failure to close after
/// every operation succeeded is logged, not returned. If the returned future
/// is dropped the session is released by its `Drop`.
#[instrument(skip(transport, operations), fields(transport = transport.name(), operations = operations.len()))]
pub async fn with_session<T>(transport: &T, operations: &[Operation]) -> TransferResult<()>
where
    T: RemoteTransport + ?Sized,
{
    let mut session = transport.open().await?;

    let mut result = Ok(());
    for operation in operations {
        debug!(op = %operation.kind(), remote_path = operation.remote_path(), "Transfer operation");
        if let Err(e) = operation.apply(session.as_mut()).await {
            result = Err(e);
            break;
        }
    }

    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close transfer session");
    }

    result
}
