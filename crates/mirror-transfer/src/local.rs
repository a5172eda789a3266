//! Local directory transport
//!
//! Treats a local directory as the remote host's filesystem root. Useful for
//! development and for exercising the real filesystem in tests.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use crate::transport::{RemoteSession, RemoteTransport, TransferError, TransferOp, TransferResult};

/// Mirrors into a directory on this machine
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RemoteTransport for LocalTransport {
    async fn open(&self) -> TransferResult<Box<dyn RemoteSession>> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| TransferError::io(TransferOp::Connect, self.root.display().to_string(), e))?;

        Ok(Box::new(LocalSession {
            root: self.root.clone(),
        }))
    }

    fn name(&self) -> &str {
        "local"
    }
}

struct LocalSession {
    root: PathBuf,
}

impl LocalSession {
    /// Map a remote path under the root, refusing traversal
    fn resolve(&self, operation: TransferOp, remote_path: &str) -> TransferResult<PathBuf> {
        if remote_path.split('/').any(|part| part == "..") {
            return Err(TransferError::new(
                operation,
                remote_path,
                "path traversal not allowed",
            ));
        }
        Ok(self.root.join(remote_path.trim_start_matches('/')))
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    #[instrument(skip(self), fields(transport = "local"))]
    async fn ensure_dir(&mut self, path: &str) -> TransferResult<()> {
        let dir = self.resolve(TransferOp::EnsureDir, path)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransferError::io(TransferOp::EnsureDir, path, e))
    }

    #[instrument(skip(self), fields(transport = "local"))]
    async fn purge_dir(&mut self, path: &str) -> TransferResult<()> {
        let dir = self.resolve(TransferOp::PurgeDir, path)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(TransferError::io(TransferOp::PurgeDir, path, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TransferError::io(TransferOp::PurgeDir, path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| TransferError::io(TransferOp::PurgeDir, path, e))?;
            if file_type.is_dir() {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => debug!(file = ?entry.path(), "Purged"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TransferError::io(TransferOp::PurgeDir, path, e)),
            }
        }

        Ok(())
    }

    #[instrument(skip(self), fields(transport = "local"))]
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransferResult<()> {
        let target = self.resolve(TransferOp::Upload, remote_path)?;
        fs::copy(local_path, &target)
            .await
            .map_err(|e| TransferError::io(TransferOp::Upload, remote_path, e))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> TransferResult<()> {
        Ok(())
    }
}
