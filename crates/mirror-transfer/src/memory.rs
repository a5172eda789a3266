//! In-memory transport for testing

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::transport::{
    Operation, RemoteSession, RemoteTransport, TransferError, TransferOp, TransferResult,
};

/// Failures to inject into a `MemoryTransport`
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    /// Refuse to open sessions
    pub fail_open: bool,
    /// Fail the n-th upload attempt (1-based, counted across sessions)
    pub fail_upload_at: Option<usize>,
    /// Fail any operation on this remote path
    pub fail_path: Option<String>,
}

impl FailurePlan {
    pub fn fail_open() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn fail_upload_at(n: usize) -> Self {
        Self {
            fail_upload_at: Some(n),
            ..Default::default()
        }
    }

    pub fn fail_path(path: impl Into<String>) -> Self {
        Self {
            fail_path: Some(path.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct RemoteTree {
    dirs: BTreeSet<String>,
    /// remote path -> local source
    files: BTreeMap<String, PathBuf>,
    log: Vec<Operation>,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    released: AtomicUsize,
    uploads: AtomicUsize,
}

/// Remote tree held in memory
#[derive(Clone, Default)]
pub struct MemoryTransport {
    tree: Arc<RwLock<RemoteTree>>,
    counters: Arc<Counters>,
    failures: FailurePlan,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures(failures: FailurePlan) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    /// Pre-populate a remote file (and its directory)
    pub async fn seed_file(&self, remote_path: &str) {
        let mut tree = self.tree.write().await;
        tree.dirs.insert(parent(remote_path).to_string());
        tree.files
            .insert(remote_path.to_string(), PathBuf::from("<seeded>"));
    }

    pub async fn has_file(&self, remote_path: &str) -> bool {
        self.tree.read().await.files.contains_key(remote_path)
    }

    pub async fn has_dir(&self, path: &str) -> bool {
        self.tree.read().await.dirs.contains(path)
    }

    /// Local file a remote file was uploaded from
    pub async fn source_of(&self, remote_path: &str) -> Option<PathBuf> {
        self.tree.read().await.files.get(remote_path).cloned()
    }

    /// Remote files, sorted
    pub async fn files(&self) -> Vec<String> {
        self.tree.read().await.files.keys().cloned().collect()
    }

    /// Every operation applied, in order
    pub async fn operations(&self) -> Vec<Operation> {
        self.tree.read().await.log.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Sessions dropped, closed or not
    pub fn sessions_released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn open(&self) -> TransferResult<Box<dyn RemoteSession>> {
        if self.failures.fail_open {
            return Err(TransferError::new(
                TransferOp::Connect,
                "memory",
                "connection refused",
            ));
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            tree: self.tree.clone(),
            counters: self.counters.clone(),
            failures: self.failures.clone(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemorySession {
    tree: Arc<RwLock<RemoteTree>>,
    counters: Arc<Counters>,
    failures: FailurePlan,
}

impl MemorySession {
    fn check_path(&self, operation: TransferOp, path: &str) -> TransferResult<()> {
        match &self.failures.fail_path {
            Some(failing) if failing == path => Err(TransferError::new(
                operation,
                path,
                "injected failure",
            )),
            _ => Ok(()),
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn ensure_dir(&mut self, path: &str) -> TransferResult<()> {
        self.check_path(TransferOp::EnsureDir, path)?;

        let mut tree = self.tree.write().await;
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            tree.dirs.insert(current.clone());
        }
        tree.log.push(Operation::ensure_dir(path));
        Ok(())
    }

    async fn purge_dir(&mut self, path: &str) -> TransferResult<()> {
        self.check_path(TransferOp::PurgeDir, path)?;

        let mut tree = self.tree.write().await;
        tree.files.retain(|file, _| parent(file) != path);
        tree.log.push(Operation::purge_dir(path));
        Ok(())
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> TransferResult<()> {
        let attempt = self.counters.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failures.fail_upload_at == Some(attempt) {
            return Err(TransferError::new(
                TransferOp::Upload,
                remote_path,
                "injected failure",
            ));
        }
        self.check_path(TransferOp::Upload, remote_path)?;

        let mut tree = self.tree.write().await;
        if !tree.dirs.contains(parent(remote_path)) {
            return Err(TransferError::new(
                TransferOp::Upload,
                remote_path,
                "No such file or directory",
            ));
        }
        tree.files
            .insert(remote_path.to_string(), local_path.to_path_buf());
        tree.log.push(Operation::upload(local_path, remote_path));
        Ok(())
    }

    async fn close(self: Box<Self>) -> TransferResult<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(pos) => &path[..pos],
        None => ".",
    }
}
