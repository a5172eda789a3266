//! Mirror Status Store
//!
//! Persistence of the attachment fields owned by the mirror. The URL side
//! only ever reads `Attachment::on_mirror`; this store is how the engine
//! writes it back to the owning record.

use std::collections::HashMap;

use async_trait::async_trait;
use mirror_attachments::Attachment;
use mirror_core::AttachmentKey;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Attachment not found: {0}")]
    NotFound(AttachmentKey),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for mirror_core::MirrorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => mirror_core::MirrorError::NotFound(key.to_string()),
            StoreError::Backend(message) => mirror_core::MirrorError::Store(message),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Attachment persistence as seen by the mirror
#[async_trait]
pub trait MirrorStatusStore: Send + Sync {
    /// Load an attachment; transient fields come back reset
    async fn fetch(&self, key: &AttachmentKey) -> StoreResult<Option<Attachment>>;

    /// Save an attachment's persisted fields
    async fn persist(&self, attachment: &Attachment) -> StoreResult<()>;

    /// Whether the attachment is currently served from the mirror
    async fn on_mirror(&self, key: &AttachmentKey) -> StoreResult<bool> {
        Ok(self
            .fetch(key)
            .await?
            .map(|a| a.on_mirror)
            .unwrap_or(false))
    }

    /// Set and persist the mirror flag
    async fn set_on_mirror(&self, key: &AttachmentKey, on_mirror: bool) -> StoreResult<()> {
        let mut attachment = self
            .fetch(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        attachment.on_mirror = on_mirror;
        self.persist(&attachment).await
    }
}

/// In-memory store for development/testing
#[derive(Default)]
pub struct MemoryMirrorStatusStore {
    attachments: RwLock<HashMap<AttachmentKey, Attachment>>,
    /// every persisted `on_mirror` value, per attachment, in order
    history: RwLock<HashMap<AttachmentKey, Vec<bool>>>,
}

impl MemoryMirrorStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values of `on_mirror` as they were persisted, oldest first
    pub async fn flag_history(&self, key: &AttachmentKey) -> Vec<bool> {
        self.history
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.attachments.read().await.len()
    }
}

#[async_trait]
impl MirrorStatusStore for MemoryMirrorStatusStore {
    async fn fetch(&self, key: &AttachmentKey) -> StoreResult<Option<Attachment>> {
        let attachments = self.attachments.read().await;
        Ok(attachments.get(key).cloned().map(|mut a| {
            a.sync_pending = false;
            a
        }))
    }

    async fn persist(&self, attachment: &Attachment) -> StoreResult<()> {
        let key = attachment.key();
        self.history
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(attachment.on_mirror);

        let mut attachments = self.attachments.write().await;
        attachments.insert(key, attachment.clone());
        Ok(())
    }
}
