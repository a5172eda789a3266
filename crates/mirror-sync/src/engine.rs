//! Sync Engine
//!
//! Drives an attachment through `Enabled -> Uploading -> Committed | Failed`.
//! The mirror flag is cleared and persisted before anything touches the
//! remote host and is only set again once every variant is uploaded, so a
//! URL built at any point in between falls back to the local copy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirror_attachments::{
    randomize_file_name, Attachment, AttachmentDefinition, PathResolutionError, PathResolver,
    ResolvedPaths,
};
use mirror_core::{AttachmentKey, MirrorConfig};
use mirror_transfer::{with_session, Operation, RemoteTransport, TransferError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::jobs::{Job, JobError, JobHandler, JobQueue, JobResult};
use crate::store::{MirrorStatusStore, StoreError};

/// Job type of deferred syncs
pub const MIRROR_SYNC_JOB: &str = "mirror_sync";

/// Queue deferred syncs are placed on
pub const MIRROR_QUEUE: &str = "mirror";

/// Anything that can make `sync_asset` fail
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Path(#[from] PathResolutionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Job(#[from] JobError),
}

impl From<SyncError> for mirror_core::MirrorError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Transfer(e) => e.into(),
            SyncError::Path(e) => e.into(),
            SyncError::Store(e) => e.into(),
            SyncError::Job(e) => e.into(),
        }
    }
}

/// Where an attachment stands in the current save cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No sync requested
    Idle,
    /// New content processed, sync requested, flag cleared
    Enabled,
    /// Transfer session in progress
    Uploading,
    /// Every variant is on the mirror
    Committed,
    /// Sync aborted; served locally until the next save
    Failed,
}

/// Summary of a committed sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub key: AttachmentKey,
    pub state: SyncState,
    /// Variants uploaded, `original` first
    pub variants: Vec<String>,
    /// Distinct remote directories purged
    pub directories: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Why `after_save` did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No new content since the last sync
    NotRequested,
    /// Mirroring is switched off
    Disabled,
    /// Nothing attached
    NoContent,
}

/// Result of the post-save trigger
#[derive(Debug)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    Synced(SyncReport),
    /// Sync failed and was logged; the attachment is served locally
    Failed(SyncError),
    /// Deferred to the background queue
    Enqueued(String),
}

/// Remote work for one attachment
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Every variant, `original` first
    pub variants: Vec<ResolvedPaths>,
    /// Distinct remote directories in first-seen order
    pub directories: Vec<String>,
}

impl SyncPlan {
    pub fn build(
        resolver: &PathResolver,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
    ) -> Result<Self, PathResolutionError> {
        let variants = resolver.resolve_all(definition, attachment)?;

        let mut directories: Vec<String> = Vec::new();
        for variant in &variants {
            let dir = variant.remote_dir();
            if !directories.iter().any(|d| d == dir) {
                directories.push(dir.to_string());
            }
        }

        Ok(Self {
            variants,
            directories,
        })
    }

    /// Prepare every directory first, then upload every variant.
    ///
    /// Directories shared between variants are purged once, so no variant
    /// deletes a file uploaded for another.
    pub fn operations(&self) -> Vec<Operation> {
        let mut operations = Vec::with_capacity(self.directories.len() * 2 + self.variants.len());
        for dir in &self.directories {
            operations.push(Operation::ensure_dir(dir.as_str()));
            operations.push(Operation::purge_dir(dir.as_str()));
        }
        for variant in &self.variants {
            operations.push(Operation::upload(
                variant.local_path.clone(),
                variant.remote_path.as_str(),
            ));
        }
        operations
    }
}

/// Keeps attachments mirrored
pub struct MirrorSyncEngine<St: MirrorStatusStore, T: RemoteTransport + ?Sized> {
    config: Arc<MirrorConfig>,
    resolver: PathResolver,
    store: Arc<St>,
    transport: Arc<T>,
    jobs: Option<Arc<dyn JobQueue>>,
    /// (owner_type, attachment name) -> declaration
    definitions: HashMap<(String, String), AttachmentDefinition>,
}

impl<St: MirrorStatusStore, T: RemoteTransport + ?Sized> MirrorSyncEngine<St, T> {
    pub fn new(config: Arc<MirrorConfig>, store: Arc<St>, transport: Arc<T>) -> Self {
        Self {
            resolver: PathResolver::new(config.clone()),
            config,
            store,
            transport,
            jobs: None,
            definitions: HashMap::new(),
        }
    }

    /// Queue used when `config.deferred` is set
    pub fn with_job_queue(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Declare an attachment kind on an owner type
    pub fn register(mut self, owner_type: impl Into<String>, definition: AttachmentDefinition) -> Self {
        self.definitions
            .insert((owner_type.into(), definition.name.clone()), definition);
        self
    }

    pub fn definition(&self, owner_type: &str, name: &str) -> Option<&AttachmentDefinition> {
        self.definitions
            .get(&(owner_type.to_string(), name.to_string()))
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<St> {
        &self.store
    }

    /// Attach new content under a randomized name; returns the stored name
    pub fn assign_file(
        &self,
        attachment: &mut Attachment,
        file_name: &str,
        file_size: u64,
        content_type: Option<String>,
    ) -> String {
        let stored = randomize_file_name(file_name);
        attachment.assign(stored.clone(), file_size, content_type);
        stored
    }

    /// Request a sync after the next save, once variants are generated
    pub fn enable(&self, attachment: &mut Attachment) {
        attachment.sync_pending = true;
        attachment.on_mirror = false;
        debug!(attachment = %attachment.key(), state = ?SyncState::Enabled, "Mirror sync requested");
    }

    /// Post-save hook. Never fails the save: errors are logged and reported
    /// in the outcome.
    #[instrument(skip(self, definition, attachment), fields(attachment = %attachment.key()))]
    pub async fn after_save(
        &self,
        definition: &AttachmentDefinition,
        attachment: &mut Attachment,
    ) -> TriggerOutcome {
        if !attachment.sync_pending {
            return TriggerOutcome::Skipped(SkipReason::NotRequested);
        }
        attachment.sync_pending = false;

        if !self.config.enabled {
            debug!("Mirroring disabled, skipping sync");
            return TriggerOutcome::Skipped(SkipReason::Disabled);
        }
        if !attachment.is_present() {
            return TriggerOutcome::Skipped(SkipReason::NoContent);
        }

        if self.config.deferred {
            match &self.jobs {
                Some(queue) => {
                    return match self.enqueue(queue.as_ref(), attachment.key()).await {
                        Ok(job_id) => TriggerOutcome::Enqueued(job_id),
                        Err(e) => {
                            warn!(error = %e, "Failed to enqueue mirror sync");
                            TriggerOutcome::Failed(e.into())
                        }
                    };
                }
                None => warn!("Deferred sync configured without a job queue, syncing inline"),
            }
        }

        match self.sync_asset(definition, attachment).await {
            Ok(report) => TriggerOutcome::Synced(report),
            Err(e) => TriggerOutcome::Failed(e),
        }
    }

    async fn enqueue(&self, queue: &dyn JobQueue, key: AttachmentKey) -> JobResult<String> {
        let job = Job::with_args(MIRROR_SYNC_JOB, &key)?.queue(MIRROR_QUEUE);
        let job_id = queue.enqueue(job).await?;
        info!(job_id = %job_id, "Mirror sync enqueued");
        Ok(job_id)
    }

    /// Upload every variant of `attachment` and mark it mirrored.
    ///
    /// On error the attachment is left persisted with `on_mirror == false`
    /// and the error is returned after logging. Safe to re-run.
    #[instrument(
        skip(self, definition, attachment),
        fields(owner_id = attachment.owner_id, attachment = %definition.name)
    )]
    pub async fn sync_asset(
        &self,
        definition: &AttachmentDefinition,
        attachment: &mut Attachment,
    ) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();

        attachment.on_mirror = false;
        if let Err(e) = self.store.persist(attachment).await {
            warn!(state = ?SyncState::Failed, error = %e, "Mirror sync failed, serving locally");
            return Err(e.into());
        }

        debug!(state = ?SyncState::Uploading, transport = self.transport.name(), "Mirror sync started");
        let plan = match self.upload(definition, attachment).await {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(attachment, e).await),
        };

        attachment.on_mirror = true;
        if let Err(e) = self.store.persist(attachment).await {
            attachment.on_mirror = false;
            return Err(self.fail(attachment, e.into()).await);
        }

        let report = SyncReport {
            key: attachment.key(),
            state: SyncState::Committed,
            variants: plan.variants.iter().map(|v| v.variant.clone()).collect(),
            directories: plan.directories.len(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            variants = report.variants.len(),
            duration_ms = report.duration_ms(),
            "Mirror sync committed"
        );
        Ok(report)
    }

    async fn upload(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
    ) -> Result<SyncPlan, SyncError> {
        let plan = SyncPlan::build(&self.resolver, definition, attachment)?;
        with_session(self.transport.as_ref(), &plan.operations()).await?;
        Ok(plan)
    }

    async fn fail(&self, attachment: &mut Attachment, error: SyncError) -> SyncError {
        attachment.on_mirror = false;
        if let Err(e) = self.store.persist(attachment).await {
            warn!(error = %e, "Failed to persist mirror flag");
        }
        warn!(state = ?SyncState::Failed, error = %error, "Mirror sync failed, serving locally");
        error
    }
}

/// Runs deferred syncs from the job queue
pub struct MirrorSyncHandler<St: MirrorStatusStore, T: RemoteTransport + ?Sized> {
    engine: Arc<MirrorSyncEngine<St, T>>,
}

impl<St: MirrorStatusStore, T: RemoteTransport + ?Sized> MirrorSyncHandler<St, T> {
    pub fn new(engine: Arc<MirrorSyncEngine<St, T>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<St, T> JobHandler for MirrorSyncHandler<St, T>
where
    St: MirrorStatusStore + 'static,
    T: RemoteTransport + ?Sized + 'static,
{
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle(&self, job: &Job) -> JobResult<()> {
        let key: AttachmentKey = job.args()?;

        let definition = self
            .engine
            .definition(&key.owner_type, &key.name)
            .ok_or_else(|| JobError::Failed(format!("No attachment declared for {}", key)))?;

        let mut attachment = self
            .engine
            .store()
            .fetch(&key)
            .await
            .map_err(|e| JobError::Failed(e.to_string()))?
            .ok_or_else(|| JobError::NotFound(key.to_string()))?;

        if !attachment.is_present() {
            debug!(attachment = %key, "Content removed before sync ran");
            return Ok(());
        }

        self.engine
            .sync_asset(definition, &mut attachment)
            .await
            .map(|_| ())
            .map_err(|e| JobError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, JobWorker, MemoryJobQueue};
    use crate::store::{MemoryMirrorStatusStore, StoreResult};
    use mirror_attachments::UrlResolver;
    use mirror_transfer::{
        FailurePlan, LocalTransport, MemoryTransport, RemoteSession, TransferResult,
    };
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store whose writes always fail
    struct ReadOnlyStore;

    #[async_trait]
    impl MirrorStatusStore for ReadOnlyStore {
        async fn fetch(&self, _key: &AttachmentKey) -> StoreResult<Option<Attachment>> {
            Ok(None)
        }

        async fn persist(&self, _attachment: &Attachment) -> StoreResult<()> {
            Err(StoreError::Backend("database is read-only".into()))
        }
    }

    /// Transport whose uploads never finish
    #[derive(Default)]
    struct StalledTransport {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    struct StalledSession {
        closed: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteTransport for StalledTransport {
        async fn open(&self) -> TransferResult<Box<dyn RemoteSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StalledSession {
                closed: self.closed.clone(),
                released: self.released.clone(),
            }))
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[async_trait]
    impl RemoteSession for StalledSession {
        async fn ensure_dir(&mut self, _path: &str) -> TransferResult<()> {
            Ok(())
        }

        async fn purge_dir(&mut self, _path: &str) -> TransferResult<()> {
            Ok(())
        }

        async fn upload(&mut self, _local_path: &Path, _remote_path: &str) -> TransferResult<()> {
            std::future::pending().await
        }

        async fn close(self: Box<Self>) -> TransferResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for StalledSession {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> MirrorConfig {
        MirrorConfig {
            enabled: true,
            host: "upload.example.net".into(),
            user: "sshacs".into(),
            remote_base_path: "/12345/assets".into(),
            web_host: "http://cdn.example.net".into(),
            local_root: PathBuf::from("/srv/app"),
            ..Default::default()
        }
    }

    fn avatar() -> AttachmentDefinition {
        AttachmentDefinition::new("avatar")
            .style("thumb")
            .use_timestamp(false)
    }

    type Engine = MirrorSyncEngine<MemoryMirrorStatusStore, MemoryTransport>;

    fn engine(config: MirrorConfig, transport: MemoryTransport) -> (Engine, Arc<MemoryMirrorStatusStore>) {
        let store = Arc::new(MemoryMirrorStatusStore::new());
        let engine = MirrorSyncEngine::new(Arc::new(config), store.clone(), Arc::new(transport))
            .register("User", avatar());
        (engine, store)
    }

    fn uploaded(owner_id: i64) -> Attachment {
        let mut attachment = Attachment::new("User", owner_id, "avatar").with_file("photo_1a2b3c4d.jpg");
        attachment.sync_pending = true;
        attachment
    }

    #[tokio::test]
    async fn test_sync_avatar_with_thumb() {
        let transport = MemoryTransport::new();
        let (engine, store) = engine(config(), transport.clone());
        let definition = avatar();
        let mut attachment = uploaded(42);

        let report = engine.sync_asset(&definition, &mut attachment).await.unwrap();

        assert_eq!(report.state, SyncState::Committed);
        assert_eq!(report.variants, vec!["original", "thumb"]);
        assert_eq!(report.directories, 2);
        assert!(attachment.on_mirror);
        assert_eq!(
            transport.files().await,
            vec![
                "/12345/assets/system/avatars/42/original/photo_1a2b3c4d.jpg",
                "/12345/assets/system/avatars/42/thumb/photo_1a2b3c4d.jpg",
            ]
        );
        assert_eq!(
            transport
                .source_of("/12345/assets/system/avatars/42/thumb/photo_1a2b3c4d.jpg")
                .await,
            Some(PathBuf::from(
                "/srv/app/public/system/avatars/42/thumb/photo_1a2b3c4d.jpg"
            ))
        );
        assert_eq!(transport.sessions_opened(), 1);
        assert_eq!(transport.sessions_closed(), 1);

        let stored = store.fetch(&attachment.key()).await.unwrap().unwrap();
        assert!(stored.on_mirror);

        let urls = UrlResolver::new(Arc::new(config()));
        assert_eq!(
            urls.url(&definition, &stored, Some("thumb")).unwrap(),
            "http://cdn.example.net/12345/assets/system/avatars/42/thumb/photo_1a2b3c4d.jpg"
        );
    }

    #[tokio::test]
    async fn test_flag_cleared_before_upload() {
        let transport = MemoryTransport::new();
        let (engine, store) = engine(config(), transport);
        let mut attachment = uploaded(1);
        attachment.on_mirror = true;

        engine.sync_asset(&avatar(), &mut attachment).await.unwrap();

        assert_eq!(store.flag_history(&attachment.key()).await, vec![false, true]);
    }

    #[tokio::test]
    async fn test_second_upload_failure_serves_locally() {
        let transport = MemoryTransport::with_failures(FailurePlan::fail_upload_at(2));
        let (engine, store) = engine(config(), transport.clone());
        let definition = avatar();
        let mut attachment = uploaded(7);
        attachment.on_mirror = true;

        let err = engine.sync_asset(&definition, &mut attachment).await.unwrap_err();

        match err {
            SyncError::Transfer(e) => {
                assert_eq!(e.remote_path, "/12345/assets/system/avatars/7/thumb/photo_1a2b3c4d.jpg")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!attachment.on_mirror);
        assert_eq!(store.flag_history(&attachment.key()).await, vec![false, false]);
        assert_eq!(transport.sessions_closed(), 1);
        assert!(transport
            .has_file("/12345/assets/system/avatars/7/original/photo_1a2b3c4d.jpg")
            .await);

        let urls = UrlResolver::new(Arc::new(config()));
        assert_eq!(
            urls.url(&definition, &attachment, Some("thumb")).unwrap(),
            "/system/avatars/7/thumb/photo_1a2b3c4d.jpg"
        );
    }

    #[tokio::test]
    async fn test_unpersisted_flag_stops_before_session() {
        let transport = MemoryTransport::new();
        let engine = MirrorSyncEngine::new(
            Arc::new(config()),
            Arc::new(ReadOnlyStore),
            Arc::new(transport.clone()),
        );
        let mut attachment = uploaded(6);
        attachment.on_mirror = true;

        let err = engine.sync_asset(&avatar(), &mut attachment).await.unwrap_err();

        assert!(matches!(err, SyncError::Store(StoreError::Backend(_))));
        assert!(!attachment.on_mirror);
        assert_eq!(transport.sessions_opened(), 0);
        assert!(transport.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_sync_releases_session() {
        let transport = Arc::new(StalledTransport::default());
        let store = Arc::new(MemoryMirrorStatusStore::new());
        let engine = MirrorSyncEngine::new(Arc::new(config()), store.clone(), transport.clone());
        let mut attachment = uploaded(13);
        attachment.on_mirror = true;

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            engine.sync_asset(&avatar(), &mut attachment),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 0);
        assert!(!attachment.on_mirror);
        assert_eq!(store.flag_history(&attachment.key()).await, vec![false]);
        assert!(!store.on_mirror(&attachment.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_after_save_is_fail_open() {
        let transport = MemoryTransport::with_failures(FailurePlan::fail_open());
        let (engine, store) = engine(config(), transport);
        let mut attachment = uploaded(3);

        let outcome = engine.after_save(&avatar(), &mut attachment).await;

        assert!(matches!(outcome, TriggerOutcome::Failed(SyncError::Transfer(_))));
        assert!(!attachment.sync_pending);
        assert!(!store.on_mirror(&attachment.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_after_save_skips() {
        let transport = MemoryTransport::new();
        let (engine, _) = engine(config(), transport.clone());

        let mut untouched = Attachment::new("User", 1, "avatar").with_file("a.jpg");
        assert!(matches!(
            engine.after_save(&avatar(), &mut untouched).await,
            TriggerOutcome::Skipped(SkipReason::NotRequested)
        ));

        let mut removed = Attachment::new("User", 1, "avatar");
        removed.sync_pending = true;
        assert!(matches!(
            engine.after_save(&avatar(), &mut removed).await,
            TriggerOutcome::Skipped(SkipReason::NoContent)
        ));

        let (disabled, _) = self::engine(MirrorConfig::default(), transport.clone());
        let mut attachment = uploaded(1);
        assert!(matches!(
            disabled.after_save(&avatar(), &mut attachment).await,
            TriggerOutcome::Skipped(SkipReason::Disabled)
        ));
        assert!(!attachment.sync_pending);
        assert_eq!(transport.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_assign_enable_and_save_cycle() {
        let transport = MemoryTransport::new();
        let (engine, _) = engine(config(), transport.clone());
        let definition = avatar();
        let mut attachment = Attachment::new("User", 5, "avatar");
        attachment.on_mirror = true;

        let stored = engine.assign_file(&mut attachment, "photo.jpg", 2048, Some("image/jpeg".into()));
        assert!(stored.starts_with("photo_") && stored.ends_with(".jpg"));
        assert_eq!(stored.len(), "photo_12345678.jpg".len());
        assert_eq!(attachment.file_name.as_deref(), Some(stored.as_str()));

        engine.enable(&mut attachment);
        assert!(attachment.sync_pending);
        assert!(!attachment.on_mirror);

        match engine.after_save(&definition, &mut attachment).await {
            TriggerOutcome::Synced(report) => assert_eq!(report.key, attachment.key()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(attachment.on_mirror);

        // a second save without new content does nothing
        assert!(matches!(
            engine.after_save(&definition, &mut attachment).await,
            TriggerOutcome::Skipped(SkipReason::NotRequested)
        ));
        assert_eq!(transport.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_resync_purges_stale_files() {
        let transport = MemoryTransport::new();
        transport
            .seed_file("/12345/assets/system/avatars/9/original/old_00000000.jpg")
            .await;
        transport
            .seed_file("/12345/assets/system/avatars/9/thumb/old_00000000.jpg")
            .await;
        let (engine, _) = engine(config(), transport.clone());

        let mut attachment = uploaded(9);
        engine.sync_asset(&avatar(), &mut attachment).await.unwrap();
        // idempotent
        engine.sync_asset(&avatar(), &mut attachment).await.unwrap();

        assert_eq!(
            transport.files().await,
            vec![
                "/12345/assets/system/avatars/9/original/photo_1a2b3c4d.jpg",
                "/12345/assets/system/avatars/9/thumb/photo_1a2b3c4d.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_directory_purged_once() {
        let definition = AttachmentDefinition::new("document")
            .style("preview")
            .url("/files/:attachment/:id/:style_:basename.:extension")
            .use_timestamp(false);
        let transport = MemoryTransport::new();
        let store = Arc::new(MemoryMirrorStatusStore::new());
        let engine = MirrorSyncEngine::new(Arc::new(config()), store, Arc::new(transport.clone()));

        let mut attachment = Attachment::new("Post", 3, "document").with_file("report.pdf");
        let report = engine.sync_asset(&definition, &mut attachment).await.unwrap();
        assert_eq!(report.directories, 1);

        let dir = "/12345/assets/files/documents/3";
        assert_eq!(
            transport.operations().await,
            vec![
                Operation::ensure_dir(dir),
                Operation::purge_dir(dir),
                Operation::upload(
                    "/srv/app/public/files/documents/3/original_report.pdf",
                    format!("{dir}/original_report.pdf"),
                ),
                Operation::upload(
                    "/srv/app/public/files/documents/3/preview_report.pdf",
                    format!("{dir}/preview_report.pdf"),
                ),
            ]
        );
        assert_eq!(transport.files().await.len(), 2);
    }

    #[tokio::test]
    async fn test_timestamp_does_not_reach_remote_path() {
        let transport = MemoryTransport::new();
        let (engine, _) = engine(config(), transport.clone());
        let definition = avatar().use_timestamp(true);
        let mut attachment = uploaded(4)
            .with_updated_at(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap());

        engine.sync_asset(&definition, &mut attachment).await.unwrap();

        assert!(transport
            .has_file("/12345/assets/system/avatars/4/original/photo_1a2b3c4d.jpg")
            .await);
        let urls = UrlResolver::new(Arc::new(config()));
        assert_eq!(
            urls.url(&definition, &attachment, None).unwrap(),
            "http://cdn.example.net/12345/assets/system/avatars/4/original/photo_1a2b3c4d.jpg?1700000000"
        );
    }

    #[tokio::test]
    async fn test_missing_content_fails_without_session() {
        let transport = MemoryTransport::new();
        let (engine, store) = engine(config(), transport.clone());
        let mut attachment = Attachment::new("User", 8, "avatar");

        let err = engine.sync_asset(&avatar(), &mut attachment).await.unwrap_err();

        assert!(matches!(err, SyncError::Path(PathResolutionError::MissingFile(_))));
        assert_eq!(transport.sessions_opened(), 0);
        assert!(!store.on_mirror(&attachment.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_deferred_sync_runs_from_queue() {
        let transport = MemoryTransport::new();
        let queue = Arc::new(MemoryJobQueue::new());
        let store = Arc::new(MemoryMirrorStatusStore::new());
        let engine = Arc::new(
            MirrorSyncEngine::new(
                Arc::new(MirrorConfig {
                    deferred: true,
                    ..config()
                }),
                store.clone(),
                Arc::new(transport.clone()),
            )
            .with_job_queue(queue.clone())
            .register("User", avatar()),
        );

        let mut attachment = uploaded(11);
        store.persist(&attachment).await.unwrap();

        let job_id = match engine.after_save(&avatar(), &mut attachment).await {
            TriggerOutcome::Enqueued(job_id) => job_id,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(transport.sessions_opened(), 0);
        assert!(!store.on_mirror(&attachment.key()).await.unwrap());

        let mut worker = JobWorker::new(queue.clone(), MIRROR_QUEUE);
        worker.register(MIRROR_SYNC_JOB, MirrorSyncHandler::new(engine.clone()));
        assert_eq!(worker.drain().await.unwrap(), 1);

        let job = queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(store.on_mirror(&attachment.key()).await.unwrap());
        assert_eq!(transport.files().await.len(), 2);
    }

    #[tokio::test]
    async fn test_deferred_failure_marks_job_dead() {
        let transport = MemoryTransport::with_failures(FailurePlan::fail_upload_at(1));
        let queue = Arc::new(MemoryJobQueue::new());
        let store = Arc::new(MemoryMirrorStatusStore::new());
        let engine = Arc::new(
            MirrorSyncEngine::new(
                Arc::new(MirrorConfig {
                    deferred: true,
                    ..config()
                }),
                store.clone(),
                Arc::new(transport),
            )
            .with_job_queue(queue.clone())
            .register("User", avatar()),
        );

        let mut attachment = uploaded(12);
        store.persist(&attachment).await.unwrap();
        engine.after_save(&avatar(), &mut attachment).await;

        let mut worker = JobWorker::new(queue.clone(), MIRROR_QUEUE);
        worker.register(MIRROR_SYNC_JOB, MirrorSyncHandler::new(engine));
        worker.drain().await.unwrap();

        let jobs = queue.list(MIRROR_QUEUE, Some(JobStatus::Dead)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].error.is_some());
        assert!(!store.on_mirror(&attachment.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_to_local_directory() {
        let app = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let config = MirrorConfig {
            local_root: app.path().to_path_buf(),
            ..config()
        };

        for style in ["original", "thumb"] {
            let dir = app.path().join(format!("public/system/avatars/42/{style}"));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("photo_1a2b3c4d.jpg"), style.as_bytes()).unwrap();
        }

        let store = Arc::new(MemoryMirrorStatusStore::new());
        let engine = MirrorSyncEngine::new(
            Arc::new(config),
            store,
            Arc::new(LocalTransport::new(remote.path())),
        );

        let mut attachment = uploaded(42);
        engine.sync_asset(&avatar(), &mut attachment).await.unwrap();

        let base = remote.path().join("12345/assets/system/avatars/42");
        assert_eq!(std::fs::read(base.join("original/photo_1a2b3c4d.jpg")).unwrap(), b"original");
        assert_eq!(std::fs::read(base.join("thumb/photo_1a2b3c4d.jpg")).unwrap(), b"thumb");
        assert!(attachment.on_mirror);
    }

    #[tokio::test]
    async fn test_dyn_transport() {
        let transport: Arc<dyn RemoteTransport> = Arc::new(MemoryTransport::new());
        let engine = MirrorSyncEngine::new(
            Arc::new(config()),
            Arc::new(MemoryMirrorStatusStore::new()),
            transport,
        );

        let mut attachment = uploaded(2);
        assert!(engine.sync_asset(&avatar(), &mut attachment).await.is_ok());
    }
}
