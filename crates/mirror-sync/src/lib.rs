//! # mirror-sync
//!
//! Keeps attachment variants mirrored on a remote host.
//!
//! ## Features
//!
//! - Per-attachment mirror status (`on_mirror`) with a fail-safe lifecycle
//! - The sync protocol: purge and re-create remote directories, upload every
//!   variant, commit or roll the flag back
//! - Inline or deferred (background job) execution
//!
//! ## Example
//!
//! ```rust,ignore
//! use mirror_sync::{MemoryMirrorStatusStore, MirrorSyncEngine};
//! use mirror_transfer::SshTransport;
//!
//! let engine = MirrorSyncEngine::new(config.clone(), store, Arc::new(SshTransport::new(config)))
//!     .register("User", avatar.clone());
//!
//! engine.assign_file(&mut attachment, "photo.jpg", 2048, None);
//! // ... variants generated ...
//! engine.enable(&mut attachment);
//! store.persist(&attachment).await?;
//! engine.after_save(&avatar, &mut attachment).await;
//! ```

pub mod engine;
pub mod jobs;
pub mod store;

pub use engine::{
    MirrorSyncEngine, MirrorSyncHandler, SkipReason, SyncError, SyncPlan, SyncReport, SyncState,
    TriggerOutcome, MIRROR_QUEUE, MIRROR_SYNC_JOB,
};
pub use jobs::{Job, JobError, JobHandler, JobQueue, JobStatus, JobWorker, MemoryJobQueue};
pub use store::{MemoryMirrorStatusStore, MirrorStatusStore, StoreError, StoreResult};
