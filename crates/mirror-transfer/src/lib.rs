//! # mirror-transfer
//!
//! Remote Transfer Client for Variant Mirror.
//!
//! A transport opens one authenticated session at a time; a session creates
//! directories, purges directories and uploads single files. Sessions are
//! always released, whether the work succeeds, fails or is cancelled.
//!
//! ## Transports
//!
//! - `SshTransport` - OpenSSH control master, `ssh` for commands, `scp` for copies
//! - `LocalTransport` - mirrors into a local directory (development, tests)
//! - `MemoryTransport` - in-memory remote tree with failure injection
//!
//! ## Example
//!
//! ```rust,ignore
//! use mirror_transfer::{with_session, Operation, SshTransport};
//!
//! let transport = SshTransport::new(config);
//! with_session(&transport, &[
//!     Operation::ensure_dir("/12345/assets/system/avatars/1/original"),
//!     Operation::upload("public/system/avatars/1/original/a.jpg",
//!                       "/12345/assets/system/avatars/1/original/a.jpg"),
//! ]).await?;
//! ```

pub mod local;
pub mod memory;
pub mod ssh;
pub mod transport;

pub use local::LocalTransport;
pub use memory::{FailurePlan, MemoryTransport};
pub use ssh::SshTransport;
pub use transport::{
    with_session, Operation, RemoteSession, RemoteTransport, TransferError, TransferOp,
    TransferResult,
};
