//! # mirror-attachments
//!
//! Attachment model and the pure, I/O-free half of Variant Mirror.
//!
//! ## Features
//!
//! - Per-kind attachment declarations (`AttachmentDefinition`)
//! - URL/path template interpolation and remote path resolution
//! - Random filename suffixes so a re-upload never reuses a cached URL
//! - Mirror-or-local URL resolution
//!
//! ## Example
//!
//! ```rust,ignore
//! use mirror_attachments::{Attachment, AttachmentDefinition, UrlResolver};
//!
//! let avatar = AttachmentDefinition::new("avatar").style("thumb");
//! let attachment = Attachment::new("User", 42, "avatar").with_file("a.jpg");
//!
//! let urls = UrlResolver::new(config);
//! let thumb = urls.url(&avatar, &attachment, Some("thumb"))?;
//! ```

pub mod model;
pub mod naming;
pub mod paths;
pub mod url;

pub use model::{Attachment, AttachmentDefinition, ORIGINAL};
pub use naming::{randomize_file_name, split_extension};
pub use paths::{strip_query, PathResolutionError, PathResolver, ResolvedPaths};
pub use url::UrlResolver;
