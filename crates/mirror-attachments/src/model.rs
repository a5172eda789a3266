//! Attachment Model
//!
//! An `AttachmentDefinition` is declared once per attachment kind (the
//! "avatar" of every user); an `Attachment` is that kind on one owning record.

use chrono::{DateTime, Utc};
use mirror_core::{AttachmentKey, Id};
use serde::{Deserialize, Serialize};

/// Name of the untouched upload, present on every attachment
pub const ORIGINAL: &str = "original";

/// Default public URL template
pub const DEFAULT_URL: &str = "/system/:attachment/:id/:style/:basename.:extension";

/// Default local path template; files live under the public root at their URL path
pub const DEFAULT_PATH: &str = ":local_root/public:url";

/// URL returned for attachments without content
pub const DEFAULT_MISSING_URL: &str = "/:attachment/:style/missing.png";

/// Declaration of one attachment kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentDefinition {
    /// Attachment name, e.g. "avatar"
    pub name: String,
    /// Derived styles in declaration order, `original` excluded
    pub styles: Vec<String>,
    /// Public URL template
    pub url: String,
    /// Local filesystem path template
    pub path: String,
    /// URL template used when nothing is attached
    pub default_url: String,
    /// Style used when the caller does not name one
    pub default_style: String,
    /// Append `?<updated_at>` to URLs
    pub use_timestamp: bool,
}

impl Default for AttachmentDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            styles: Vec::new(),
            url: DEFAULT_URL.to_string(),
            path: DEFAULT_PATH.to_string(),
            default_url: DEFAULT_MISSING_URL.to_string(),
            default_style: ORIGINAL.to_string(),
            use_timestamp: true,
        }
    }
}

impl AttachmentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Declare a derived style
    pub fn style(mut self, style: impl Into<String>) -> Self {
        let style = style.into();
        if style != ORIGINAL && !self.styles.contains(&style) {
            self.styles.push(style);
        }
        self
    }

    pub fn url(mut self, template: impl Into<String>) -> Self {
        self.url = template.into();
        self
    }

    pub fn path(mut self, template: impl Into<String>) -> Self {
        self.path = template.into();
        self
    }

    pub fn default_url(mut self, template: impl Into<String>) -> Self {
        self.default_url = template.into();
        self
    }

    pub fn default_style(mut self, style: impl Into<String>) -> Self {
        self.default_style = style.into();
        self
    }

    pub fn use_timestamp(mut self, enabled: bool) -> Self {
        self.use_timestamp = enabled;
        self
    }

    /// All variants in sync order: `original` first, then declared styles
    pub fn variants(&self) -> Vec<&str> {
        std::iter::once(ORIGINAL)
            .chain(
                self.styles
                    .iter()
                    .map(String::as_str)
                    .filter(|s| *s != ORIGINAL),
            )
            .collect()
    }

    pub fn has_variant(&self, variant: &str) -> bool {
        variant == ORIGINAL || self.styles.iter().any(|s| s == variant)
    }
}

/// One attachment on one owning record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Owning record type, e.g. "User"
    pub owner_type: String,
    /// Owning record ID
    pub owner_id: Id,
    /// Attachment name, matches `AttachmentDefinition::name`
    pub name: String,
    /// Stored filename; None when nothing is attached
    pub file_name: Option<String>,
    /// MIME content type
    pub content_type: Option<String>,
    /// File size in bytes
    pub file_size: Option<u64>,
    /// Last content change
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the mirror currently holds every variant of this content
    pub on_mirror: bool,
    /// Sync requested for after the next save; never persisted
    #[serde(skip)]
    pub sync_pending: bool,
}

impl Attachment {
    pub fn new(owner_type: impl Into<String>, owner_id: Id, name: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
            name: name.into(),
            file_name: None,
            content_type: None,
            file_size: None,
            updated_at: None,
            on_mirror: false,
            sync_pending: false,
        }
    }

    /// Attach a file without touching the mirror state
    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Record newly assigned content
    pub fn assign(&mut self, file_name: impl Into<String>, file_size: u64, content_type: Option<String>) {
        self.file_name = Some(file_name.into());
        self.file_size = Some(file_size);
        self.content_type = content_type;
        self.updated_at = Some(Utc::now());
    }

    /// Whether anything is attached
    pub fn is_present(&self) -> bool {
        self.file_name.as_deref().is_some_and(|f| !f.is_empty())
    }

    pub fn key(&self) -> AttachmentKey {
        AttachmentKey::new(&self.owner_type, self.owner_id, &self.name)
    }
}
