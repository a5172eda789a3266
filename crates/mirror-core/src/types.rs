//! Identifier types shared across crates

use serde::{Deserialize, Serialize};

/// Primary key of an owning record
pub type Id = i64;

/// Identifies one attachment on one owning record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentKey {
    /// Owning record type, e.g. "User"
    pub owner_type: String,
    /// Owning record ID
    pub owner_id: Id,
    /// Attachment name, e.g. "avatar"
    pub name: String,
}

impl AttachmentKey {
    pub fn new(owner_type: impl Into<String>, owner_id: Id, name: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}.{}", self.owner_type, self.owner_id, self.name)
    }
}
