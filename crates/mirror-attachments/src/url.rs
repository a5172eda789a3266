//! URL Resolution
//!
//! Read-time decision between the mirrored copy and the local file.

use std::sync::Arc;

use mirror_core::MirrorConfig;

use crate::model::{Attachment, AttachmentDefinition};
use crate::paths::{PathResolutionError, PathResolver};

/// Chooses mirror or local URLs for attachments
#[derive(Debug, Clone)]
pub struct UrlResolver {
    config: Arc<MirrorConfig>,
    paths: PathResolver,
}

impl UrlResolver {
    pub fn new(config: Arc<MirrorConfig>) -> Self {
        Self {
            paths: PathResolver::new(config.clone()),
            config,
        }
    }

    /// Public URL of `variant` (the definition's default style when None).
    ///
    /// The mirror is used only while mirroring is enabled and the attachment's
    /// content is confirmed on the mirror. Attachments without content get the
    /// default URL, which is always local.
    pub fn url(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
        variant: Option<&str>,
    ) -> Result<String, PathResolutionError> {
        let variant = variant.unwrap_or(&definition.default_style);

        if !attachment.is_present() {
            return self.paths.default_url(definition, attachment, variant);
        }

        let local = self.paths.url(definition, attachment, variant)?;
        if self.config.enabled && attachment.on_mirror {
            Ok(self.paths.mirror_url(&local))
        } else {
            Ok(local)
        }
    }

    /// URLs of every variant, `original` first
    pub fn urls(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
    ) -> Result<Vec<(String, String)>, PathResolutionError> {
        definition
            .variants()
            .into_iter()
            .map(|variant| {
                self.url(definition, attachment, Some(variant))
                    .map(|url| (variant.to_string(), url))
            })
            .collect()
    }
}
