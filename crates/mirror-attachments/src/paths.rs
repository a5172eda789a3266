//! Path Resolution
//!
//! Turns an attachment and a variant name into its local URL, local file,
//! remote file and mirrored URL. Everything here is a pure function of the
//! configuration and the attachment.

use std::path::PathBuf;
use std::sync::Arc;

use mirror_core::MirrorConfig;
use thiserror::Error;

use crate::model::{Attachment, AttachmentDefinition};
use crate::naming::split_extension;

/// Path resolution errors
///
/// These point at a broken declaration or a caller bug, not at a transient
/// condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathResolutionError {
    #[error("Unknown interpolation :{token} in template '{template}'")]
    UnknownToken { token: String, template: String },
    #[error("Attachment '{attachment}' has no variant '{variant}'")]
    UnknownVariant { attachment: String, variant: String },
    #[error("No file attached to {0}")]
    MissingFile(String),
}

impl From<PathResolutionError> for mirror_core::MirrorError {
    fn from(err: PathResolutionError) -> Self {
        mirror_core::MirrorError::PathResolution(err.to_string())
    }
}

/// Everything needed to mirror and serve one variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Variant name
    pub variant: String,
    /// Local URL, possibly with a cache-busting query string
    pub local_url: String,
    /// Local source file
    pub local_path: PathBuf,
    /// Destination on the remote host
    pub remote_path: String,
    /// URL of the mirrored copy
    pub public_url: String,
}

impl ResolvedPaths {
    /// Remote directory holding this variant
    pub fn remote_dir(&self) -> &str {
        remote_dir(&self.remote_path)
    }
}

/// Interpolation tokens, longest first so `:id_partition` wins over `:id`
const TOKENS: &[&str] = &[
    "id_partition",
    "local_root",
    "attachment",
    "extension",
    "basename",
    "filename",
    "class",
    "style",
    "url",
    "id",
];

/// Strip everything from the first `?` onward
pub fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Parent directory of a remote (always `/`-separated) path
pub fn remote_dir(remote_path: &str) -> &str {
    match remote_path.rfind('/') {
        Some(0) => "/",
        Some(pos) => &remote_path[..pos],
        None => ".",
    }
}

/// Join a remote base directory and a URL path
pub fn remote_join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", path)
    } else {
        format!("{}/{}", base, path)
    }
}

struct Interpolation<'a> {
    definition: &'a AttachmentDefinition,
    attachment: &'a Attachment,
    style: &'a str,
    url: Option<&'a str>,
}

/// Resolves local and remote locations of attachment variants
#[derive(Debug, Clone)]
pub struct PathResolver {
    config: Arc<MirrorConfig>,
}

impl PathResolver {
    pub fn new(config: Arc<MirrorConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    fn check_variant(
        definition: &AttachmentDefinition,
        variant: &str,
    ) -> Result<(), PathResolutionError> {
        if definition.has_variant(variant) {
            Ok(())
        } else {
            Err(PathResolutionError::UnknownVariant {
                attachment: definition.name.clone(),
                variant: variant.to_string(),
            })
        }
    }

    /// Local URL of a variant, including the `?<timestamp>` suffix when enabled
    pub fn url(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
        variant: &str,
    ) -> Result<String, PathResolutionError> {
        Self::check_variant(definition, variant)?;
        if !attachment.is_present() {
            return Err(PathResolutionError::MissingFile(attachment.key().to_string()));
        }

        let mut url = self.interpolate(
            &definition.url,
            &Interpolation {
                definition,
                attachment,
                style: variant,
                url: None,
            },
        )?;

        if definition.use_timestamp {
            if let Some(updated_at) = attachment.updated_at {
                url.push('?');
                url.push_str(&updated_at.timestamp().to_string());
            }
        }

        Ok(url)
    }

    /// URL served when nothing is attached
    pub fn default_url(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
        variant: &str,
    ) -> Result<String, PathResolutionError> {
        Self::check_variant(definition, variant)?;
        self.interpolate(
            &definition.default_url,
            &Interpolation {
                definition,
                attachment,
                style: variant,
                url: None,
            },
        )
    }

    /// Mirrored URL for a local URL
    pub fn mirror_url(&self, local_url: &str) -> String {
        let prefix = self.config.mirror_url_prefix();
        if local_url.starts_with('/') {
            format!("{}{}", prefix, local_url)
        } else {
            format!("{}/{}", prefix, local_url)
        }
    }

    /// Resolve every location of one variant
    pub fn resolve(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
        variant: &str,
    ) -> Result<ResolvedPaths, PathResolutionError> {
        let local_url = self.url(definition, attachment, variant)?;
        let url_path = strip_query(&local_url);

        let local_path = self.interpolate(
            &definition.path,
            &Interpolation {
                definition,
                attachment,
                style: variant,
                url: Some(url_path),
            },
        )?;

        Ok(ResolvedPaths {
            variant: variant.to_string(),
            remote_path: remote_join(&self.config.remote_base_path, url_path),
            public_url: self.mirror_url(&local_url),
            local_path: PathBuf::from(local_path),
            local_url,
        })
    }

    /// Resolve `original` and then every declared style
    pub fn resolve_all(
        &self,
        definition: &AttachmentDefinition,
        attachment: &Attachment,
    ) -> Result<Vec<ResolvedPaths>, PathResolutionError> {
        definition
            .variants()
            .into_iter()
            .map(|variant| self.resolve(definition, attachment, variant))
            .collect()
    }

    fn interpolate(
        &self,
        template: &str,
        ctx: &Interpolation<'_>,
    ) -> Result<String, PathResolutionError> {
        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;

        while let Some(pos) = rest.find(':') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            match TOKENS.iter().find(|t| after.starts_with(**t)) {
                Some(token) => {
                    let value = self.token_value(token, ctx).ok_or_else(|| {
                        PathResolutionError::UnknownToken {
                            token: token.to_string(),
                            template: template.to_string(),
                        }
                    })?;
                    out.push_str(&value);
                    rest = &after[token.len()..];
                }
                None if after.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                    let token: String = after
                        .chars()
                        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                        .collect();
                    return Err(PathResolutionError::UnknownToken {
                        token,
                        template: template.to_string(),
                    });
                }
                // "http://" or "host:8080"
                None => {
                    out.push(':');
                    rest = after;
                }
            }
        }
        out.push_str(rest);

        Ok(out)
    }

    fn token_value(&self, token: &str, ctx: &Interpolation<'_>) -> Option<String> {
        let file_name = ctx.attachment.file_name.as_deref().unwrap_or("");
        let (basename, extension) = split_extension(file_name);

        let value = match token {
            "class" => pluralize(&underscore(&ctx.attachment.owner_type)),
            "attachment" => pluralize(&ctx.definition.name.to_lowercase()),
            "id" => ctx.attachment.owner_id.to_string(),
            "id_partition" => id_partition(ctx.attachment.owner_id),
            "style" => ctx.style.to_string(),
            "basename" => basename.to_string(),
            "extension" => extension.to_string(),
            "filename" => file_name.to_string(),
            "local_root" => self.config.local_root.display().to_string(),
            // only meaningful inside the path template
            "url" => ctx.url?.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// `42` -> `000/000/042`
fn id_partition(id: i64) -> String {
    let padded = format!("{:09}", id);
    padded
        .as_bytes()
        .chunks(3)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `BlogPost` -> `blog_post`
fn underscore(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 4);
    for (i, c) in word.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('/') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == ':' {
            // namespaced types ("Admin::User") keep only the separator
            if !out.ends_with('/') {
                out.push('/');
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{}es", word);
    }
    format!("{}s", word)
}
