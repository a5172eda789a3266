//! Configuration types and loading
//!
//! The mirror configuration lives in one YAML file with one section per
//! deployment environment:
//!
//! ```yaml
//! production:
//!   enabled: true
//!   delayed_job: true
//!   scp_host: upload.example.net
//!   scp_user: sshacs
//!   key: config/keys/mirror_rsa
//!   remote_path: /12345/assets
//!   web_host: http://cdn.example.net
//! ```
//!
//! It is loaded once at startup and shared read-only as `Arc<MirrorConfig>`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment used when neither an explicit name nor `MIRROR_ENV`/`RAILS_ENV` is set
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Process-wide remote mirror configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Global switch; when false nothing is synced and every URL is local
    pub enabled: bool,
    /// Run syncs from the background job queue instead of inline
    #[serde(alias = "delayed_job")]
    pub deferred: bool,
    /// SSH/SCP host of the mirror
    #[serde(alias = "scp_host")]
    pub host: String,
    /// SSH user
    #[serde(alias = "scp_user")]
    pub user: String,
    /// Private key used to authenticate; relative paths are rooted at the app root
    #[serde(alias = "key")]
    pub key_path: Option<PathBuf>,
    /// SSH port (None = ssh default)
    pub port: Option<u16>,
    /// Base directory on the remote host, also the URL prefix on the web host
    #[serde(alias = "remote_path")]
    pub remote_base_path: String,
    /// Public host serving the mirrored files
    pub web_host: String,
    /// Known hosts file passed to ssh/scp
    pub known_hosts_file: Option<PathBuf>,
    /// Whether ssh should verify the host key
    pub strict_host_key_checking: bool,
    /// Application root; local files live under `<local_root>/public`
    pub local_root: PathBuf,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            deferred: false,
            host: String::new(),
            user: String::new(),
            key_path: None,
            port: None,
            remote_base_path: String::new(),
            web_host: String::new(),
            known_hosts_file: None,
            strict_host_key_checking: true,
            local_root: PathBuf::from("."),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("Missing value for {0}")]
    MissingValue(&'static str),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Config file error: {0}")]
    FileError(String),
    #[error("No configuration for environment '{0}'")]
    UnknownEnvironment(String),
}

impl MirrorConfig {
    /// Parse an environment-keyed YAML document and select one section.
    ///
    /// Merge keys (`<<: *defaults`) are resolved first; other sections are
    /// never deserialized, so a bad value there does not affect this one.
    pub fn from_yaml_str(yaml: &str, environment: &str) -> Result<Self, ConfigError> {
        let mut document: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::FileError(e.to_string()))?;
        document
            .apply_merge()
            .map_err(|e| ConfigError::FileError(e.to_string()))?;

        let section = document
            .get(environment)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEnvironment(environment.to_string()))?;
        if section.is_null() {
            return Ok(Self::default());
        }

        serde_yaml::from_value(section)
            .map_err(|e| ConfigError::FileError(format!("{}: {}", environment, e)))
    }

    /// Load the section for `environment` from a YAML file.
    ///
    /// A relative `key_path` is joined with `root`, and `local_root` defaults
    /// to `root` when the file does not set it.
    pub fn from_file(
        path: impl AsRef<Path>,
        environment: &str,
        root: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_yaml_str(&yaml, environment)?;
        config.root_paths(root.as_ref());

        debug!(
            path = %path.display(),
            environment = environment,
            enabled = config.enabled,
            "Mirror configuration loaded"
        );

        Ok(config)
    }

    /// Load from file, apply environment overrides and validate
    pub fn load(
        path: impl AsRef<Path>,
        environment: &str,
        root: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path, environment, root)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the environment name: explicit, then `MIRROR_ENV`, then `RAILS_ENV`
    pub fn environment_name(explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var("MIRROR_ENV").ok())
            .or_else(|| std::env::var("RAILS_ENV").ok())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    fn root_paths(&mut self, root: &Path) {
        self.key_path = self
            .key_path
            .take()
            .filter(|key| !key.as_os_str().is_empty())
            .map(|key| if key.is_relative() { root.join(key) } else { key });
        if self.local_root == Path::new(".") {
            self.local_root = root.to_path_buf();
        }
    }

    /// Apply `MIRROR_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_bool = |v: String| v == "true" || v == "1" || v == "yes";

        if let Some(v) = lookup("MIRROR_ENABLED") {
            self.enabled = parse_bool(v);
        }
        if let Some(v) = lookup("MIRROR_DEFERRED") {
            self.deferred = parse_bool(v);
        }
        if let Some(host) = lookup("MIRROR_HOST") {
            self.host = host;
        }
        if let Some(user) = lookup("MIRROR_USER") {
            self.user = user;
        }
        if let Some(key) = lookup("MIRROR_KEY_PATH") {
            self.key_path = (!key.is_empty()).then(|| PathBuf::from(key));
        }
        if let Some(path) = lookup("MIRROR_REMOTE_PATH") {
            self.remote_base_path = path;
        }
        if let Some(web_host) = lookup("MIRROR_WEB_HOST") {
            self.web_host = web_host;
        }
        if let Some(port) = lookup("MIRROR_PORT") {
            let parsed = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MIRROR_PORT".to_string(),
                message: format!("'{}' is not a port number", port),
            })?;
            self.port = Some(parsed);
        }

        Ok(())
    }

    /// Reject configurations that cannot mirror anything.
    ///
    /// A disabled configuration is always valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingValue("host"));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingValue("user"));
        }
        if self.remote_base_path.trim().is_empty() {
            return Err(ConfigError::MissingValue("remote_base_path"));
        }
        if self.web_host.trim().is_empty() {
            return Err(ConfigError::MissingValue("web_host"));
        }
        if !self.web_host.starts_with("http://") && !self.web_host.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "web_host".to_string(),
                message: "must start with http:// or https://".to_string(),
            });
        }
        Ok(())
    }

    /// `user@host` destination for ssh/scp
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Public prefix of mirrored URLs, without a trailing slash
    pub fn mirror_url_prefix(&self) -> String {
        let web_host = self.web_host.trim_end_matches('/');
        let base = self.remote_base_path.trim_matches('/');
        if base.is_empty() {
            web_host.to_string()
        } else {
            format!("{}/{}", web_host, base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
development:
  enabled: false
production:
  enabled: true
  delayed_job: true
  scp_host: upload.example.net
  scp_user: sshacs
  key: config/keys/mirror_rsa
  remote_path: /12345/assets
  web_host: http://cdn.example.net
"#;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert!(!config.enabled);
        assert!(config.strict_host_key_checking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_legacy_keys() {
        let config = MirrorConfig::from_yaml_str(SAMPLE, "production").unwrap();
        assert!(config.enabled);
        assert!(config.deferred);
        assert_eq!(config.host, "upload.example.net");
        assert_eq!(config.user, "sshacs");
        assert_eq!(config.remote_base_path, "/12345/assets");
        assert_eq!(config.key_path, Some(PathBuf::from("config/keys/mirror_rsa")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_environment() {
        let result = MirrorConfig::from_yaml_str(SAMPLE, "staging");
        assert!(matches!(result, Err(ConfigError::UnknownEnvironment(_))));
    }

    #[test]
    fn test_from_file_roots_key_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = MirrorConfig::from_file(file.path(), "production", "/srv/app").unwrap();
        assert_eq!(
            config.key_path,
            Some(PathBuf::from("/srv/app/config/keys/mirror_rsa"))
        );
        assert_eq!(config.local_root, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_merge_keys_share_defaults() {
        let yaml = r#"
defaults: &defaults
  scp_host: upload.example.net
  scp_user: sshacs
  remote_path: /12345/assets
  web_host: http://cdn.example.net
development:
  <<: *defaults
production:
  <<: *defaults
  enabled: true
  scp_user: deploy
"#;
        let config = MirrorConfig::from_yaml_str(yaml, "production").unwrap();
        assert!(config.enabled);
        assert_eq!(config.host, "upload.example.net");
        assert_eq!(config.user, "deploy");
        assert_eq!(config.remote_base_path, "/12345/assets");
        assert!(config.validate().is_ok());

        let development = MirrorConfig::from_yaml_str(yaml, "development").unwrap();
        assert!(!development.enabled);
        assert_eq!(development.host, "upload.example.net");
    }

    #[test]
    fn test_other_sections_are_not_parsed() {
        let yaml = format!("{}staging:\n  port: abc\n", SAMPLE);

        let config = MirrorConfig::from_yaml_str(&yaml, "production").unwrap();
        assert_eq!(config.host, "upload.example.net");

        let staging = MirrorConfig::from_yaml_str(&yaml, "staging");
        assert!(matches!(staging, Err(ConfigError::FileError(msg)) if msg.starts_with("staging")));
    }

    #[test]
    fn test_empty_section_is_default() {
        let config = MirrorConfig::from_yaml_str("test:\n", "test").unwrap();
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"production:\n  key: \"\"\n").unwrap();

        let config = MirrorConfig::from_file(file.path(), "production", "/srv/app").unwrap();
        assert_eq!(config.key_path, None);

        let mut config = MirrorConfig::default();
        config
            .apply_overrides(|k| (k == "MIRROR_KEY_PATH").then(String::new))
            .unwrap();
        assert_eq!(config.key_path, None);
    }

    #[test]
    fn test_validate_requires_host_when_enabled() {
        let config = MirrorConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingValue("host"))
        ));
    }

    #[test]
    fn test_validate_web_host_scheme() {
        let mut config = MirrorConfig::from_yaml_str(SAMPLE, "production").unwrap();
        config.web_host = "cdn.example.net".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = MirrorConfig::from_yaml_str(SAMPLE, "development").unwrap();
        let vars: HashMap<&str, &str> = [
            ("MIRROR_ENABLED", "1"),
            ("MIRROR_HOST", "mirror.internal"),
            ("MIRROR_PORT", "2222"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.enabled);
        assert_eq!(config.host, "mirror.internal");
        assert_eq!(config.port, Some(2222));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = MirrorConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "MIRROR_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_mirror_url_prefix() {
        let config = MirrorConfig {
            web_host: "http://cdn.example.net/".to_string(),
            remote_base_path: "/12345/assets/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.mirror_url_prefix(), "http://cdn.example.net/12345/assets");
    }
}
