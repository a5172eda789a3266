//! Variant Mirror CLI
//!
//! Inspect the mirror configuration, compute attachment URLs and run a sync
//! by hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirror_attachments::{Attachment, AttachmentDefinition, UrlResolver};
use mirror_core::{Id, MirrorConfig, MirrorError};
use mirror_sync::{MemoryMirrorStatusStore, MirrorSyncEngine};
use mirror_transfer::{LocalTransport, RemoteTransport, SshTransport};

#[derive(Parser, Debug)]
#[command(name = "variant-mirror")]
#[command(about = "Mirror attachment variants to a remote host")]
#[command(version)]
struct Cli {
    /// Mirror configuration file
    #[arg(long, env = "MIRROR_CONFIG", default_value = "config/mirror.yml")]
    config: PathBuf,

    /// Deployment environment (defaults to MIRROR_ENV, RAILS_ENV, then development)
    #[arg(long)]
    env: Option<String>,

    /// Application root; relative key paths and local files resolve against it
    #[arg(long, env = "MIRROR_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies one attachment on the command line
#[derive(clap::Args, Debug)]
struct AttachmentArgs {
    /// Attachment definition (YAML)
    #[arg(long)]
    definition: PathBuf,
    /// Owning record type
    #[arg(long, default_value = "User")]
    owner_type: String,
    /// Owning record ID
    #[arg(long)]
    owner_id: Id,
    /// Stored file name
    #[arg(long)]
    file_name: String,
    /// Content timestamp (unix seconds) for cache-busting URLs
    #[arg(long)]
    updated_at: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load, validate and print the effective configuration
    CheckConfig,
    /// Print attachment URLs
    Url {
        #[command(flatten)]
        attachment: AttachmentArgs,
        /// Single style (all variants when omitted)
        #[arg(long)]
        style: Option<String>,
        /// Treat the attachment as mirrored
        #[arg(long)]
        on_mirror: bool,
    },
    /// Upload every variant of an attachment
    Sync {
        #[command(flatten)]
        attachment: AttachmentArgs,
        /// Mirror into this local directory instead of over SSH
        #[arg(long)]
        target_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let environment = MirrorConfig::environment_name(cli.env.as_deref());
    let config = MirrorConfig::load(&cli.config, &environment, &cli.root)
        .with_context(|| format!("loading {} ({})", cli.config.display(), environment))?;
    let config = Arc::new(config);

    match cli.command {
        Commands::CheckConfig => {
            info!(environment = %environment, enabled = config.enabled, "Configuration valid");
            print!("{}", serde_yaml::to_string(config.as_ref())?);
        }
        Commands::Url {
            attachment,
            style,
            on_mirror,
        } => {
            let (definition, mut record) = attachment.load()?;
            record.on_mirror = on_mirror;

            let urls = UrlResolver::new(config);
            match style {
                Some(style) => println!("{}", urls.url(&definition, &record, Some(&style))?),
                None => {
                    for (variant, url) in urls.urls(&definition, &record)? {
                        println!("{}\t{}", variant, url);
                    }
                }
            }
        }
        Commands::Sync {
            attachment,
            target_dir,
        } => {
            if !config.enabled {
                bail!("mirroring is disabled for environment '{}'", environment);
            }

            let (definition, mut record) = attachment.load()?;
            let transport: Arc<dyn RemoteTransport> = match target_dir {
                Some(dir) => Arc::new(LocalTransport::new(dir)),
                None => Arc::new(SshTransport::new(config.clone())),
            };

            let store = Arc::new(MemoryMirrorStatusStore::new());
            let engine = MirrorSyncEngine::new(config, store, transport);

            let report = match engine.sync_asset(&definition, &mut record).await {
                Ok(report) => report,
                Err(e) => {
                    let err = MirrorError::from(e);
                    error!(code = err.error_code(), attachment = %record.key(), "Sync failed");
                    return Err(anyhow::Error::new(err).context(format!("syncing {}", record.key())));
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

impl AttachmentArgs {
    fn load(&self) -> anyhow::Result<(AttachmentDefinition, Attachment)> {
        let definition = load_definition(&self.definition)?;

        let mut attachment =
            Attachment::new(&self.owner_type, self.owner_id, &definition.name)
                .with_file(&self.file_name);
        if let Some(secs) = self.updated_at {
            let updated_at = DateTime::<Utc>::from_timestamp(secs, 0)
                .with_context(|| format!("invalid timestamp {}", secs))?;
            attachment = attachment.with_updated_at(updated_at);
        }

        Ok((definition, attachment))
    }
}

fn load_definition(path: &Path) -> anyhow::Result<AttachmentDefinition> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("reading definition {}", path.display()))?;
    let definition: AttachmentDefinition = serde_yaml::from_str(&yaml)
        .with_context(|| format!("parsing definition {}", path.display()))?;

    if definition.name.is_empty() {
        bail!("definition {} has no name", path.display());
    }
    Ok(definition)
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,mirror_sync=debug,mirror_transfer=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
