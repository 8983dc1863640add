//! Depot command-line binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::config::AppConfig;
use depot_core::{ClientInfo, DateRange, FilePatch, NewFile};
use depot_service::{Depot, DownloadContext, SweepMode, metrics};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Depot - a deduplicating file store with download analytics
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: PathBuf,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file
    Upload {
        /// File to upload
        path: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        added_by: Option<String>,
        /// Tag to attach; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Write a file's content to a path or stdout
    Download {
        id: Uuid,
        /// Output path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Record the access as a view instead of a download
        #[arg(long)]
        view: bool,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        ip_address: Option<String>,
        #[arg(long)]
        referrer: Option<String>,
    },
    /// Show one file record
    Info { id: Uuid },
    /// List file records
    List {
        /// Only records carrying exactly this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Change a file's metadata; omitted fields are kept
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        added_by: Option<String>,
        /// Replacement tag set; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Replace the tags with an empty set
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
    /// Delete a file record (and its content once unreferenced)
    Delete { id: Uuid },
    /// Download statistics, all time or inside a window
    Stats {
        /// Window start (RFC 3339)
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Window end (RFC 3339)
        #[arg(long, requires = "from")]
        to: Option<String>,
    },
    /// Most downloaded files
    Popular {
        #[arg(long)]
        count: Option<usize>,
    },
    /// Per-day download activity
    Daily {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Download history of one file
    History { file_id: Uuid },
    /// Overview, popular files and recent activity
    Dashboard,
    /// Delete analytics older than the retention period
    Cleanup {
        /// Days of analytics to keep (configured retention if omitted)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Reconcile blob reference counts, records and stored blobs
    Sweep {
        /// dry_run, correct or aggressive
        #[arg(long, default_value = "dry_run")]
        mode: SweepMode,
    },
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(config_path = %path.display(), "No config file found, using defaults");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").ignore(&["config"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_time(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).with_context(|| format!("invalid RFC 3339 time: {value}"))
}

async fn run(depot: &Depot, command: Command) -> Result<()> {
    let storage = depot.storage();
    let analytics = depot.analytics();

    match command {
        Command::Upload {
            path,
            name,
            description,
            added_by,
            tags,
            content_type,
        } => {
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("cannot derive a name from the path; pass --name")?,
            };
            let mut file = NewFile::named(name).with_tags(tags);
            file.description = description;
            file.added_by = added_by;
            file.content_type = content_type;

            let reader = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            let record = storage.upload(reader, file).await?;
            print_json(&record)?;
        }
        Command::Download {
            id,
            output,
            view,
            user_agent,
            ip_address,
            referrer,
        } => {
            let context = if view {
                DownloadContext::view()
            } else {
                DownloadContext::default()
            }
            .with_client(ClientInfo {
                user_agent,
                ip_address,
                referrer,
            });
            let (mut stream, record) = storage.download_with(id, context).await?;

            let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
                Some(path) => Box::new(
                    tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Box::new(tokio::io::stdout()),
            };
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                sink.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            sink.flush().await?;
            tracing::info!(id = %record.id, name = %record.name, bytes = written, "download complete");
        }
        Command::Info { id } => print_json(&storage.get(id).await?)?,
        Command::List { tag } => {
            let records = match tag {
                Some(tag) => storage.list_by_tag(&tag).await?,
                None => storage.list_all().await?,
            };
            print_json(&records)?;
        }
        Command::Update {
            id,
            name,
            description,
            added_by,
            tags,
            clear_tags,
        } => {
            let tags = if clear_tags {
                Some(BTreeSet::new())
            } else if tags.is_empty() {
                None
            } else {
                Some(tags.into_iter().collect())
            };
            let patch = FilePatch {
                name,
                description,
                added_by,
                tags,
            };
            print_json(&storage.update(id, patch).await?)?;
        }
        Command::Delete { id } => {
            let name = storage.delete(id).await?;
            print_json(&serde_json::json!({ "deleted": name }))?;
        }
        Command::Stats { from, to } => {
            let stats = match (from, to) {
                (Some(from), Some(to)) => {
                    let range = DateRange::new(parse_time(&from)?, parse_time(&to)?)?;
                    analytics.statistics_between(range).await?
                }
                _ => analytics.statistics().await?,
            };
            print_json(&stats)?;
        }
        Command::Popular { count } => {
            let count = count.unwrap_or(analytics.config().popular_limit);
            print_json(&analytics.popular_files(count).await?)?;
        }
        Command::Daily { days } => {
            let days = days.unwrap_or(analytics.config().daily_window_days);
            print_json(&analytics.daily_stats(days).await?)?;
        }
        Command::History { file_id } => print_json(&analytics.history(file_id).await?)?,
        Command::Dashboard => print_json(&analytics.dashboard().await?)?,
        Command::Cleanup { days } => {
            let removed = match days {
                Some(days) => analytics.cleanup(days).await?,
                None => analytics.apply_retention().await?,
            };
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Sweep { mode } => print_json(&depot.sweeper().run(mode).await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so command output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args.config)?;
    let depot = Depot::from_config(config)
        .await
        .context("failed to initialize depot")?;

    let result = run(&depot, args.command).await;

    // Let detached download handlers finish before the runtime goes away
    if let Err(e) = depot.shutdown().await {
        tracing::warn!(error = %e, "event handlers did not finish");
    }

    if args.metrics {
        eprint!("{}", metrics::render());
    }

    result
}
