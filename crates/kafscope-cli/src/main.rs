//! kafscope headless driver
//!
//! Runs single kafscope commands against a configured cluster and prints
//! the result. Useful for checking profiles without starting the UI.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kafscope_core::config::{AppConfig, ClusterProfile, ConfigIo, YamlConfigStore};
use kafscope_core::reader::{Filter, MatchMode, ReadDetails, ReadEvent, StartPoint};
use kafscope_core::{ClusterSession, ClusterSwitcher};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// kafscope - Kafka and Schema Registry browser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Cluster profile to use instead of the active one
    #[arg(long)]
    cluster: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the cluster answers a metadata request
    Check,
    /// List topics
    Topics,
    /// List brokers
    Brokers,
    /// List consumer groups
    Groups,
    /// Show committed offsets and lag of a consumer group
    Offsets {
        /// Group id
        group: String,
    },
    /// Read records from a topic
    Read {
        /// Topic name
        topic: String,
        /// Partitions to read (all when omitted)
        #[arg(short, long, value_delimiter = ',')]
        partitions: Vec<i32>,
        /// beginning, most-recent, today, yesterday, last-7-days, live or at:<ms>
        #[arg(short, long, default_value = "most-recent")]
        start: StartPoint,
        /// Maximum records to print
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
        /// Only records whose key contains this text
        #[arg(long, conflicts_with = "value_contains")]
        key_contains: Option<String>,
        /// Only records whose value contains this text
        #[arg(long)]
        value_contains: Option<String>,
    },
    /// List Schema Registry subjects
    Subjects,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kafscope={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = match &args.config {
        Some(path) => YamlConfigStore::new(path),
        None => YamlConfigStore::at_default_path()?,
    };
    info!(path = %store.path().display(), "loading configuration");
    let config = store.load()?;
    let profile = select_profile(&config, args.cluster.as_deref())?;

    if matches!(args.command, Command::Check) {
        let metadata = ClusterSwitcher::check_connectivity(&profile)
            .await_completion()
            .await
            .into_result()?;
        println!(
            "{}: {} brokers, {} topics",
            profile.name,
            metadata.brokers.len(),
            metadata.topics.len()
        );
        return Ok(());
    }

    let switcher = ClusterSwitcher::new();
    let session = switcher
        .activate_cluster(&profile)
        .await
        .with_context(|| format!("activating cluster '{}'", profile.name))?;
    let result = run(&session, args.command).await;
    drop(session);
    switcher.deactivate().await;
    result
}

fn select_profile(config: &AppConfig, name: Option<&str>) -> Result<ClusterProfile> {
    let profile = match name {
        Some(name) => config.cluster(name),
        None => config.active_cluster(),
    };
    profile
        .cloned()
        .ok_or_else(|| match name {
            Some(name) => anyhow!("no cluster named '{name}' in the configuration"),
            None => anyhow!("no active cluster; pass --cluster"),
        })
}

async fn run(session: &ClusterSession, command: Command) -> Result<()> {
    match command {
        Command::Check => {}
        Command::Topics => {
            for topic in session.list_topics().await_completion().await.into_result()? {
                println!(
                    "{}\tpartitions={}\treplicas={}\tcleanup={}{}",
                    topic.name,
                    topic.partitions,
                    topic.replication_factor,
                    topic.cleanup_policy,
                    if topic.internal { "\tinternal" } else { "" }
                );
            }
        }
        Command::Brokers => {
            let cluster = session.describe_cluster().await_completion().await.into_result()?;
            for broker in cluster.brokers {
                println!("{}\t{}", broker.id, broker.address);
            }
        }
        Command::Groups => {
            for group in session.list_groups().await_completion().await.into_result()? {
                println!("{}\t{}\tmembers={}", group.name, group.state, group.members.len());
            }
        }
        Command::Offsets { group } => {
            let rows = session
                .list_offsets(&group)
                .await_completion()
                .await
                .into_result()?;
            for row in rows {
                match (row.high_watermark, row.lag) {
                    (Some(hwm), Some(lag)) => println!(
                        "{}\t{}\tcommitted={}\thwm={hwm}\tlag={lag}",
                        row.topic, row.partition, row.committed
                    ),
                    _ => println!(
                        "{}\t{}\tcommitted={}\terror={}",
                        row.topic,
                        row.partition,
                        row.committed,
                        row.error.unwrap_or_default()
                    ),
                }
            }
        }
        Command::Read {
            topic,
            partitions,
            start,
            limit,
            key_contains,
            value_contains,
        } => {
            let partitions = if partitions.is_empty() {
                all_partitions(session, &topic).await?
            } else {
                partitions
            };
            let mut details = ReadDetails::new(topic, partitions, start, limit);
            if let Some(term) = key_contains {
                details = details.with_filter(Filter::key(MatchMode::Contains, term));
            } else if let Some(term) = value_contains {
                details = details.with_filter(Filter::value(MatchMode::Contains, term));
            }
            read(session, details).await?;
        }
        Command::Subjects => {
            for subject in session.list_subjects().await_completion().await.into_result()? {
                let compatibility = subject
                    .compatibility
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                println!(
                    "{}\tversions={:?}\t{compatibility}{}",
                    subject.name,
                    subject.versions,
                    if subject.deleted { "\tdeleted" } else { "" }
                );
            }
        }
    }
    Ok(())
}

async fn all_partitions(session: &ClusterSession, topic: &str) -> Result<Vec<i32>> {
    let topics = session.list_topics().await_completion().await.into_result()?;
    let listed = topics
        .into_iter()
        .find(|t| t.name == topic)
        .ok_or_else(|| anyhow!("topic '{topic}' not found"))?;
    let count = i32::try_from(listed.partitions).context("partition count")?;
    Ok((0..count).collect())
}

async fn read(session: &ClusterSession, details: ReadDetails) -> Result<()> {
    let mut read = session.read_records(details);
    let cancel = read.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    loop {
        match read.await_record().await {
            ReadEvent::Record(record) => {
                let timestamp = record
                    .timestamp_utc()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{}:{}\t{timestamp}\t{}\t{}",
                    record.partition, record.offset, record.key, record.value
                );
                if let Some(error) = &record.error {
                    eprintln!("  decode error: {error}");
                }
            }
            ReadEvent::EmptyTopic => println!("topic is empty"),
            ReadEvent::NoRecordsFound => println!("no records found"),
            ReadEvent::Failed(e) => eprintln!("error: {e}"),
            ReadEvent::Finished => break,
        }
    }
    let stats = read.stats();
    info!(
        delivered = stats.delivered,
        filtered = stats.filtered,
        "read finished"
    );
    Ok(())
}
