mod cli;
mod config;

use std::sync::Arc;

use anyhow::Context;
use cd_core::entry::EntryKind;
use cd_core::EntryTypeRegistry;
use cd_scheduler::Scheduler;
use cd_sink::{SimpleQueueSink, TaskSink};
use cd_store::{EntryStore, KvStore, MemStore, SqlStore};
use chrono::Duration;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::{BackendConfig, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let (config, config_path) = SchedulerConfig::load()?;
    tracing::info!(config_path = %config_path, "configuration loaded");

    let store = build_store(&config.backend).await?;
    let sink: Arc<dyn TaskSink> = Arc::new(SimpleQueueSink::new());

    match cli.command {
        Command::CreateTables => {
            store.create_tables().await?;
            println!("tables created");
            Ok(())
        }
        Command::Run { max_iterations } => {
            let scheduler = build_scheduler(store, sink, &config)?;
            scheduler
                .run(max_iterations)
                .await
                .context("dispatch loop failed")
        }
        Command::List => {
            let scheduler = build_scheduler(store, sink, &config)?;
            let mut cursor = None;
            loop {
                let page = scheduler.list(cursor.as_deref(), 100).await?;
                for entry in &page.items {
                    println!("{}", serde_json::to_string(entry)?);
                }
                if page.next_cursor.is_none() {
                    break;
                }
                cursor = page.next_cursor;
            }
            Ok(())
        }
        Command::Get { key } => {
            let scheduler = build_scheduler(store, sink, &config)?;
            match scheduler.get(&key).await {
                Ok(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                Err(cd_core::Error::EntryNotFound(_)) => println!("not found"),
                Err(err) => return Err(err).context("fetching entry"),
            }
            Ok(())
        }
        Command::Save {
            json_file,
            overwrite_read_only,
        } => {
            let scheduler = build_scheduler(store, sink, &config)?;
            let raw = std::fs::read_to_string(&json_file)
                .with_context(|| format!("reading {json_file}"))?;
            let entry: EntryKind =
                serde_json::from_str(&raw).with_context(|| format!("parsing {json_file}"))?;
            let saved = scheduler.save(entry, !overwrite_read_only).await?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
            Ok(())
        }
        Command::Delete { key } => {
            let scheduler = build_scheduler(store, sink, &config)?;
            scheduler.delete(&key).await?;
            println!("deleted {key}");
            Ok(())
        }
    }
}

async fn build_store(backend: &BackendConfig) -> anyhow::Result<Arc<dyn EntryStore>> {
    match backend {
        BackendConfig::Sql { url } => {
            let store = SqlStore::connect(url).await.context("connecting to Postgres")?;
            Ok(Arc::new(store))
        }
        BackendConfig::Kv { url } => {
            let store = KvStore::new(url).context("connecting to Redis")?;
            Ok(Arc::new(store))
        }
        BackendConfig::Mem => Ok(Arc::new(MemStore::new())),
    }
}

fn build_scheduler(
    store: Arc<dyn EntryStore>,
    sink: Arc<dyn TaskSink>,
    config: &SchedulerConfig,
) -> anyhow::Result<Scheduler> {
    let scheduler = Scheduler::new(
        store,
        sink,
        EntryTypeRegistry::default(),
        config.default_entries.clone(),
        Duration::milliseconds(config.max_interval_ms),
        Duration::milliseconds(config.lock_timeout_ms),
    )
    .context("constructing scheduler")?;
    Ok(scheduler)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cadenced=debug")),
        )
        .init();
}
