//! trackwire - operate a local telemetry delivery pipeline
//!
//! This tool provides commands for:
//! - Checking configuration and the failed-batch store
//! - Inspecting, replaying and clearing batches that could not be delivered
//! - Pushing a single event through the full pipeline
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/trackwire/trackwire.db (~/.local/share/trackwire/trackwire.db)
//! - Config: $XDG_CONFIG_HOME/trackwire/config.toml (~/.config/trackwire/config.toml)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use trackwire_core::identity::USER_ID_KEY;
use trackwire_core::storage::FAILED_DATA_KEY;
use trackwire_core::{
    Config, EventType, FailedBatchStore, HttpTransport, KeyValueStore, Monitor, PageState,
    ReplayOutcome, SqliteStore, Tracker,
};

#[derive(Parser)]
#[command(name = "trackwire")]
#[command(about = "Inspect and drive the trackwire delivery pipeline")]
#[command(version)]
struct Args {
    /// Verbose output (writes the log file)
    #[arg(short, long)]
    verbose: bool,

    /// Config file to use instead of the XDG default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and failed-batch store status
    Status,

    /// List envelopes waiting in the failed-batch store
    Pending {
        /// Print the stored envelopes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deliver the failed-batch store once
    Replay,

    /// Empty the failed-batch store
    Clear,

    /// Report one event and flush it
    Emit {
        /// Event type (performance, error, behavior, custom)
        event_type: EventType,

        /// Event name
        name: String,

        /// JSON object payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Page URL recorded in the envelope context
        #[arg(long, default_value = "")]
        url: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    // Held until exit so buffered log lines are flushed
    let _log_guard = if args.verbose {
        Some(
            trackwire_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Pending { json } => cmd_pending(&config, json),
        Command::Replay => cmd_replay(&config),
        Command::Clear => cmd_clear(&config),
        Command::Emit {
            event_type,
            name,
            payload,
            url,
        } => cmd_emit(&config, event_type, &name, &payload, &url),
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let path = config.storage.database_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    store.migrate().context("failed to run store migrations")?;
    Ok(Arc::new(store))
}

fn failed_store(config: &Config, store: Arc<SqliteStore>) -> FailedBatchStore {
    FailedBatchStore::new(store, config.storage.max_failed_bytes)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("trackwire Configuration");
    println!("=======================");
    println!();

    println!(
        "Project ID:      {}",
        config.project_id.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Endpoint:        {}",
        config.endpoint.as_deref().unwrap_or("<not set>")
    );
    println!("Timeout:         {}ms", config.transport.timeout_ms);

    let track = &config.track;
    println!("Realtime Errors: {}", track.realtime.enabled);
    println!("Batch Size:      {}", track.batch.max_queue_size);
    println!("Batch Delay:     {}ms", track.batch.delay_ms);
    println!("Retry Delay:     {}ms", track.realtime.retry_delay_ms);
    println!("Max Retries:     {}", track.max_retries);
    println!("Replay Interval: {}ms", track.failed_retry_delay_ms);

    println!();
    match config.validate() {
        Ok(()) => println!("Status: Ready to deliver"),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    let db_path = config.storage.database_path();
    println!();
    println!("Store:           {}", db_path.display());
    if !db_path.exists() {
        println!("                 (not created yet)");
        return Ok(());
    }

    let store = open_store(config)?;
    if let Some(user_id) = store.get(USER_ID_KEY)? {
        println!("User ID:         {}", user_id.as_str().unwrap_or("<invalid>"));
    }

    let failed = failed_store(config, store);
    println!("Failed Events:   {}", failed.len()?);
    println!(
        "Failed Size:     {} / {} bytes",
        failed.serialized_size()?,
        failed.max_bytes()
    );

    Ok(())
}

fn cmd_pending(config: &Config, as_json: bool) -> Result<()> {
    let failed = failed_store(config, open_store(config)?);
    let envelopes = failed.load()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&envelopes)?);
        return Ok(());
    }

    if envelopes.is_empty() {
        println!("No failed batches stored.");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<20} {:>20}", "ID", "Type", "Name", "Captured");
    println!("{:-<93}", "");

    for envelope in &envelopes {
        let captured = Utc
            .timestamp_millis_opt(envelope.timestamp)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| envelope.timestamp.to_string());

        let name = if envelope.event_name.chars().count() > 18 {
            format!("{}...", envelope.event_name.chars().take(15).collect::<String>())
        } else {
            envelope.event_name.clone()
        };

        println!(
            "{:<38} {:<12} {:<20} {:>20}",
            envelope.id,
            envelope.event_type.as_str(),
            name,
            captured
        );
    }

    println!();
    println!("{} envelope(s) waiting. Run 'replay' to deliver.", envelopes.len());
    Ok(())
}

fn cmd_replay(config: &Config) -> Result<()> {
    config.validate().context("configuration is incomplete")?;
    let Some(endpoint) = config.endpoint.clone() else {
        bail!("endpoint is required");
    };

    let store = Arc::new(failed_store(config, open_store(config)?));
    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let tracker = Tracker::new(config.track.clone(), endpoint, transport, store);

    let outcome = runtime()?.block_on(tracker.retry_failed_data())?;
    match outcome {
        ReplayOutcome::Empty => println!("No failed batches stored."),
        ReplayOutcome::Delivered(count) => println!("Delivered {} envelope(s)", count),
        ReplayOutcome::Failed => {
            bail!("delivery to {} failed; batches kept", tracker.endpoint())
        }
        ReplayOutcome::InProgress => println!("A replay is already running."),
    }
    Ok(())
}

fn cmd_clear(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let failed = failed_store(config, Arc::clone(&store));
    let count = failed.len()?;
    failed.clear()?;

    tracing::info!(count, key = FAILED_DATA_KEY, "Cleared failed-batch store");
    println!("Removed {} envelope(s)", count);
    Ok(())
}

fn cmd_emit(
    config: &Config,
    event_type: EventType,
    name: &str,
    payload: &str,
    url: &str,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;

    let store = open_store(config)?;
    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let page = Arc::new(PageState::new(url, ""));

    let stats = runtime()?.block_on(async {
        let monitor = Monitor::start(config, transport, store, page)?;
        monitor.try_report(event_type, name, payload)?;
        monitor.on_terminate().await;
        monitor.shutdown();
        Ok::<_, trackwire_core::Error>(monitor.stats())
    })?;

    if stats.events_sent > 0 {
        println!("Delivered {} envelope(s)", stats.events_sent);
    } else if stats.events_persisted > 0 {
        println!(
            "Delivery failed; stored {} envelope(s) for replay",
            stats.events_persisted
        );
    }
    Ok(())
}
