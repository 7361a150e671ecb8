//! tally-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`, overridable
//! with `TALLY_*` environment variables), opens an in-process SQLite store,
//! and either serves the JSON API over HTTP or runs a one-shot spreadsheet
//! import against the same store.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tally_ingest::IngestOptions;
use tally_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Tally indicator server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API over HTTP.
  Serve,
  /// Ingest a workbook's data sheets into the store.
  Ingest { file: PathBuf },
  /// Import validation rules from a workbook's Validations sheet.
  ImportValidations { file: PathBuf },
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` and `TALLY_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
struct ServerConfig {
  #[serde(default = "default_host")]
  host:               String,
  #[serde(default = "default_port")]
  port:               u16,
  #[serde(default = "default_store_path")]
  store_path:         PathBuf,
  /// Root org unit prepended to every ingested location path.
  #[serde(default)]
  root_unit:          Option<String>,
  /// Read at most this many sheets per workbook.
  #[serde(default = "default_max_sheets")]
  max_sheets:         usize,
  /// Interrupt reporting queries running longer than this many seconds.
  #[serde(default)]
  query_timeout_secs: Option<u64>,
}

fn default_host() -> String {
  "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
  8080
}

fn default_store_path() -> PathBuf {
  PathBuf::from("tally.db")
}

fn default_max_sheets() -> usize {
  4
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TALLY"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Open SQLite store.
  let mut store = SqliteStore::open(&server_cfg.store_path)
    .await
    .with_context(|| {
      format!("failed to open store at {:?}", server_cfg.store_path)
    })?;
  if let Some(secs) = server_cfg.query_timeout_secs {
    store = store.with_query_timeout(Duration::from_secs(secs));
  }

  match cli.command {
    Command::Serve => serve(&server_cfg, store).await,
    Command::Ingest { file } => ingest(&server_cfg, &store, &file).await,
    Command::ImportValidations { file } => {
      import_validations(&store, &file).await
    }
  }
}

// ─── Subcommands ─────────────────────────────────────────────────────────────

async fn serve(cfg: &ServerConfig, store: SqliteStore) -> anyhow::Result<()> {
  let app = axum::Router::new()
    .nest("/api", tally_api::api_router(Arc::new(store)))
    .layer(TraceLayer::new_for_http());

  let address = format!("{}:{}", cfg.host, cfg.port);
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;
  Ok(())
}

async fn ingest(
  cfg: &ServerConfig,
  store: &SqliteStore,
  file: &PathBuf,
) -> anyhow::Result<()> {
  let options = IngestOptions {
    root_unit:  cfg.root_unit.clone(),
    max_sheets: cfg.max_sheets,
  };
  let report = tally_ingest::ingest_workbook(store, file, &options)
    .await
    .with_context(|| format!("failed to ingest {}", file.display()))?;

  for rejected in &report.rejected {
    tracing::warn!(
      element = rejected.element_id,
      org_unit = rejected.org_unit_id,
      reason = %rejected.reason,
      "value rejected"
    );
  }
  println!(
    "{} sheets, {} data rows: {} values inserted, {} rejected, \
     {} rows skipped, {} bad cells",
    report.sheets,
    report.data_rows,
    report.inserted,
    report.rejected.len(),
    report.skipped_rows,
    report.bad_cells,
  );
  Ok(())
}

async fn import_validations(
  store: &SqliteStore,
  file: &PathBuf,
) -> anyhow::Result<()> {
  let report = tally_ingest::import_validations(store, file)
    .await
    .with_context(|| {
      format!("failed to import validations from {}", file.display())
    })?;

  println!("{} rules saved, {} skipped", report.saved, report.skipped);
  Ok(())
}
