//! gazette command-line entry point.
//!
//! Reads settings from `gazette.toml` (or `--config`) overlaid by
//! `GAZETTE__*` environment variables, loads the catalog it names, and runs
//! one command against the SQLite store.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use gazette::{
  app::{DefaultApp, tracking_codec},
  ingest::SourceStatus,
  scheduler,
  settings::{Settings, load_catalog},
};
use gazette_core::clock::SystemClock;
use gazette_store_sqlite::SqliteStore;
use gazette_tracking::TrackingState;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Digest builder and mailer")]
struct Cli {
  /// Path to the TOML settings file.
  #[arg(short, long, default_value = "gazette.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Poll enabled sources once and store new content.
  PollSources {
    /// Poll only this source, even if it is disabled.
    #[arg(long)]
    source: Option<String>,
  },
  /// Build a run of a digest.
  BuildNewsletter {
    #[arg(long)]
    id:      String,
    /// Also render the message for the first eligible recipient and print it
    /// instead of sending.
    #[arg(long)]
    dry_run: bool,
  },
  /// Send a built run to its group.
  SendRun {
    #[arg(long)]
    run_id: i64,
  },
  /// Poll, build, and send on schedule until interrupted.
  RunScheduler,
  /// Serve the open, click, and unsubscribe endpoints.
  ServeTracking,
  /// Delete events, snapshots, and content past the retention window.
  Prune,
  /// Print engagement counts for a digest.
  Report {
    #[arg(long)]
    id:   String,
    /// Trailing window to count, in days.
    #[arg(long)]
    days: u32,
  },
}

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

  let settings = Settings::load(&cli.config)
    .with_context(|| format!("failed to read settings from {:?}", cli.config))?;

  match cli.command {
    Command::PollSources { source } => {
      let app = open_app(&settings).await?;
      let report = app.poll(source.as_deref()).await?;
      for outcome in &report.per_source {
        match &outcome.status {
          SourceStatus::Polled { records, skipped, units } => println!(
            "{}: {records} records, {units} units, {skipped} skipped",
            outcome.source_id
          ),
          SourceStatus::Failed(reason) => println!("{}: failed: {reason}", outcome.source_id),
        }
      }
      println!("Inserted {} units ({} duplicates)", report.inserted, report.duplicates);
    }
    Command::BuildNewsletter { id, dry_run: false } => {
      let app = open_app(&settings).await?;
      let run = app.build(&id).await?;
      println!("Run id: {}", run.id);
    }
    Command::BuildNewsletter { id, dry_run: true } => {
      let app = open_app(&settings).await?;
      let (run, preview) = app.dry_run(&id).await?;
      println!("Run id: {}", run.id);
      match preview {
        Some(preview) => {
          println!("To: {}", preview.recipient);
          println!("Subject: {}\n", preview.message.subject);
          println!("{}\n", preview.message.text);
          println!("{}", preview.message.html);
        }
        None => println!("No eligible recipients to preview for."),
      }
    }
    Command::SendRun { run_id } => {
      let app = open_app(&settings).await?;
      let report = app.send(run_id).await?;
      println!(
        "Run {}: {} sent, {} failed, {} already attempted, {} inactive",
        report.run_id, report.sent, report.failed, report.skipped_existing, report.skipped_inactive
      );
      for email in &report.disabled {
        println!("Disabled after repeated failures: {email}");
      }
    }
    Command::RunScheduler => {
      let app = open_app(&settings).await?;
      let (tx, rx) = watch::channel(false);
      tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutting down");
        let _ = tx.send(true);
      });
      scheduler::run(&app, rx).await;
    }
    Command::Prune => {
      let app = open_app(&settings).await?;
      let stats = app.prune().await?;
      println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Command::Report { id, days } => {
      let app = open_app(&settings).await?;
      let counts = app.report(&id, days).await?;
      println!("{}", serde_json::to_string_pretty(&counts)?);
    }
    Command::ServeTracking => serve_tracking(&settings).await?,
  }

  Ok(())
}

/// Open the store and wire the full application from settings and the
/// catalog they name.
async fn open_app(settings: &Settings) -> anyhow::Result<DefaultApp> {
  let catalog_path = settings.catalog_path();
  let catalog = load_catalog(&catalog_path)
    .with_context(|| format!("failed to load catalog from {catalog_path:?}"))?;
  DefaultApp::from_settings(settings, catalog)
    .await
    .context("failed to initialise")
}

async fn serve_tracking(settings: &Settings) -> anyhow::Result<()> {
  let codec = tracking_codec(settings)?.ok_or(gazette::Error::MissingSecret)?;

  let store_path = settings.store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let state = TrackingState::new(Arc::new(store), codec, Arc::new(SystemClock));
  let router = gazette_tracking::router(state);
  let address = settings.tracking_address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::warn!(error = %e, "failed to listen for ctrl-c");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        tracing::warn!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
}
