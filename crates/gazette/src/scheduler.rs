//! The long-running scheduler: interval tickers feeding one worker.
//!
//! Each enabled source gets a ticker at its poll interval, digests are
//! checked once a minute, and pruning runs daily. Tickers only enqueue
//! jobs; a single worker runs them one at a time, so no two jobs ever touch
//! the store concurrently. A job that is already waiting is not queued a
//! second time.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use gazette_core::{
  delivery::Mailer,
  render::Renderer,
  store::DigestStore,
  summarize::Summarizer,
};
use tokio::{
  sync::{mpsc, watch},
  task::JoinSet,
  time::{self, MissedTickBehavior},
};

use crate::{app::App, fetch::Fetcher};

const SCHEDULE_TICK: Duration = Duration::from_secs(60);
const PRUNE_TICK: Duration = Duration::from_secs(24 * 60 * 60);
/// Longer intervals are clamped so ticker deadlines stay representable.
const MAX_POLL_MINUTES: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Job {
  Poll(String),
  RunDueDigests,
  Prune,
}

// ─── Queue ───────────────────────────────────────────────────────────────────

/// An unbounded job queue that drops a job already waiting in it.
#[derive(Clone)]
pub struct JobQueue {
  tx:      mpsc::UnboundedSender<Job>,
  pending: Arc<Mutex<HashSet<Job>>>,
}

pub struct JobReceiver {
  rx:      mpsc::UnboundedReceiver<Job>,
  pending: Arc<Mutex<HashSet<Job>>>,
}

pub fn queue() -> (JobQueue, JobReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  let pending = Arc::new(Mutex::new(HashSet::new()));
  (JobQueue { tx, pending: Arc::clone(&pending) }, JobReceiver { rx, pending })
}

impl JobQueue {
  /// Queue `job`. Returns `false` if an identical job is already waiting or
  /// the worker is gone.
  pub fn enqueue(&self, job: Job) -> bool {
    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    if !pending.insert(job.clone()) {
      return false;
    }
    if self.tx.send(job.clone()).is_err() {
      pending.remove(&job);
      return false;
    }
    true
  }
}

impl JobReceiver {
  /// The next job. It stops counting as waiting once taken, so a ticker
  /// may queue it again while it runs.
  pub async fn next(&mut self) -> Option<Job> {
    let job = self.rx.recv().await?;
    self
      .pending
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&job);
    Some(job)
  }
}

// ─── Tickers ─────────────────────────────────────────────────────────────────

/// A source's poll interval, between a minute and a year.
fn poll_period(minutes: u64) -> Duration {
  Duration::from_secs(minutes.clamp(1, MAX_POLL_MINUTES).saturating_mul(60))
}

fn spawn_ticker(
  tasks: &mut JoinSet<()>,
  queue: JobQueue,
  mut shutdown: watch::Receiver<bool>,
  period: Duration,
  job: Job,
) {
  tasks.spawn(async move {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        _ = interval.tick() => {
          if !queue.enqueue(job.clone()) {
            tracing::debug!(?job, "job already queued");
          }
        }
        _ = shutdown.changed() => break,
      }
    }
  });
}

// ─── Worker ──────────────────────────────────────────────────────────────────

/// Run the scheduler until `shutdown` flips to `true`. An in-flight job is
/// finished first.
pub async fn run<S, F, Z, M, R>(app: &App<S, F, Z, M, R>, mut shutdown: watch::Receiver<bool>)
where
  S: DigestStore,
  F: Fetcher,
  Z: Summarizer,
  M: Mailer,
  R: Renderer,
{
  let (queue, mut jobs) = queue();
  let mut tickers = JoinSet::new();

  for source in app.catalog.sources.iter().filter(|s| s.enabled) {
    let period = poll_period(source.poll_interval_minutes);
    let job = Job::Poll(source.source_id.clone());
    spawn_ticker(&mut tickers, queue.clone(), shutdown.clone(), period, job);
  }
  spawn_ticker(&mut tickers, queue.clone(), shutdown.clone(), SCHEDULE_TICK, Job::RunDueDigests);
  spawn_ticker(&mut tickers, queue.clone(), shutdown.clone(), PRUNE_TICK, Job::Prune);
  drop(queue);

  tracing::info!(tickers = tickers.len(), "scheduler started");

  loop {
    tokio::select! {
      job = jobs.next() => match job {
        Some(job) => run_job(app, job).await,
        None => break,
      },
      _ = shutdown.changed() => break,
    }
  }

  tickers.shutdown().await;
  tracing::info!("scheduler stopped");
}

async fn run_job<S, F, Z, M, R>(app: &App<S, F, Z, M, R>, job: Job)
where
  S: DigestStore,
  F: Fetcher,
  Z: Summarizer,
  M: Mailer,
  R: Renderer,
{
  tracing::debug!(?job, "running job");
  match job {
    Job::Poll(source_id) => match app.poll(Some(&source_id)).await {
      Ok(report) => tracing::info!(
        source_id = %source_id,
        inserted = report.inserted,
        duplicates = report.duplicates,
        failed = report.failed(),
        "poll finished"
      ),
      Err(e) => tracing::warn!(source_id = %source_id, error = %e, "poll failed"),
    },
    Job::RunDueDigests => {
      let fired = app.run_due().await;
      if !fired.is_empty() {
        tracing::info!(?fired, "scheduled runs sent");
      }
    }
    Job::Prune => {
      if let Err(e) = app.prune().await {
        tracing::warn!(error = %e, "prune failed");
      }
    }
  }
}
