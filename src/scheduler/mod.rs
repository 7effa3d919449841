//! Recurring background jobs.
//!
//! A job runs once immediately and then every `period` until it is
//! cancelled, either on its own or through its [`Scheduler`].

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest allowed period between runs.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawns recurring jobs that share a shutdown signal.
#[derive(Debug, Default)]
pub struct Scheduler {
    token: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` now and then every `period` on a background task.
    ///
    /// A run that overruns its period delays the next one instead of
    /// bursting. A failed run is logged and the schedule continues.
    /// Periods shorter than [`MIN_PERIOD`] are raised to it.
    pub fn spawn<F, Fut, E>(&self, name: impl Into<String>, period: Duration, mut job: F) -> ScheduledJob
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();
        let runs = Arc::new(AtomicU64::new(0));
        let period = period.max(MIN_PERIOD);

        let handle = tokio::spawn({
            let name = name.clone();
            let token = token.clone();
            let runs = runs.clone();
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                tracing::info!(job = %name, "Scheduled job started, period {:?}", period);

                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        result = job() => result,
                    };

                    let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
                    match result {
                        Ok(()) => tracing::debug!(job = %name, run, "Scheduled job run completed"),
                        Err(e) => tracing::error!(job = %name, run, error = %e, "Scheduled job run failed"),
                    }
                }

                tracing::info!(job = %name, "Scheduled job stopped");
            }
        });

        ScheduledJob {
            name,
            token,
            runs,
            handle,
        }
    }

    /// Cancels every job spawned by this scheduler.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to a spawned recurring job.
#[derive(Debug)]
pub struct ScheduledJob {
    name: String,
    token: CancellationToken,
    runs: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    /// Job name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of completed runs, successful or not.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Stops the job. A run in progress is abandoned at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once the job has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for the job task to finish. Call after [`cancel`](Self::cancel).
    pub async fn join(self) -> Result<(), JoinError> {
        self.handle.await
    }
}
