//! Supervised background forwards.
//!
//! Inbound calls must answer before the hop they trigger is delivered, so
//! every forward runs as its own task. The tracker owns those tasks so that
//! shutdown can wait for them instead of abandoning them.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Outcome of draining the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that ran to completion during the drain
    pub completed: usize,
    /// Tasks aborted when the grace period ran out
    pub aborted: usize,
}

#[derive(Debug, Default)]
struct TrackerState {
    tasks: JoinSet<()>,
    closed: bool,
}

/// Tracks in-flight forward tasks
#[derive(Debug, Default)]
pub struct ForwardTracker {
    state: Mutex<TrackerState>,
}

impl ForwardTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `task` on the current runtime
    ///
    /// Returns `false` without spawning once the tracker has been drained.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        // Reap finished tasks so the set does not grow with the exchange
        while state.tasks.try_join_next().is_some() {}
        state.tasks.spawn(task);
        true
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.lock().tasks.len()
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        !self.lock().closed
    }

    /// Stop accepting tasks and wait up to `grace` for the running ones
    ///
    /// Tasks still running when the grace period ends are aborted.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        let mut tasks = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };

        let mut report = DrainReport::default();
        let deadline = Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(result)) => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            tracing::warn!("Forward task panicked: {}", e);
                        }
                    }
                    report.completed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.aborted = tasks.len();
                    tracing::warn!(
                        "Aborting {} forward task(s) still running after {:?}",
                        report.aborted,
                        grace
                    );
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }
        report
    }
}
