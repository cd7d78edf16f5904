//! Cyclic polling engine.
//!
//! One engine task per link. Each iteration takes a fresh registry snapshot,
//! runs it through the adapter, distributes the outcome and only then arms
//! the timer for the next cycle, so reads on a connection never overlap and
//! a slow device cannot cause a request pile-up.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::ProtocolAdapter;
use crate::distributor::{CycleOutcome, distribute};
use crate::registry::{LinkRegistry, Snapshot};
use crate::status::{ConnectionState, LinkStatus, StatusTracker};

/// Convert a configured refresh period in seconds into a poll interval.
///
/// Returns `None` (polling disabled) for zero, negative or non-finite values.
pub fn refresh_period(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// Polling engine for a single link.
pub struct PollingEngine<A> {
    link: String,
    adapter: A,
    registry: LinkRegistry,
    period: Option<Duration>,
    status: StatusTracker,
}

impl<A: ProtocolAdapter + 'static> PollingEngine<A> {
    /// Create a new engine. A `None` period disables polling entirely.
    pub fn new(
        link: impl Into<String>,
        adapter: A,
        registry: LinkRegistry,
        period: Option<Duration>,
    ) -> Self {
        let link = link.into();
        let status = StatusTracker::new(&link);

        Self {
            link,
            adapter,
            registry,
            period,
            status,
        }
    }

    /// Start the engine on the current tokio runtime.
    ///
    /// The first cycle runs immediately. With polling disabled no task is
    /// spawned and the connection is never opened.
    pub fn spawn(self) -> EngineHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let status = self.status.subscribe();
        let link = self.link.clone();

        let task = match self.period {
            Some(period) => {
                tracing::info!(
                    link = %link,
                    adapter = self.adapter.name(),
                    period_ms = period.as_millis() as u64,
                    "Starting polling engine"
                );
                Some(tokio::spawn(self.run(period, stop_rx)))
            }
            None => {
                tracing::info!(link = %link, "Refresh period is not positive, polling disabled");
                None
            }
        };

        EngineHandle {
            link,
            stop_tx,
            status,
            task,
        }
    }

    async fn run(mut self, period: Duration, mut stop_rx: watch::Receiver<bool>) {
        let mut cycle: u64 = 0;

        loop {
            if stop_requested(&stop_rx) {
                break;
            }

            let snapshot = self.registry.snapshot();
            if snapshot.is_empty() {
                tracing::trace!(link = %self.link, "No bindings registered, skipping cycle");
            } else {
                cycle += 1;
                let outcome = self.run_cycle(&snapshot).await;
                let now = chrono::Utc::now().timestamp_millis();

                match &outcome {
                    CycleOutcome::Failed(err) => self.status.cycle_failed(err, now),
                    CycleOutcome::Completed(_) => self.status.cycle_succeeded(now),
                }

                let stats =
                    distribute(&self.registry, &self.link, cycle, now, &snapshot, &outcome);
                tracing::debug!(
                    link = %self.link,
                    cycle,
                    reads = snapshot.len(),
                    consumers = snapshot.consumers().len(),
                    delivered = stats.delivered,
                    dropped = stats.dropped,
                    bad = stats.bad_values,
                    "Cycle complete"
                );
            }

            // Checked after every cycle, before arming the next one.
            if stop_requested(&stop_rx) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = stop_rx.changed() => {}
            }
        }

        if let Err(e) = self.adapter.close().await {
            tracing::warn!(link = %self.link, error = %e, "Error closing connection");
        }
        self.status.set_state(ConnectionState::Closed);

        tracing::info!(link = %self.link, cycles = cycle, "Polling engine stopped");
    }

    /// Perform a single poll cycle against the adapter.
    async fn run_cycle(&mut self, snapshot: &Snapshot) -> CycleOutcome {
        if !self.adapter.is_open() {
            self.status.set_state(ConnectionState::Connecting);

            if let Err(e) = self.adapter.connect().await {
                self.status.set_state(ConnectionState::Failed);
                let err = self.adapter.classify_connection_error(&e);
                tracing::warn!(link = %self.link, error = %e, "Connection failed");
                return CycleOutcome::Failed(err);
            }

            self.status.set_state(ConnectionState::Open);
            tracing::info!(link = %self.link, adapter = self.adapter.name(), "Connected");
        }

        match self.adapter.read_batch(snapshot.requests()).await {
            Ok(raw) => CycleOutcome::Completed(
                raw.iter()
                    .map(|result| (result.key, self.adapter.decode(result)))
                    .collect(),
            ),
            Err(e) => {
                if !self.adapter.is_open() {
                    self.status.set_state(ConnectionState::Failed);
                }
                let err = self.adapter.classify_connection_error(&e);
                tracing::warn!(link = %self.link, error = %e, "Poll cycle failed");
                CycleOutcome::Failed(err)
            }
        }
    }
}

/// Stop is requested explicitly or by dropping the [`EngineHandle`].
fn stop_requested(stop_rx: &watch::Receiver<bool>) -> bool {
    *stop_rx.borrow() || stop_rx.has_changed().is_err()
}

/// Control handle for a running engine.
///
/// Dropping the handle stops the engine after its current cycle, without
/// waiting for it.
pub struct EngineHandle {
    link: String,
    stop_tx: watch::Sender<bool>,
    status: watch::Receiver<LinkStatus>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn link(&self) -> &str {
        &self.link
    }

    /// Subscribe to connection status changes.
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Latest status value.
    pub fn current_status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Whether the engine task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the engine.
    ///
    /// Lets an in-flight cycle finish, suppresses the next one and closes
    /// the connection before returning. No read starts after this returns.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(link = %self.link, error = %e, "Polling engine task failed");
            }
        }
    }
}
