//! Link status reporting.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::adapter::CycleError;

/// Connection state of one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Observable status of a link, for display by host tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Link name.
    pub link: String,
    /// Current connection state.
    pub state: ConnectionState,
    /// Cycles executed so far.
    pub cycles: u64,
    /// Cycles that ended in a connection error or timeout.
    pub failed_cycles: u64,
    /// Failures since the last successful cycle.
    pub consecutive_failures: u32,
    /// Most recent cycle error, cleared by a successful cycle.
    pub last_error: Option<CycleError>,
    /// Unix epoch milliseconds of the last finished cycle.
    pub last_cycle_at: Option<i64>,
}

impl LinkStatus {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }
}

/// Write side of a link's status, owned by the polling engine.
#[derive(Debug)]
pub(crate) struct StatusTracker {
    tx: watch::Sender<LinkStatus>,
}

impl StatusTracker {
    pub(crate) fn new(link: &str) -> Self {
        let (tx, _rx) = watch::channel(LinkStatus::new(link));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.tx.send_if_modified(|status| {
            let changed = status.state != state;
            status.state = state;
            changed
        });
    }

    pub(crate) fn cycle_succeeded(&self, at: i64) {
        self.tx.send_modify(|status| {
            status.cycles += 1;
            status.consecutive_failures = 0;
            status.last_error = None;
            status.last_cycle_at = Some(at);
        });
    }

    pub(crate) fn cycle_failed(&self, error: &CycleError, at: i64) {
        self.tx.send_modify(|status| {
            status.cycles += 1;
            status.failed_cycles += 1;
            status.consecutive_failures += 1;
            status.last_error = Some(error.clone());
            status.last_cycle_at = Some(at);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plclink_common::ErrorKind;

    #[test]
    fn test_status_counters() {
        let tracker = StatusTracker::new("plc01");
        let rx = tracker.subscribe();

        tracker.set_state(ConnectionState::Open);
        tracker.cycle_failed(&CycleError::new(ErrorKind::Connection, "down"), 10);
        tracker.cycle_failed(&CycleError::new(ErrorKind::Connection, "down"), 20);

        let status = rx.borrow().clone();
        assert_eq!(status.cycles, 2);
        assert_eq!(status.failed_cycles, 2);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_cycle_at, Some(20));

        tracker.cycle_succeeded(30);
        let status = rx.borrow().clone();
        assert_eq!(status.cycles, 3);
        assert_eq!(status.failed_cycles, 2);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_status_serialization() {
        let mut status = LinkStatus::new("plc01");
        status.state = ConnectionState::Failed;
        status.last_error = Some(CycleError::new(ErrorKind::Connection, "refused"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["link"], "plc01");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["last_error"]["message"], "refused");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
