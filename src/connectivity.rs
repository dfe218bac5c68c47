//! Connectivity monitoring and classification
//!
//! Platform glue feeds raw reachability reports into the monitor; the monitor
//! classifies them into [`ConnectivityState`], drops duplicate
//! classifications inside a short debounce window (flapping interfaces can
//! storm), and notifies the single registered observer. On a transition from
//! unreachable to any reachable state it additionally raises
//! [`ConnectivityEvent::ReconnectRequested`] so the coordinator can retry
//! failed registrations.
//!
//! The monitor never talks to the signaling engine; acting on connectivity is
//! the coordinator's job.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::ConnectivityEvent;

/// Raw reachability report from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Network reachable over WiFi
    WifiReachable,
    /// Network reachable over a cellular data path
    CellularReachable,
    /// No network path available
    Unreachable,
}

/// Normalized connectivity classification
///
/// ```rust
/// use sipkeep::connectivity::ConnectivityState;
///
/// assert!(ConnectivityState::Wifi.is_reachable());
/// assert!(!ConnectivityState::None.is_reachable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// Reachable over WiFi
    Wifi,
    /// Reachable over cellular
    Cellular,
    /// Unreachable
    None,
}

impl ConnectivityState {
    /// Whether any network path is available.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ConnectivityState::None)
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Wifi => write!(f, "wifi"),
            ConnectivityState::Cellular => write!(f, "cellular"),
            ConnectivityState::None => write!(f, "none"),
        }
    }
}

impl From<LinkStatus> for ConnectivityState {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::WifiReachable => ConnectivityState::Wifi,
            LinkStatus::CellularReachable => ConnectivityState::Cellular,
            LinkStatus::Unreachable => ConnectivityState::None,
        }
    }
}

type Observer = Box<dyn Fn(ConnectivityEvent) + Send + Sync>;

struct MonitorInner {
    last_state: Option<ConnectivityState>,
    last_emit: Option<Instant>,
}

/// Debouncing reachability monitor with a single observer
pub struct ConnectivityMonitor {
    debounce: Duration,
    inner: Mutex<MonitorInner>,
    observer: Mutex<Option<Observer>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given debounce window.
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            inner: Mutex::new(MonitorInner {
                last_state: None,
                last_emit: None,
            }),
            observer: Mutex::new(None),
        }
    }

    /// Register the observer, replacing any previous one.
    pub fn set_observer<F>(&self, callback: F)
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        *self.observer.lock().unwrap() = Some(Box::new(callback));
    }

    /// Current classification, if any report has been seen.
    pub fn current_state(&self) -> Option<ConnectivityState> {
        self.inner.lock().unwrap().last_state
    }

    /// Feed a raw reachability report into the monitor.
    ///
    /// Classifies, debounces, and invokes the observer zero, one, or two
    /// times (state change, plus reconnect request on `none → reachable`).
    pub fn report(&self, status: LinkStatus) {
        let new_state = ConnectivityState::from(status);
        let (emit_change, emit_reconnect) = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();

            if inner.last_state == Some(new_state) {
                let within_window = inner
                    .last_emit
                    .map(|t| now.duration_since(t) < self.debounce)
                    .unwrap_or(false);
                if within_window {
                    debug!(state = %new_state, "Debounced duplicate connectivity report");
                    return;
                }
            }

            let reconnect = inner.last_state == Some(ConnectivityState::None)
                && new_state.is_reachable();
            inner.last_state = Some(new_state);
            inner.last_emit = Some(now);
            (true, reconnect)
        };

        if emit_change {
            info!(state = %new_state, "Connectivity changed");
            self.notify(ConnectivityEvent::StateChanged(new_state));
        }
        if emit_reconnect {
            info!(state = %new_state, "Reconnect requested after regaining network");
            self.notify(ConnectivityEvent::ReconnectRequested(new_state));
        }
    }

    fn notify(&self, event: ConnectivityEvent) {
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_monitor(debounce: Duration) -> (ConnectivityMonitor, Arc<Mutex<Vec<ConnectivityEvent>>>) {
        let monitor = ConnectivityMonitor::new(debounce);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.set_observer(move |event| sink.lock().unwrap().push(event));
        (monitor, seen)
    }

    #[test]
    fn duplicate_reports_are_debounced() {
        let (monitor, seen) = recording_monitor(Duration::from_millis(300));
        monitor.report(LinkStatus::WifiReachable);
        monitor.report(LinkStatus::WifiReachable);
        monitor.report(LinkStatus::WifiReachable);

        let events = seen.lock().unwrap();
        assert_eq!(
            *events,
            vec![ConnectivityEvent::StateChanged(ConnectivityState::Wifi)]
        );
    }

    #[test]
    fn transitions_always_pass() {
        let (monitor, seen) = recording_monitor(Duration::from_millis(300));
        monitor.report(LinkStatus::WifiReachable);
        monitor.report(LinkStatus::CellularReachable);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ConnectivityEvent::StateChanged(ConnectivityState::Cellular)
        );
    }

    #[test]
    fn regaining_network_requests_reconnect() {
        let (monitor, seen) = recording_monitor(Duration::from_millis(300));
        monitor.report(LinkStatus::WifiReachable);
        monitor.report(LinkStatus::Unreachable);
        monitor.report(LinkStatus::CellularReachable);

        let events = seen.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ConnectivityEvent::StateChanged(ConnectivityState::Wifi),
                ConnectivityEvent::StateChanged(ConnectivityState::None),
                ConnectivityEvent::StateChanged(ConnectivityState::Cellular),
                ConnectivityEvent::ReconnectRequested(ConnectivityState::Cellular),
            ]
        );
    }

    #[test]
    fn first_report_does_not_request_reconnect() {
        let (monitor, seen) = recording_monitor(Duration::from_millis(300));
        monitor.report(LinkStatus::CellularReachable);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ConnectivityEvent::StateChanged(_)));
    }

    #[test]
    fn identical_state_after_window_reemits() {
        let (monitor, seen) = recording_monitor(Duration::ZERO);
        monitor.report(LinkStatus::WifiReachable);
        monitor.report(LinkStatus::WifiReachable);

        // With a zero window nothing is inside the debounce interval, so the
        // duplicate passes through; consumers treat it as an idempotent no-op.
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
