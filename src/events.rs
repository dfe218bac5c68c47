//! Event types for the coordination layer
//!
//! Two event families meet here:
//!
//! - **Inbound** events produced by the collaborators (signaling engine, push
//!   delivery, OS lifecycle, connectivity monitor). Producers wrap them in
//!   [`CoordinatorEvent`] and send them into the coordinator's single-consumer
//!   queue, which decouples producer timing from processing and makes the
//!   per-call ordering guarantee enforceable.
//! - **Outbound** [`SessionEvent`]s the coordinator emits to its observer and
//!   optional broadcast subscribers: call state changes, registration state
//!   changes, missed push calls, and recoverable errors.
//!
//! # Usage
//!
//! ```rust
//! use sipkeep::events::{SessionEvent, SessionEventHandler, EventPriority};
//! use async_trait::async_trait;
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl SessionEventHandler for PrintHandler {
//!     async fn on_event(&self, event: SessionEvent) {
//!         println!("priority {:?}: {:?}", event.priority(), event);
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::budget::TaskHandle;
use crate::call::{AccountId, CallId, CallState};
use crate::connectivity::ConnectivityState;
use crate::error::CoordinatorError;
use crate::registration::RegistrationState;

// ===== INBOUND EVENTS =====

/// Call lifecycle events reported by the signaling engine
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// A new incoming call, possibly pre-announced by push
    Incoming {
        /// Engine-assigned call id
        call_id: CallId,
        /// SIP URI of the remote party, when the engine knows it
        remote_uri: Option<String>,
    },
    /// The call was answered and media is flowing
    Active {
        /// Call that became active
        call_id: CallId,
    },
    /// The engine paused the call (hold, or media interrupted)
    Paused {
        /// Call that was paused
        call_id: CallId,
    },
    /// The call ended, for whatever reason
    Ended {
        /// Call that ended
        call_id: CallId,
    },
    /// The engine hit an error on the call; the call may still be live
    Error {
        /// Call the error relates to
        call_id: CallId,
        /// Engine-provided description
        reason: String,
    },
}

impl CallEvent {
    /// Call id this event refers to.
    pub fn call_id(&self) -> &CallId {
        match self {
            CallEvent::Incoming { call_id, .. }
            | CallEvent::Active { call_id }
            | CallEvent::Paused { call_id }
            | CallEvent::Ended { call_id }
            | CallEvent::Error { call_id, .. } => call_id,
        }
    }
}

/// Events reported by the signaling engine collaborator
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Call lifecycle event
    Call(CallEvent),
    /// Per-account registration state change
    Registration {
        /// Account whose registration changed
        account_id: AccountId,
        /// New state
        state: RegistrationState,
        /// Engine-provided reason, e.g. the SIP response line
        reason: Option<String>,
    },
}

/// Events from the push delivery collaborator
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A push notification announced an inbound call
    Received {
        /// Call id carried by the push payload
        call_id: CallId,
        /// How long the push service expects the call to be answerable;
        /// the configured default applies when absent
        deadline_hint: Option<Duration>,
    },
}

/// OS lifecycle transitions
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The app moved to the background
    EnteredBackground,
    /// The app returned to the foreground
    EnteredForeground,
    /// The OS is about to revoke a background execution budget
    BudgetAboutToExpire(TaskHandle),
}

/// Everything that enters the coordinator's single-consumer queue
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// Event from the signaling engine
    Engine(EngineEvent),
    /// Event from the push delivery collaborator
    Push(PushEvent),
    /// Event from the OS lifecycle collaborator
    Lifecycle(LifecycleEvent),
    /// Event from the connectivity monitor
    Connectivity(ConnectivityEvent),
    /// A scheduled registration retry fired
    RegistrationRetry {
        /// Account the retry targets
        account_id: AccountId,
        /// Retry generation captured when the timer was scheduled;
        /// the retry is dropped if the account moved on since
        token: u64,
    },
    /// Periodic sweep of the push wake queue
    SweepPushDeadlines,
}

/// Events emitted by the connectivity monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The reachability classification changed
    StateChanged(ConnectivityState),
    /// The device went from unreachable to reachable; failed registrations
    /// should be retried
    ReconnectRequested(ConnectivityState),
}

// ===== OUTBOUND EVENTS =====

/// Priority levels for outbound events
///
/// ```rust
/// use sipkeep::events::EventPriority;
///
/// assert!(EventPriority::Critical > EventPriority::High);
/// assert!(EventPriority::High > EventPriority::Normal);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Routine updates
    Low,
    /// State changes
    Normal,
    /// Incoming calls and registration changes
    High,
    /// Failures
    Critical,
}

/// Information about a call state transition
#[derive(Debug, Clone)]
pub struct CallStateInfo {
    /// Call that changed state
    pub call_id: CallId,
    /// New state after the transition
    pub new_state: CallState,
    /// Previous state, when one was recorded
    pub previous_state: Option<CallState>,
    /// Human-readable reason for the transition
    pub reason: Option<String>,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

/// Information about a registration state transition
#[derive(Debug, Clone)]
pub struct RegistrationStateInfo {
    /// Account whose registration changed
    pub account_id: AccountId,
    /// New registration state
    pub state: RegistrationState,
    /// Consecutive failed attempts so far
    pub attempts: u32,
    /// Reason for the change, when known
    pub reason: Option<String>,
    /// When the change happened
    pub timestamp: DateTime<Utc>,
}

/// Events the coordinator emits to observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A call transitioned between states
    CallStateChanged {
        /// Transition details
        info: CallStateInfo,
    },
    /// An account's registration state changed
    RegistrationStateChanged {
        /// Transition details
        info: RegistrationStateInfo,
    },
    /// A push-announced call expired before the engine confirmed it
    MissedPushCall {
        /// The announced call id
        call_id: CallId,
    },
    /// A recoverable error occurred while processing an event
    CoordinatorError {
        /// The error
        error: CoordinatorError,
        /// Call the error relates to, if any
        call_id: Option<CallId>,
    },
}

impl SessionEvent {
    /// Priority of this event for observer-side filtering.
    pub fn priority(&self) -> EventPriority {
        match self {
            SessionEvent::CallStateChanged { info } => match info.new_state {
                CallState::Ringing => EventPriority::High,
                _ => EventPriority::Normal,
            },
            SessionEvent::RegistrationStateChanged { .. } => EventPriority::High,
            SessionEvent::MissedPushCall { .. } => EventPriority::High,
            SessionEvent::CoordinatorError { .. } => EventPriority::Critical,
        }
    }

    /// Call id this event refers to, if any.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            SessionEvent::CallStateChanged { info } => Some(&info.call_id),
            SessionEvent::MissedPushCall { call_id } => Some(call_id),
            SessionEvent::CoordinatorError { call_id, .. } => call_id.as_ref(),
            SessionEvent::RegistrationStateChanged { .. } => None,
        }
    }
}

/// Observer interface for coordinator output
///
/// Register one handler with
/// [`crate::coordinator::SessionCoordinator::set_event_handler`]; additional
/// consumers can subscribe to the broadcast channel instead.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    /// Called for every outbound event, in emission order.
    async fn on_event(&self, event: SessionEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_are_ordered() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn ringing_outranks_other_call_states() {
        let ringing = SessionEvent::CallStateChanged {
            info: CallStateInfo {
                call_id: "c1".into(),
                new_state: CallState::Ringing,
                previous_state: None,
                reason: None,
                timestamp: Utc::now(),
            },
        };
        let active = SessionEvent::CallStateChanged {
            info: CallStateInfo {
                call_id: "c1".into(),
                new_state: CallState::Active,
                previous_state: Some(CallState::Ringing),
                reason: None,
                timestamp: Utc::now(),
            },
        };
        assert_eq!(ringing.priority(), EventPriority::High);
        assert_eq!(active.priority(), EventPriority::Normal);
    }

    #[test]
    fn error_events_are_critical() {
        let event = SessionEvent::CoordinatorError {
            error: CoordinatorError::unknown_call("c9"),
            call_id: Some("c9".into()),
        };
        assert_eq!(event.priority(), EventPriority::Critical);
        assert_eq!(event.call_id(), Some(&"c9".to_string()));
    }
}
