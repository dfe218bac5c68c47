//! Collaborator traits for the external engine, storage, and notification surfaces
//!
//! The coordinator never talks to the SIP wire, the OS notification center, or
//! persistent storage directly. Each of those capabilities is injected as a
//! trait object at construction time, which keeps the coordinator a pure state
//! machine and lets tests substitute recording fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::{AccountId, CallId};
use crate::error::CoordinatorResult;
use crate::registration::RegistrationState;

/// Commands the coordinator issues to the external SIP signaling engine
///
/// The engine owns the protocol state machine and media negotiation; the
/// coordinator only tells it what to do with a call or an account. Engine
/// failures are returned as errors and surfaced as recoverable events, never
/// panics.
#[async_trait]
pub trait SignalingEngine: Send + Sync {
    /// Accept an incoming call, optionally enabling video.
    async fn accept(&self, call_id: &CallId, with_video: bool) -> CoordinatorResult<()>;

    /// Decline an incoming call.
    async fn reject(&self, call_id: &CallId) -> CoordinatorResult<()>;

    /// Terminate a call in any live state.
    async fn hangup(&self, call_id: &CallId) -> CoordinatorResult<()>;

    /// Re-send the REGISTER for one account.
    async fn refresh_registration(&self, account_id: &AccountId) -> CoordinatorResult<()>;
}

/// Write-through store for the last known registration state per account
///
/// The coordinator persists nothing itself; every registration state change is
/// handed to this store as an opaque key/value write. Implementations may back
/// this with user defaults, a config file, or nothing at all.
pub trait RegistrationStore: Send + Sync {
    /// Record the latest state for `account_id`.
    fn put(&self, account_id: &AccountId, state: RegistrationState);
}

/// A `RegistrationStore` that drops every write.
#[derive(Debug, Default)]
pub struct NullRegistrationStore;

impl RegistrationStore for NullRegistrationStore {
    fn put(&self, _account_id: &AccountId, _state: RegistrationState) {}
}

/// Handle to a local notification owned by the platform notification center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationHandle(pub u64);

/// Local-notification surface for calls that arrive without a push wake
///
/// When an incoming call was already announced by push, the platform has
/// shown its own notification and the coordinator suppresses this one.
pub trait NotificationGateway: Send + Sync {
    /// Post an incoming-call notification; returns a handle for cancellation.
    fn post_incoming_call(&self, call_id: &CallId) -> NotificationHandle;

    /// Cancel a previously posted notification. Unknown handles are no-ops.
    fn cancel(&self, handle: NotificationHandle);
}

/// A `NotificationGateway` that posts nothing.
#[derive(Debug, Default)]
pub struct NullNotificationGateway;

impl NotificationGateway for NullNotificationGateway {
    fn post_incoming_call(&self, _call_id: &CallId) -> NotificationHandle {
        NotificationHandle(0)
    }

    fn cancel(&self, _handle: NotificationHandle) {}
}
