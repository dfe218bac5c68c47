//! Core call identifiers and state for the coordination layer
//!
//! Call identifiers are the strings assigned by the signaling engine (and
//! announced ahead of time by push notifications), not locally minted ids:
//! a push announcement and the engine event it precedes must compare equal.

use serde::{Deserialize, Serialize};

/// Identifier of a call, as reported by the signaling engine or a push wake.
pub type CallId = String;

/// Identifier of a registered account (one per registrar the client uses).
pub type AccountId = String;

/// Client-side state of a single call
///
/// The coordinator drives each call through this state machine:
///
/// `Announced` → `Ringing` → `Active` ⇄ `Paused` → `Terminated`
///
/// `Announced` exists only in the push wake queue; a [`crate::registry::CallContext`]
/// is created when the engine confirms the call and reports it `Ringing`.
///
/// # Examples
///
/// ```rust
/// use sipkeep::call::CallState;
///
/// assert!(CallState::Terminated.is_terminal());
/// assert!(CallState::Active.is_live());
/// assert!(!CallState::Announced.is_live());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// A push notification announced the call; the engine has not confirmed it yet
    Announced,
    /// The engine reported the incoming call; awaiting accept or reject
    Ringing,
    /// The call was answered and is in progress
    Active,
    /// The call is live but paused (app backgrounded without execution budget,
    /// or background budget about to expire)
    Paused,
    /// Terminal state; the call context has been torn down
    Terminated,
}

impl CallState {
    /// Whether this state ends the call lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated)
    }

    /// Whether the engine holds a live call for this state.
    ///
    /// `Announced` is not live: only the push wake queue knows about it.
    pub fn is_live(&self) -> bool {
        matches!(self, CallState::Ringing | CallState::Active | CallState::Paused)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Announced => write!(f, "Announced"),
            CallState::Ringing => write!(f, "Ringing"),
            CallState::Active => write!(f, "Active"),
            CallState::Paused => write!(f, "Paused"),
            CallState::Terminated => write!(f, "Terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_live_partition() {
        assert!(CallState::Terminated.is_terminal());
        assert!(!CallState::Terminated.is_live());
        for state in [CallState::Ringing, CallState::Active, CallState::Paused] {
            assert!(state.is_live());
            assert!(!state.is_terminal());
        }
        assert!(!CallState::Announced.is_live());
        assert!(!CallState::Announced.is_terminal());
    }
}
