//! Error types for the coordination layer
//!
//! Errors follow a three-way taxonomy that decides how the coordinator reacts:
//!
//! - **Recoverable** — budget exhaustion, unknown call ids, duplicate
//!   releases. Logged, surfaced as an event, never aborts event processing.
//! - **Degraded** — registration failures. Retried with capped exponential
//!   backoff while observers see a "reconnecting" state.
//! - **Fatal** — invariant breaches such as two live contexts claiming one
//!   call id. The offending entry is evicted and the condition reported;
//!   the remaining calls keep working.
//!
//! [`CoordinatorError::is_recoverable`] and [`CoordinatorError::category`]
//! drive retry and logging decisions.

use thiserror::Error;

use crate::budget::BudgetKind;
use crate::call::{AccountId, CallId};

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur in the session coordinator
#[derive(Debug, Error, Clone)]
pub enum CoordinatorError {
    /// The OS has no background execution time left to grant
    #[error("Background budget exhausted for {kind} work")]
    BudgetExhausted {
        /// The kind of budget that was requested
        kind: BudgetKind,
    },

    /// A registration-kind budget was requested while one is outstanding
    #[error("A registration background budget is already held")]
    BudgetAlreadyHeld,

    /// An operation referenced a call id the registry does not know
    #[error("Unknown call: {call_id}")]
    UnknownCall {
        /// The unknown call id
        call_id: CallId,
    },

    /// Two live call contexts claimed the same call id
    #[error("Duplicate call context for {call_id}")]
    DuplicateCall {
        /// The contested call id
        call_id: CallId,
    },

    /// The signaling engine reported a failure on a call
    #[error("Engine error: {reason}")]
    EngineError {
        /// Engine-provided failure description
        reason: String,
    },

    /// A registration failed and the backoff policy is engaged
    #[error("Registration failed for {account_id}: {reason}")]
    RegistrationFailed {
        /// Account whose registration failed
        account_id: AccountId,
        /// Registrar- or engine-provided reason
        reason: String,
    },

    /// A configuration value is invalid
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Name of the offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Internal error that should not occur under correct contract use
    #[error("Internal error: {message}")]
    InternalError {
        /// Description of the failure
        message: String,
    },
}

impl CoordinatorError {
    /// Create an engine error
    pub fn engine(reason: impl Into<String>) -> Self {
        Self::EngineError { reason: reason.into() }
    }

    /// Create an unknown-call error
    pub fn unknown_call(call_id: impl Into<CallId>) -> Self {
        Self::UnknownCall { call_id: call_id.into() }
    }

    /// Create a registration failure
    pub fn registration_failed(account_id: impl Into<AccountId>, reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            account_id: account_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Whether processing may continue after this error
    ///
    /// Recoverable and degraded conditions never abort the event pump;
    /// only configuration and internal errors are treated as hard failures
    /// by callers that set the coordinator up.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoordinatorError::BudgetExhausted { .. }
            | CoordinatorError::BudgetAlreadyHeld
            | CoordinatorError::UnknownCall { .. }
            | CoordinatorError::EngineError { .. }
            | CoordinatorError::RegistrationFailed { .. } => true,
            CoordinatorError::DuplicateCall { .. }
            | CoordinatorError::InvalidConfiguration { .. }
            | CoordinatorError::InternalError { .. } => false,
        }
    }

    /// Taxonomy bucket for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            CoordinatorError::BudgetExhausted { .. }
            | CoordinatorError::BudgetAlreadyHeld
            | CoordinatorError::UnknownCall { .. }
            | CoordinatorError::EngineError { .. } => "recoverable",
            CoordinatorError::RegistrationFailed { .. } => "degraded",
            CoordinatorError::DuplicateCall { .. } => "fatal",
            CoordinatorError::InvalidConfiguration { .. } => "configuration",
            CoordinatorError::InternalError { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_taxonomy() {
        assert!(CoordinatorError::BudgetExhausted { kind: BudgetKind::Call }.is_recoverable());
        assert!(CoordinatorError::BudgetAlreadyHeld.is_recoverable());
        assert!(CoordinatorError::unknown_call("c1").is_recoverable());
        assert!(CoordinatorError::registration_failed("acct-1", "408").is_recoverable());
        assert!(!CoordinatorError::DuplicateCall { call_id: "c1".into() }.is_recoverable());
        assert!(!CoordinatorError::internal("oops").is_recoverable());
    }

    #[test]
    fn categories() {
        assert_eq!(CoordinatorError::unknown_call("c1").category(), "recoverable");
        assert_eq!(
            CoordinatorError::registration_failed("acct-1", "timeout").category(),
            "degraded"
        );
        assert_eq!(
            CoordinatorError::DuplicateCall { call_id: "c1".into() }.category(),
            "fatal"
        );
    }
}
