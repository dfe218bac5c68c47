//! Registration state tracking per account
//!
//! The coordinator mirrors the signaling engine's per-account registration
//! state and layers a retry policy on top of it: a `Failed` state engages
//! capped exponential backoff, an `Ok` state cancels any pending retry.
//!
//! Retry timers are cancelled *logically*: every record carries a retry
//! generation, scheduling a retry bumps the generation, and a timer that
//! fires with a stale generation is ignored. This guarantees a replacement
//! timer is never shadowed by its predecessor.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::call::AccountId;

/// Registration state of one account, as reported by the signaling engine
///
/// # Examples
///
/// ```rust
/// use sipkeep::registration::RegistrationState;
///
/// assert!(RegistrationState::Failed.needs_retry());
/// assert!(!RegistrationState::Ok.needs_retry());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No registration attempted yet
    None,
    /// REGISTER sent, awaiting the registrar's answer
    Progress,
    /// Registration accepted and valid
    Ok,
    /// Registration rejected or timed out; backoff retry engaged
    Failed,
    /// Registration explicitly removed by the client
    Cleared,
}

impl RegistrationState {
    /// Whether this state should trigger the backoff retry policy.
    pub fn needs_retry(&self) -> bool {
        matches!(self, RegistrationState::Failed)
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::None => write!(f, "None"),
            RegistrationState::Progress => write!(f, "Progress"),
            RegistrationState::Ok => write!(f, "Ok"),
            RegistrationState::Failed => write!(f, "Failed"),
            RegistrationState::Cleared => write!(f, "Cleared"),
        }
    }
}

/// Per-account registration bookkeeping
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    /// Last state reported by the engine
    pub state: RegistrationState,
    /// Consecutive failures since the last successful registration
    pub attempts: u32,
    /// Current retry generation; timers carrying an older value are stale
    pub retry_generation: u64,
    /// When the state last changed
    pub last_change: DateTime<Utc>,
}

impl Default for RegistrationRecord {
    fn default() -> Self {
        Self {
            state: RegistrationState::None,
            attempts: 0,
            retry_generation: 0,
            last_change: Utc::now(),
        }
    }
}

/// Thread-safe table of registration records keyed by account id
#[derive(Debug, Default)]
pub struct RegistrationTable {
    records: DashMap<AccountId, RegistrationRecord>,
}

impl RegistrationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `account_id`, `None` if the account is unknown.
    pub fn state_of(&self, account_id: &AccountId) -> RegistrationState {
        self.records
            .get(account_id)
            .map(|r| r.state)
            .unwrap_or(RegistrationState::None)
    }

    /// Apply an engine-reported state change and return the updated record.
    ///
    /// `Failed` increments the attempt counter; `Ok` and `Cleared` reset it.
    /// Every transition bumps the retry generation, which cancels whatever
    /// retry timer was pending for the previous state.
    pub fn apply(&self, account_id: &AccountId, state: RegistrationState) -> RegistrationRecord {
        let mut entry = self.records.entry(account_id.clone()).or_default();
        entry.retry_generation += 1;
        match state {
            RegistrationState::Failed => entry.attempts += 1,
            RegistrationState::Ok | RegistrationState::Cleared => entry.attempts = 0,
            _ => {}
        }
        entry.state = state;
        entry.last_change = Utc::now();
        entry.clone()
    }

    /// Bump the retry generation for an account and return the new value.
    ///
    /// Used when scheduling a retry so an earlier pending timer becomes stale.
    pub fn next_retry_token(&self, account_id: &AccountId) -> u64 {
        let mut entry = self.records.entry(account_id.clone()).or_default();
        entry.retry_generation += 1;
        entry.retry_generation
    }

    /// Whether a retry token is still current for the account.
    pub fn token_is_current(&self, account_id: &AccountId, token: u64) -> bool {
        self.records
            .get(account_id)
            .map(|r| r.retry_generation == token)
            .unwrap_or(false)
    }

    /// Attempt count for computing the next backoff delay.
    pub fn attempts(&self, account_id: &AccountId) -> u32 {
        self.records.get(account_id).map(|r| r.attempts).unwrap_or(0)
    }

    /// Accounts currently in `Failed` state.
    pub fn failed_accounts(&self) -> Vec<AccountId> {
        self.records
            .iter()
            .filter(|r| r.state.needs_retry())
            .map(|r| r.key().clone())
            .collect()
    }

    /// Accounts whose state is anything but `Ok`, for foreground refresh.
    pub fn unhealthy_accounts(&self) -> Vec<AccountId> {
        self.records
            .iter()
            .filter(|r| r.state != RegistrationState::Ok)
            .map(|r| r.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_increments_attempts_ok_resets() {
        let table = RegistrationTable::new();
        let account = "acct-1".to_string();

        table.apply(&account, RegistrationState::Failed);
        table.apply(&account, RegistrationState::Failed);
        assert_eq!(table.attempts(&account), 2);

        table.apply(&account, RegistrationState::Ok);
        assert_eq!(table.attempts(&account), 0);
        assert_eq!(table.state_of(&account), RegistrationState::Ok);
    }

    #[test]
    fn state_change_invalidates_retry_token() {
        let table = RegistrationTable::new();
        let account = "acct-1".to_string();

        table.apply(&account, RegistrationState::Failed);
        let token = table.next_retry_token(&account);
        assert!(table.token_is_current(&account, token));

        // An Ok event cancels the pending retry.
        table.apply(&account, RegistrationState::Ok);
        assert!(!table.token_is_current(&account, token));
    }

    #[test]
    fn failed_accounts_listing() {
        let table = RegistrationTable::new();
        table.apply(&"a".to_string(), RegistrationState::Failed);
        table.apply(&"b".to_string(), RegistrationState::Ok);
        table.apply(&"c".to_string(), RegistrationState::Progress);

        let failed = table.failed_accounts();
        assert_eq!(failed, vec!["a".to_string()]);

        let mut unhealthy = table.unhealthy_accounts();
        unhealthy.sort();
        assert_eq!(unhealthy, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn unknown_account_defaults() {
        let table = RegistrationTable::new();
        let account = "ghost".to_string();
        assert_eq!(table.state_of(&account), RegistrationState::None);
        assert_eq!(table.attempts(&account), 0);
        assert!(!table.token_is_current(&account, 1));
    }
}
