//! Registration handling: engine state changes, backoff retries, and refresh

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::call::AccountId;
use crate::error::CoordinatorResult;
use crate::events::{CoordinatorEvent, RegistrationStateInfo, SessionEvent};
use crate::registration::RegistrationState;

use super::SessionCoordinator;

impl SessionCoordinator {
    // ===== ENGINE REGISTRATION EVENTS =====

    pub(super) async fn on_registration_event(
        &self,
        account_id: AccountId,
        state: RegistrationState,
        reason: Option<String>,
    ) {
        // Applying the transition bumps the retry generation, which cancels
        // whatever retry timer was pending for the previous state.
        let record = self.registrations.apply(&account_id, state);
        self.store.put(&account_id, state);
        info!(
            account_id = %account_id,
            state = %state,
            attempts = record.attempts,
            reason = ?reason,
            "Registration state changed"
        );

        self.emit(SessionEvent::RegistrationStateChanged {
            info: RegistrationStateInfo {
                account_id: account_id.clone(),
                state,
                attempts: record.attempts,
                reason,
                timestamp: Utc::now(),
            },
        })
        .await;

        if state.needs_retry() {
            self.schedule_registration_retry(&account_id);
        }
    }

    /// Schedule one backoff retry for `account_id`, replacing any pending one.
    ///
    /// The timer carries the fresh retry generation; a state change before it
    /// fires makes the token stale and the retry a no-op.
    pub(super) fn schedule_registration_retry(&self, account_id: &AccountId) {
        let attempts = self.registrations.attempts(account_id).max(1);
        let delay = self.config.backoff.jittered_delay_for_attempt(attempts);
        let token = self.registrations.next_retry_token(account_id);
        info!(
            account_id = %account_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling registration retry"
        );

        let tx = self.input_tx.clone();
        let account_id = account_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoordinatorEvent::RegistrationRetry { account_id, token });
        });
    }

    pub(super) async fn on_registration_retry(&self, account_id: AccountId, token: u64) {
        if !self.registrations.token_is_current(&account_id, token) {
            debug!(account_id = %account_id, "Stale registration retry, dropping");
            return;
        }
        if !self.registrations.state_of(&account_id).needs_retry() {
            debug!(account_id = %account_id, "Registration recovered, retry not needed");
            return;
        }

        info!(account_id = %account_id, "Retrying registration");
        if let Err(error) = self.engine.refresh_registration(&account_id).await {
            // The refresh command itself failed, so no engine event will
            // arrive to reschedule; do it here.
            warn!(account_id = %account_id, error = %error, "Registration retry command failed");
            self.emit(SessionEvent::CoordinatorError { error, call_id: None }).await;
            self.schedule_registration_retry(&account_id);
        }
    }

    // ===== REGISTRATION COMMANDS =====

    /// Ask the engine to re-send the REGISTER for one account.
    ///
    /// State updates arrive back through engine registration events.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when the refresh command fails.
    pub async fn refresh_registration(&self, account_id: &AccountId) -> CoordinatorResult<()> {
        info!(account_id = %account_id, "Refreshing registration on request");
        self.engine.refresh_registration(account_id).await
    }
}
