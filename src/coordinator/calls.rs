//! Call handling: push announcements, engine call events, and call commands

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::budget::BudgetKind;
use crate::call::{CallId, CallState};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{CallEvent, CallStateInfo, PushEvent, SessionEvent};

use super::SessionCoordinator;

impl SessionCoordinator {
    // ===== PUSH ANNOUNCEMENTS =====

    pub(super) async fn on_push_event(&self, event: PushEvent) {
        let PushEvent::Received { call_id, deadline_hint } = event;

        // The engine may already know this call; a late push for a live call
        // carries no new information.
        if let Some(ctx) = self.registry.get(&call_id) {
            debug!(call_id = %call_id, state = %ctx.state, "Push for an already live call, ignoring");
            return;
        }

        let window = deadline_hint.unwrap_or(self.config.push_deadline);
        let window = chrono::Duration::from_std(window)
            .or_else(|_| chrono::Duration::from_std(self.config.push_deadline))
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let deadline = Utc::now() + window;
        info!(call_id = %call_id, deadline = %deadline, "Push announced incoming call");
        let first_announce = self.push_queue.deadline_of(&call_id).is_none();
        self.push_queue.announce(call_id.clone(), deadline);

        // Re-announces only move the deadline; the state was reported already.
        if first_announce {
            self.emit(SessionEvent::CallStateChanged {
                info: CallStateInfo {
                    call_id,
                    new_state: CallState::Announced,
                    previous_state: None,
                    reason: None,
                    timestamp: Utc::now(),
                },
            })
            .await;
        }
    }

    // ===== ENGINE CALL EVENTS =====

    pub(super) async fn on_call_event(&self, event: CallEvent) {
        match event {
            CallEvent::Incoming { call_id, remote_uri } => {
                self.on_incoming_call(call_id, remote_uri).await;
            }
            CallEvent::Active { call_id } => {
                self.apply_call_state(&call_id, CallState::Active, None).await;
            }
            CallEvent::Paused { call_id } => {
                self.apply_call_state(&call_id, CallState::Paused, None).await;
            }
            CallEvent::Ended { call_id } => {
                self.terminate_call(&call_id, "ended by engine").await;
            }
            CallEvent::Error { call_id, reason } => {
                warn!(call_id = %call_id, reason = %reason, "Engine reported call error");
                self.emit(SessionEvent::CoordinatorError {
                    error: CoordinatorError::engine(reason),
                    call_id: Some(call_id),
                })
                .await;
            }
        }
    }

    async fn on_incoming_call(&self, call_id: CallId, remote_uri: Option<String>) {
        let matched = self.push_queue.match_call(&call_id, Utc::now());
        info!(
            call_id = %call_id,
            remote_uri = ?remote_uri,
            push_matched = matched,
            "Incoming call confirmed by engine"
        );

        if let Some(stale) = self.registry.create(call_id.clone()) {
            // Uniqueness breach: tear the stale context down and report it,
            // then let the new call proceed.
            if let Some(handle) = stale.budget {
                self.budgets.release(handle);
            }
            if let Some(notification) = stale.pending_notification {
                self.notifications.cancel(notification);
            }
            self.emit(SessionEvent::CoordinatorError {
                error: CoordinatorError::DuplicateCall { call_id: call_id.clone() },
                call_id: Some(call_id.clone()),
            })
            .await;
        }

        // A push-matched call already has the platform's notification on
        // screen; only unannounced calls get a local one.
        let notification = if matched {
            None
        } else {
            Some(self.notifications.post_incoming_call(&call_id))
        };
        self.registry.update(&call_id, |ctx| {
            ctx.push_matched = matched;
            ctx.pending_notification = notification;
        });

        self.emit(SessionEvent::CallStateChanged {
            info: CallStateInfo {
                call_id,
                new_state: CallState::Ringing,
                previous_state: matched.then_some(CallState::Announced),
                reason: None,
                timestamp: Utc::now(),
            },
        })
        .await;
    }

    /// Move a live call to `new_state`, emitting the transition.
    ///
    /// Unknown ids are logged no-ops surfaced as a recoverable error event;
    /// repeated identical states are silent.
    pub(super) async fn apply_call_state(
        &self,
        call_id: &CallId,
        new_state: CallState,
        reason: Option<&str>,
    ) {
        let mut previous = None;
        let mut changed = false;
        let found = self.registry.update(call_id, |ctx| {
            previous = Some(ctx.state);
            if ctx.state != new_state {
                ctx.state = new_state;
                changed = true;
            }
        });

        if !found {
            warn!(call_id = %call_id, target = %new_state, "Transition for unknown call id, ignoring");
            self.emit(SessionEvent::CoordinatorError {
                error: CoordinatorError::unknown_call(call_id.clone()),
                call_id: Some(call_id.clone()),
            })
            .await;
            return;
        }
        if !changed {
            debug!(call_id = %call_id, state = %new_state, "Call already in target state");
            return;
        }

        info!(call_id = %call_id, from = ?previous, to = %new_state, "Call state changed");
        self.emit(SessionEvent::CallStateChanged {
            info: CallStateInfo {
                call_id: call_id.clone(),
                new_state,
                previous_state: previous,
                reason: reason.map(String::from),
                timestamp: Utc::now(),
            },
        })
        .await;
    }

    /// Full teardown on the terminal transition: release the budget, cancel
    /// the pending notification, drop the context, emit `Terminated`.
    pub(super) async fn terminate_call(&self, call_id: &CallId, reason: &str) {
        let Some(ctx) = self.registry.remove(call_id) else {
            warn!(call_id = %call_id, "Terminal event for unknown call id, ignoring");
            self.emit(SessionEvent::CoordinatorError {
                error: CoordinatorError::unknown_call(call_id.clone()),
                call_id: Some(call_id.clone()),
            })
            .await;
            return;
        };

        if let Some(handle) = ctx.budget {
            self.budgets.release(handle);
        }
        if let Some(notification) = ctx.pending_notification {
            self.notifications.cancel(notification);
        }

        info!(call_id = %call_id, from = %ctx.state, reason = %reason, "Call terminated");
        self.emit(SessionEvent::CallStateChanged {
            info: CallStateInfo {
                call_id: call_id.clone(),
                new_state: CallState::Terminated,
                previous_state: Some(ctx.state),
                reason: Some(reason.to_string()),
                timestamp: Utc::now(),
            },
        })
        .await;
    }

    // ===== CALL COMMANDS =====

    /// Accept an incoming call.
    ///
    /// Tells the engine to answer, moves the call to `Active`, and tries to
    /// secure a background budget for it. A budget shortfall degrades the
    /// call (it will be paused on backgrounding) instead of failing the
    /// accept.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when the answer command itself fails; the
    /// call context is left in `Ringing` in that case.
    pub async fn accept_call(&self, call_id: &CallId, with_video: bool) -> CoordinatorResult<()> {
        let Some(ctx) = self.registry.get(call_id) else {
            warn!(call_id = %call_id, "Accept for unknown call id, ignoring");
            self.emit(SessionEvent::CoordinatorError {
                error: CoordinatorError::unknown_call(call_id.clone()),
                call_id: Some(call_id.clone()),
            })
            .await;
            return Ok(());
        };
        if ctx.state != CallState::Ringing {
            debug!(call_id = %call_id, state = %ctx.state, "Accept for a call that is not ringing");
            return Ok(());
        }

        self.engine.accept(call_id, with_video).await?;

        // One budget per context lifetime; running out is a degraded path,
        // not a failure.
        let grant = match self.budgets.acquire(BudgetKind::Call, call_id.clone()) {
            Ok(grant) => Some(grant.handle),
            Err(error) => {
                warn!(call_id = %call_id, error = %error, "Call proceeds without a background budget");
                self.emit(SessionEvent::CoordinatorError {
                    error,
                    call_id: Some(call_id.clone()),
                })
                .await;
                None
            }
        };
        self.registry.update(call_id, |ctx| {
            ctx.video_requested = with_video;
            ctx.budget = grant;
            ctx.budget_less = grant.is_none();
            if let Some(notification) = ctx.pending_notification.take() {
                self.notifications.cancel(notification);
            }
        });

        self.apply_call_state(call_id, CallState::Active, Some("accepted")).await;
        Ok(())
    }

    /// Decline an incoming call. The engine confirms with an `Ended` event,
    /// which drives the usual teardown.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when the reject command fails.
    pub async fn reject_call(&self, call_id: &CallId) -> CoordinatorResult<()> {
        if self.registry.get(call_id).is_none() {
            warn!(call_id = %call_id, "Reject for unknown call id, ignoring");
            return Ok(());
        }
        info!(call_id = %call_id, "Rejecting incoming call");
        self.engine.reject(call_id).await
    }

    /// Hang up a live call. The engine confirms with an `Ended` event.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when the hangup command fails.
    pub async fn hangup_call(&self, call_id: &CallId) -> CoordinatorResult<()> {
        if self.registry.get(call_id).is_none() {
            warn!(call_id = %call_id, "Hangup for unknown call id, ignoring");
            return Ok(());
        }
        info!(call_id = %call_id, "Hanging up call");
        self.engine.hangup(call_id).await
    }
}
