//! Call context registry
//!
//! One [`CallContext`] per live call, owned exclusively by the registry and
//! keyed by call id. No other component holds a strong reference; the
//! coordinator reads, mutates, and removes contexts through the registry API.
//!
//! Iteration works on a snapshot: [`CallRegistry::for_each`] clones the
//! current entries first, so a callback that mutates the registry through its
//! API never invalidates the traversal.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use crate::budget::TaskHandle;
use crate::call::{CallId, CallState};
use crate::engine::NotificationHandle;

/// Client-side bookkeeping for one call
///
/// The engine owns the call itself; this records everything the coordinator
/// layers on top: the state machine position, background budget, pending
/// local notification, and one opaque payload slot for application data
/// (replacing the original design's untyped per-call dictionary).
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The call this context belongs to
    pub call_id: CallId,
    /// Position in the coordinator's call state machine
    pub state: CallState,
    /// Whether the user asked for video on accept
    pub video_requested: bool,
    /// Whether the low-battery warning was already shown for this call
    pub battery_warning_shown: bool,
    /// Whether the incoming call was matched to a push announcement;
    /// matched calls suppress the local incoming-call notification
    pub push_matched: bool,
    /// Local notification posted for this call, if any
    pub pending_notification: Option<NotificationHandle>,
    /// Background execution budget held for this call, if any
    pub budget: Option<TaskHandle>,
    /// Set when a budget could not be acquired; cleanup on backgrounding is
    /// more aggressive for budget-less calls
    pub budget_less: bool,
    /// When the context was created
    pub created_at: DateTime<Utc>,
    /// Application-defined side channel; the single opaque payload slot
    pub aux: Option<serde_json::Value>,
}

impl CallContext {
    fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            state: CallState::Ringing,
            video_requested: false,
            battery_warning_shown: false,
            push_matched: false,
            pending_notification: None,
            budget: None,
            budget_less: false,
            created_at: Utc::now(),
            aux: None,
        }
    }
}

/// Registry of live call contexts
///
/// Thread-safe; every operation may be called from any task. Size is bounded
/// only by concurrently live calls: a context never survives its terminal
/// engine event plus teardown.
///
/// # Examples
///
/// ```rust
/// use sipkeep::registry::CallRegistry;
/// use sipkeep::call::CallState;
///
/// let registry = CallRegistry::new();
/// registry.create("call-1".to_string());
/// registry.update(&"call-1".to_string(), |ctx| ctx.state = CallState::Active);
///
/// let ctx = registry.get(&"call-1".to_string()).unwrap();
/// assert_eq!(ctx.state, CallState::Active);
/// ```
#[derive(Debug, Default)]
pub struct CallRegistry {
    contexts: DashMap<CallId, CallContext>,
}

impl CallRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for `call_id`, returning the evicted previous context
    /// if one was still live.
    ///
    /// Two live contexts for one call id is the fatal invariant breach of the
    /// public contract. The registry favors availability: the stale entry is
    /// evicted, the new call proceeds, and the caller reports the condition.
    pub fn create(&self, call_id: CallId) -> Option<CallContext> {
        let fresh = CallContext::new(call_id.clone());
        let evicted = self.contexts.insert(call_id.clone(), fresh);
        if evicted.is_some() {
            warn!(call_id = %call_id, "Evicted stale call context claiming the same id");
        }
        evicted
    }

    /// Snapshot of the context for `call_id`.
    pub fn get(&self, call_id: &CallId) -> Option<CallContext> {
        self.contexts.get(call_id).map(|c| c.clone())
    }

    /// Mutate the context for `call_id` in place under the registry lock.
    ///
    /// Returns `false` (without calling `f`) when the id is unknown.
    pub fn update<F>(&self, call_id: &CallId, f: F) -> bool
    where
        F: FnOnce(&mut CallContext),
    {
        match self.contexts.get_mut(call_id) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Remove and return the context for `call_id`.
    pub fn remove(&self, call_id: &CallId) -> Option<CallContext> {
        self.contexts.remove(call_id).map(|(_, ctx)| ctx)
    }

    /// Visit a snapshot of all contexts.
    ///
    /// The callback receives clones; mutations made through the registry
    /// while iterating apply to the map, not to the snapshot.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&CallContext),
    {
        let snapshot: Vec<CallContext> = self.contexts.iter().map(|c| c.clone()).collect();
        for ctx in &snapshot {
            f(ctx);
        }
    }

    /// Ids of calls currently in the given state.
    pub fn ids_in_state(&self, state: CallState) -> Vec<CallId> {
        self.contexts
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.key().clone())
            .collect()
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no call is live.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_remove_roundtrip() {
        let registry = CallRegistry::new();
        assert!(registry.create("c1".to_string()).is_none());

        let ctx = registry.get(&"c1".to_string()).unwrap();
        assert_eq!(ctx.state, CallState::Ringing);
        assert!(!ctx.video_requested);

        assert!(registry.remove(&"c1".to_string()).is_some());
        assert!(registry.get(&"c1".to_string()).is_none());
    }

    #[test]
    fn duplicate_create_evicts_previous() {
        let registry = CallRegistry::new();
        registry.create("c1".to_string());
        registry.update(&"c1".to_string(), |ctx| ctx.state = CallState::Active);

        let evicted = registry.create("c1".to_string()).unwrap();
        assert_eq!(evicted.state, CallState::Active);

        // Uniqueness holds: exactly one live context for the id remains.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"c1".to_string()).unwrap().state, CallState::Ringing);
    }

    #[test]
    fn update_unknown_id_is_noop() {
        let registry = CallRegistry::new();
        let mut touched = false;
        let found = registry.update(&"ghost".to_string(), |_| touched = true);
        assert!(!found);
        assert!(!touched);
    }

    #[test]
    fn for_each_tolerates_mutation_during_iteration() {
        let registry = CallRegistry::new();
        registry.create("c1".to_string());
        registry.create("c2".to_string());

        let mut visited = 0;
        registry.for_each(|ctx| {
            visited += 1;
            // Removing while iterating must not invalidate the snapshot.
            registry.remove(&ctx.call_id);
        });

        assert_eq!(visited, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn aux_payload_round_trips_through_update() {
        let registry = CallRegistry::new();
        registry.create("c1".to_string());
        assert!(registry.get(&"c1".to_string()).unwrap().aux.is_none());

        registry.update(&"c1".to_string(), |ctx| {
            ctx.aux = Some(serde_json::json!({ "crm_ticket": 42 }));
        });

        let aux = registry.get(&"c1".to_string()).unwrap().aux.unwrap();
        assert_eq!(aux["crm_ticket"], 42);
    }

    #[test]
    fn ids_in_state_filters() {
        let registry = CallRegistry::new();
        registry.create("c1".to_string());
        registry.create("c2".to_string());
        registry.update(&"c2".to_string(), |ctx| ctx.state = CallState::Active);

        assert_eq!(registry.ids_in_state(CallState::Active), vec!["c2".to_string()]);
        assert_eq!(registry.ids_in_state(CallState::Ringing), vec!["c1".to_string()]);
    }
}
