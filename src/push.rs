//! Push wake queue
//!
//! A push notification can announce a call before the signaling engine has
//! confirmed it. The queue tracks those announcements until they are either
//! matched to a live call or expire, in which case the coordinator reports a
//! missed push call without ever creating a call context.
//!
//! Deadlines only ever extend: if two announcements for the same call id
//! arrive out of order, the later deadline wins and an earlier one can never
//! shorten it.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::call::CallId;

/// A call announced by push but not yet confirmed by the engine
#[derive(Debug, Clone)]
pub struct PushWakeEntry {
    /// The announced call id
    pub call_id: CallId,
    /// When the (first) announcement arrived
    pub received_at: DateTime<Utc>,
    /// When the announcement stops being answerable
    pub deadline: DateTime<Utc>,
}

/// Queue of push-announced call ids with expiry
///
/// All operations serialize on an internal lock and are safe to call from
/// any task.
///
/// # Examples
///
/// ```rust
/// use sipkeep::push::PushWakeQueue;
/// use chrono::{Duration, Utc};
///
/// let queue = PushWakeQueue::new();
/// let now = Utc::now();
/// queue.announce("call-1".to_string(), now + Duration::seconds(30));
///
/// assert!(queue.match_call(&"call-1".to_string(), now));
/// assert!(!queue.match_call(&"call-1".to_string(), now)); // already consumed
/// ```
#[derive(Debug, Default)]
pub struct PushWakeQueue {
    entries: Mutex<HashMap<CallId, PushWakeEntry>>,
}

impl PushWakeQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a push announcement for `call_id`.
    ///
    /// Re-announcing is idempotent; the deadline is extended monotonically
    /// and never shortened.
    pub fn announce(&self, call_id: CallId, deadline: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&call_id) {
            Some(entry) => {
                if deadline > entry.deadline {
                    debug!(call_id = %call_id, "Extended push wake deadline");
                    entry.deadline = deadline;
                } else {
                    debug!(call_id = %call_id, "Kept later push wake deadline");
                }
            }
            None => {
                debug!(call_id = %call_id, "Announced push wake call");
                entries.insert(
                    call_id.clone(),
                    PushWakeEntry {
                        call_id,
                        received_at: Utc::now(),
                        deadline,
                    },
                );
            }
        }
    }

    /// Consume the entry for `call_id`, reporting whether it was still valid.
    ///
    /// Returns `true` iff an unexpired entry existed at `now`. Unknown or
    /// expired ids log a warning and return `false`; that is a recoverable
    /// condition and the call itself proceeds regardless.
    pub fn match_call(&self, call_id: &CallId, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.remove(call_id) {
            Some(entry) if entry.deadline >= now => true,
            Some(_) => {
                warn!(call_id = %call_id, "Push wake entry expired before the engine confirmed it");
                false
            }
            None => {
                warn!(call_id = %call_id, "Incoming call without a push wake entry");
                false
            }
        }
    }

    /// Remove and return all entries whose deadline has passed.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<PushWakeEntry> {
        let mut entries = self.entries.lock().unwrap();
        let expired: Vec<CallId> = entries
            .values()
            .filter(|e| e.deadline < now)
            .map(|e| e.call_id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    /// Deadline currently recorded for `call_id`, if any.
    pub fn deadline_of(&self, call_id: &CallId) -> Option<DateTime<Utc>> {
        self.entries.lock().unwrap().get(call_id).map(|e| e.deadline)
    }

    /// Number of unmatched announcements.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether no announcements are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn deadline_extension_is_monotonic() {
        let queue = PushWakeQueue::new();
        let now = Utc::now();
        let d1 = now + Duration::seconds(10);
        let d2 = now + Duration::seconds(30);

        queue.announce("c1".to_string(), d1);
        queue.announce("c1".to_string(), d2);
        assert_eq!(queue.deadline_of(&"c1".to_string()), Some(d2));

        // An out-of-order earlier announcement must not shorten it.
        queue.announce("c1".to_string(), d1);
        assert_eq!(queue.deadline_of(&"c1".to_string()), Some(d2));
    }

    #[test]
    fn match_returns_true_then_false() {
        let queue = PushWakeQueue::new();
        let now = Utc::now();
        queue.announce("c1".to_string(), now + Duration::seconds(30));

        assert!(queue.match_call(&"c1".to_string(), now));
        assert!(!queue.match_call(&"c1".to_string(), now));
    }

    #[test]
    fn match_unknown_id_is_false() {
        let queue = PushWakeQueue::new();
        assert!(!queue.match_call(&"ghost".to_string(), Utc::now()));
    }

    #[test]
    fn match_past_deadline_is_false_and_consumes() {
        let queue = PushWakeQueue::new();
        let now = Utc::now();
        queue.announce("c1".to_string(), now + Duration::seconds(5));

        let later = now + Duration::seconds(6);
        assert!(!queue.match_call(&"c1".to_string(), later));
        assert!(queue.is_empty());
    }

    #[test]
    fn expire_drains_only_past_deadline() {
        let queue = PushWakeQueue::new();
        let now = Utc::now();
        queue.announce("old".to_string(), now - Duration::seconds(1));
        queue.announce("fresh".to_string(), now + Duration::seconds(30));

        let expired = queue.expire(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].call_id, "old");
        assert_eq!(queue.len(), 1);

        // A second sweep finds nothing new.
        assert!(queue.expire(now).is_empty());
    }
}
