//! Background task budget management
//!
//! Mobile platforms grant bounded execution windows to backgrounded apps. The
//! manager tracks the windows the OS has granted to this client: one per call
//! context lifetime for in-call work, and at most one outstanding window for
//! registration refresh.
//!
//! Acquisition goes through an injected [`BudgetHost`] so tests and desktop
//! builds can decide how generous the "OS" is. Running out of budget is a
//! recoverable condition — callers fall back to a degraded path instead of
//! failing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoordinatorError, CoordinatorResult};

/// What a background budget was granted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BudgetKind {
    /// Keeping a call alive in the background
    Call,
    /// Refreshing the registration in the background
    Registration,
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetKind::Call => write!(f, "call"),
            BudgetKind::Registration => write!(f, "registration"),
        }
    }
}

/// Opaque handle to an OS-granted background execution window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub u64);

/// One granted background execution window
#[derive(Debug, Clone)]
pub struct BudgetGrant {
    /// OS handle for the window
    pub handle: TaskHandle,
    /// What the window was granted for
    pub kind: BudgetKind,
    /// Call id or account id the window belongs to
    pub owner: String,
    /// When the window was granted
    pub granted_at: DateTime<Utc>,
}

/// Source of background execution windows
///
/// `begin` returns `None` when the OS has no more time to grant. Both calls
/// return immediately; querying the platform must not block the caller
/// beyond the request itself.
pub trait BudgetHost: Send + Sync {
    /// Request a new execution window of the given kind.
    fn begin(&self, kind: BudgetKind) -> Option<TaskHandle>;

    /// Tell the OS the window is no longer needed.
    fn end(&self, handle: TaskHandle);
}

/// A counter-backed [`BudgetHost`] for tests and platforms without budgets
///
/// Grants up to `capacity` concurrent windows; releasing a window returns
/// its slot.
#[derive(Debug)]
pub struct StaticBudgetHost {
    remaining: AtomicI64,
    next_handle: AtomicU64,
}

impl StaticBudgetHost {
    /// Host that grants at most `capacity` concurrent windows.
    pub fn new(capacity: i64) -> Self {
        Self {
            remaining: AtomicI64::new(capacity),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Host that always grants.
    pub fn unlimited() -> Self {
        Self::new(i64::MAX)
    }
}

impl BudgetHost for StaticBudgetHost {
    fn begin(&self, _kind: BudgetKind) -> Option<TaskHandle> {
        let previous = self.remaining.fetch_sub(1, Ordering::SeqCst);
        if previous <= 0 {
            self.remaining.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        Some(TaskHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    fn end(&self, _handle: TaskHandle) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
    }
}

type ExpiryHook = Box<dyn Fn(&BudgetGrant) + Send + Sync>;

/// Tracks granted background budgets and enforces the grant invariants
///
/// - exactly one `Registration` budget may be outstanding at a time;
/// - `release` is idempotent: releasing twice frees the budget exactly once;
/// - when the OS announces revocation, [`BudgetManager::notify_expiring`]
///   invokes the registered hook synchronously so the coordinator can clean
///   up before forced termination.
pub struct BudgetManager {
    host: Arc<dyn BudgetHost>,
    grants: Mutex<HashMap<TaskHandle, BudgetGrant>>,
    expiry_hook: Mutex<Option<ExpiryHook>>,
}

impl std::fmt::Debug for BudgetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetManager")
            .field("grants", &self.grants.lock().unwrap().len())
            .finish()
    }
}

impl BudgetManager {
    /// Create a manager drawing windows from `host`.
    pub fn new(host: Arc<dyn BudgetHost>) -> Self {
        Self {
            host,
            grants: Mutex::new(HashMap::new()),
            expiry_hook: Mutex::new(None),
        }
    }

    /// Register the hook invoked synchronously when a budget is about to
    /// expire, replacing any previous one.
    pub fn set_expiry_hook<F>(&self, hook: F)
    where
        F: Fn(&BudgetGrant) + Send + Sync + 'static,
    {
        *self.expiry_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Acquire a budget of `kind` on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// * [`CoordinatorError::BudgetAlreadyHeld`] — a `Registration` budget is
    ///   requested while one is outstanding
    /// * [`CoordinatorError::BudgetExhausted`] — the host granted nothing;
    ///   the caller must degrade rather than fail
    pub fn acquire(&self, kind: BudgetKind, owner: impl Into<String>) -> CoordinatorResult<BudgetGrant> {
        let owner = owner.into();
        let mut grants = self.grants.lock().unwrap();

        if kind == BudgetKind::Registration
            && grants.values().any(|g| g.kind == BudgetKind::Registration)
        {
            return Err(CoordinatorError::BudgetAlreadyHeld);
        }

        let handle = self
            .host
            .begin(kind)
            .ok_or(CoordinatorError::BudgetExhausted { kind })?;

        let grant = BudgetGrant {
            handle,
            kind,
            owner: owner.clone(),
            granted_at: Utc::now(),
        };
        debug!(kind = %kind, owner = %owner, handle = handle.0, "Acquired background budget");
        grants.insert(handle, grant.clone());
        Ok(grant)
    }

    /// Release a budget. Idempotent: unknown handles are silent no-ops.
    pub fn release(&self, handle: TaskHandle) {
        let removed = self.grants.lock().unwrap().remove(&handle);
        match removed {
            Some(grant) => {
                debug!(kind = %grant.kind, owner = %grant.owner, handle = handle.0, "Released background budget");
                self.host.end(handle);
            }
            None => {
                debug!(handle = handle.0, "Budget already released");
            }
        }
    }

    /// Handle an OS revocation warning for `handle`.
    ///
    /// Invokes the expiry hook synchronously and returns the grant so the
    /// caller can act on its owner. The grant stays held; the coordinator
    /// decides when to release it.
    pub fn notify_expiring(&self, handle: TaskHandle) -> Option<BudgetGrant> {
        let grant = self.grants.lock().unwrap().get(&handle).cloned();
        match grant {
            Some(grant) => {
                warn!(kind = %grant.kind, owner = %grant.owner, handle = handle.0, "Background budget about to expire");
                if let Some(hook) = self.expiry_hook.lock().unwrap().as_ref() {
                    hook(&grant);
                }
                Some(grant)
            }
            None => {
                debug!(handle = handle.0, "Expiry warning for unknown budget handle");
                None
            }
        }
    }

    /// Whether a `Registration` budget is outstanding.
    pub fn holds_registration(&self) -> bool {
        self.grants
            .lock()
            .unwrap()
            .values()
            .any(|g| g.kind == BudgetKind::Registration)
    }

    /// The outstanding `Registration` grant, if any.
    pub fn registration_grant(&self) -> Option<BudgetGrant> {
        self.grants
            .lock()
            .unwrap()
            .values()
            .find(|g| g.kind == BudgetKind::Registration)
            .cloned()
    }

    /// Number of outstanding grants.
    pub fn outstanding(&self) -> usize {
        self.grants.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_capacity(capacity: i64) -> BudgetManager {
        BudgetManager::new(Arc::new(StaticBudgetHost::new(capacity)))
    }

    #[test]
    fn second_registration_acquire_is_already_held() {
        let manager = manager_with_capacity(10);
        manager.acquire(BudgetKind::Registration, "acct-1").unwrap();

        let err = manager.acquire(BudgetKind::Registration, "acct-1").unwrap_err();
        assert!(matches!(err, CoordinatorError::BudgetAlreadyHeld));
    }

    #[test]
    fn registration_reacquire_after_release() {
        let manager = manager_with_capacity(10);
        let grant = manager.acquire(BudgetKind::Registration, "acct-1").unwrap();
        manager.release(grant.handle);
        assert!(manager.acquire(BudgetKind::Registration, "acct-1").is_ok());
    }

    #[test]
    fn exhausted_host_is_recoverable() {
        let manager = manager_with_capacity(0);
        let err = manager.acquire(BudgetKind::Call, "c1").unwrap_err();
        assert!(matches!(err, CoordinatorError::BudgetExhausted { kind: BudgetKind::Call }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn release_is_idempotent() {
        let manager = manager_with_capacity(1);
        let grant = manager.acquire(BudgetKind::Call, "c1").unwrap();

        manager.release(grant.handle);
        manager.release(grant.handle); // no panic, no double free

        // The single slot is free again exactly once.
        assert!(manager.acquire(BudgetKind::Call, "c2").is_ok());
        assert!(manager.acquire(BudgetKind::Call, "c3").is_err());
    }

    #[test]
    fn expiry_hook_runs_synchronously() {
        let manager = manager_with_capacity(5);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        manager.set_expiry_hook(move |grant| sink.lock().unwrap().push(grant.owner.clone()));

        let grant = manager.acquire(BudgetKind::Call, "call-1").unwrap();
        let seen = manager.notify_expiring(grant.handle).unwrap();
        assert_eq!(seen.owner, "call-1");
        assert_eq!(*fired.lock().unwrap(), vec!["call-1".to_string()]);

        // The grant is still held until explicitly released.
        assert_eq!(manager.outstanding(), 1);
    }

    #[test]
    fn expiry_warning_for_unknown_handle_is_noop() {
        let manager = manager_with_capacity(5);
        assert!(manager.notify_expiring(TaskHandle(999)).is_none());
    }

    #[test]
    fn call_budgets_are_independent_of_registration() {
        let manager = manager_with_capacity(10);
        manager.acquire(BudgetKind::Call, "c1").unwrap();
        manager.acquire(BudgetKind::Call, "c2").unwrap();
        manager.acquire(BudgetKind::Registration, "acct").unwrap();
        assert_eq!(manager.outstanding(), 3);
    }
}
