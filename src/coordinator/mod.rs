//! Session coordinator: the top-level state machine
//!
//! The coordinator reconciles asynchronous signals — engine call and
//! registration events, push announcements, connectivity changes, OS
//! lifecycle transitions, and timers — into one consistent view of what calls
//! exist, what state each registration is in, and what should happen next.
//!
//! # Serialization
//!
//! Event sources run on independent tasks and feed a single-consumer queue;
//! [`SessionCoordinator::process`] additionally serializes on an internal
//! mutex so that commands invoked directly (tests, application calls) can
//! never interleave with queued events. Per-source arrival order is preserved
//! for each call id; no ordering is guaranteed across call ids.
//!
//! # Wiring
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipkeep::coordinator::SessionCoordinator;
//! use sipkeep::config::CoordinatorConfig;
//! use sipkeep::engine::SignalingEngine;
//!
//! # async fn wire(engine: Arc<dyn SignalingEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = SessionCoordinator::builder(CoordinatorConfig::default())
//!     .engine(engine)
//!     .build()?;
//! let _pump = coordinator.start();
//!
//! // Platform glue forwards events through the queue:
//! let sender = coordinator.handle();
//! # Ok(())
//! # }
//! ```

mod calls;
mod registration;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::budget::{BudgetHost, BudgetKind, BudgetManager, StaticBudgetHost};
use crate::call::CallState;
use crate::config::CoordinatorConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{
    NotificationGateway, NullNotificationGateway, NullRegistrationStore, RegistrationStore,
    SignalingEngine,
};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{
    ConnectivityEvent, CoordinatorEvent, EngineEvent, LifecycleEvent, SessionEvent,
    SessionEventHandler,
};
use crate::push::PushWakeQueue;
use crate::registration::RegistrationTable;
use crate::registry::CallRegistry;

/// Builder for [`SessionCoordinator`]
///
/// The signaling engine is required; every other collaborator has a null or
/// unlimited default suitable for tests.
pub struct SessionCoordinatorBuilder {
    config: CoordinatorConfig,
    engine: Option<Arc<dyn SignalingEngine>>,
    notifications: Arc<dyn NotificationGateway>,
    store: Arc<dyn RegistrationStore>,
    budget_host: Arc<dyn BudgetHost>,
}

impl SessionCoordinatorBuilder {
    /// Set the signaling engine collaborator (required).
    pub fn engine(mut self, engine: Arc<dyn SignalingEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the local-notification gateway.
    pub fn notifications(mut self, gateway: Arc<dyn NotificationGateway>) -> Self {
        self.notifications = gateway;
        self
    }

    /// Set the registration write-through store.
    pub fn registration_store(mut self, store: Arc<dyn RegistrationStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the background budget host.
    pub fn budget_host(mut self, host: Arc<dyn BudgetHost>) -> Self {
        self.budget_host = host;
        self
    }

    /// Validate the configuration and assemble the coordinator.
    pub fn build(self) -> CoordinatorResult<Arc<SessionCoordinator>> {
        self.config.validate()?;
        let engine = self.engine.ok_or_else(|| CoordinatorError::InvalidConfiguration {
            field: "engine".to_string(),
            reason: "a signaling engine is required".to_string(),
        })?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);

        let connectivity = Arc::new(ConnectivityMonitor::new(self.config.connectivity_debounce));
        {
            let tx = input_tx.clone();
            connectivity.set_observer(move |event| {
                let _ = tx.send(CoordinatorEvent::Connectivity(event));
            });
        }

        let budgets = BudgetManager::new(self.budget_host);
        budgets.set_expiry_hook(|grant| {
            warn!(kind = %grant.kind, owner = %grant.owner, "Fast cleanup window: budget expiring");
        });

        Ok(Arc::new(SessionCoordinator {
            id: Uuid::new_v4(),
            config: self.config,
            engine,
            notifications: self.notifications,
            store: self.store,
            registry: CallRegistry::new(),
            push_queue: PushWakeQueue::new(),
            budgets,
            registrations: RegistrationTable::new(),
            connectivity,
            event_handler: RwLock::new(None),
            event_tx,
            input_tx,
            input_rx: std::sync::Mutex::new(Some(input_rx)),
            sequencer: Mutex::new(()),
            in_background: AtomicBool::new(false),
        }))
    }
}

/// Snapshot of the coordinator's current activity
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Live call contexts
    pub live_calls: usize,
    /// Push announcements not yet matched or expired
    pub pending_push_calls: usize,
    /// Outstanding background budgets
    pub outstanding_budgets: usize,
    /// Whether the app is currently backgrounded
    pub in_background: bool,
}

/// The session coordinator
///
/// Construct through [`SessionCoordinator::builder`], then either call
/// [`start`](Self::start) to spawn the event pump or drive
/// [`process`](Self::process) directly for deterministic tests.
pub struct SessionCoordinator {
    /// Unique id of this coordinator instance, for log correlation
    pub id: Uuid,
    pub(crate) config: CoordinatorConfig,
    pub(crate) engine: Arc<dyn SignalingEngine>,
    pub(crate) notifications: Arc<dyn NotificationGateway>,
    pub(crate) store: Arc<dyn RegistrationStore>,
    /// Live call contexts, keyed by call id
    pub registry: CallRegistry,
    /// Push-announced calls awaiting engine confirmation
    pub push_queue: PushWakeQueue,
    /// Background execution budgets
    pub budgets: BudgetManager,
    /// Per-account registration records
    pub registrations: RegistrationTable,
    connectivity: Arc<ConnectivityMonitor>,
    event_handler: RwLock<Option<Arc<dyn SessionEventHandler>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    pub(crate) input_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    input_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<CoordinatorEvent>>>,
    sequencer: Mutex<()>,
    in_background: AtomicBool,
}

impl SessionCoordinator {
    /// Start building a coordinator for the given configuration.
    pub fn builder(config: CoordinatorConfig) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            config,
            engine: None,
            notifications: Arc::new(NullNotificationGateway),
            store: Arc::new(NullRegistrationStore),
            budget_host: Arc::new(StaticBudgetHost::unlimited()),
        }
    }

    /// Sender side of the single-consumer event queue.
    ///
    /// Platform glue clones this to forward engine, push, and lifecycle
    /// events. Producer timing is decoupled from processing; per-call-id
    /// arrival order is preserved.
    pub fn handle(&self) -> mpsc::UnboundedSender<CoordinatorEvent> {
        self.input_tx.clone()
    }

    /// The connectivity monitor; platform glue feeds raw reachability
    /// reports into it.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Register the observer for outbound [`SessionEvent`]s.
    pub async fn set_event_handler(&self, handler: Arc<dyn SessionEventHandler>) {
        *self.event_handler.write().await = Some(handler);
    }

    /// Subscribe to the broadcast stream of outbound events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the event pump: drains the queue and sweeps push deadlines.
    ///
    /// Panics if called twice; there is exactly one consumer.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self
            .input_rx
            .lock()
            .unwrap()
            .take()
            .expect("SessionCoordinator::start called twice");
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(coordinator.config.expiry_sweep_interval);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                coordinator_id = %coordinator.id,
                user_agent = %coordinator.config.user_agent,
                "Session coordinator running"
            );
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => coordinator.process(event).await,
                        None => {
                            info!("Event queue closed, coordinator stopping");
                            break;
                        }
                    },
                    _ = sweep.tick() => {
                        coordinator.process(CoordinatorEvent::SweepPushDeadlines).await;
                    }
                }
            }
        })
    }

    /// Process one event under the serialization point.
    ///
    /// The pump calls this for every queued event; tests may call it directly
    /// for deterministic, fully ordered runs.
    pub async fn process(&self, event: CoordinatorEvent) {
        let _serialized = self.sequencer.lock().await;
        debug!(event = ?event, "Processing coordinator event");
        match event {
            CoordinatorEvent::Engine(EngineEvent::Call(call_event)) => {
                self.on_call_event(call_event).await;
            }
            CoordinatorEvent::Engine(EngineEvent::Registration { account_id, state, reason }) => {
                self.on_registration_event(account_id, state, reason).await;
            }
            CoordinatorEvent::Push(push_event) => {
                self.on_push_event(push_event).await;
            }
            CoordinatorEvent::Lifecycle(lifecycle) => {
                self.on_lifecycle_event(lifecycle).await;
            }
            CoordinatorEvent::Connectivity(connectivity) => {
                self.on_connectivity_event(connectivity).await;
            }
            CoordinatorEvent::RegistrationRetry { account_id, token } => {
                self.on_registration_retry(account_id, token).await;
            }
            CoordinatorEvent::SweepPushDeadlines => {
                self.sweep_push_deadlines().await;
            }
        }
    }

    /// Current activity snapshot.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            live_calls: self.registry.len(),
            pending_push_calls: self.push_queue.len(),
            outstanding_budgets: self.budgets.outstanding(),
            in_background: self.in_background.load(Ordering::SeqCst),
        }
    }

    // ===== LIFECYCLE =====

    async fn on_lifecycle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::EnteredBackground => self.on_entered_background().await,
            LifecycleEvent::EnteredForeground => self.on_entered_foreground().await,
            LifecycleEvent::BudgetAboutToExpire(handle) => self.on_budget_expiring(handle).await,
        }
    }

    async fn on_entered_background(&self) {
        self.in_background.store(true, Ordering::SeqCst);
        info!("App entered background");

        // Keep the registration alive under a dedicated budget.
        match self.budgets.acquire(BudgetKind::Registration, "registration") {
            Ok(_) => debug!("Registration background budget acquired"),
            Err(CoordinatorError::BudgetAlreadyHeld) => {
                debug!("Registration budget already held");
            }
            Err(error) => {
                warn!(error = %error, "No background budget for registration refresh");
                self.emit(SessionEvent::CoordinatorError { error, call_id: None }).await;
            }
        }

        // Active calls without a budget cannot survive suspension.
        let mut to_pause = Vec::new();
        self.registry.for_each(|ctx| {
            if ctx.state == CallState::Active && ctx.budget.is_none() {
                to_pause.push(ctx.call_id.clone());
            }
        });
        for call_id in to_pause {
            self.apply_call_state(&call_id, CallState::Paused, Some("backgrounded without budget"))
                .await;
        }
    }

    async fn on_entered_foreground(&self) {
        self.in_background.store(false, Ordering::SeqCst);
        info!("App entered foreground");

        if let Some(grant) = self.budgets.registration_grant() {
            self.budgets.release(grant.handle);
        }

        // Resume calls that were parked for the background stay.
        let paused = self.registry.ids_in_state(CallState::Paused);
        for call_id in paused {
            self.apply_call_state(&call_id, CallState::Active, Some("foregrounded")).await;
        }

        // Registrations may have gone stale while suspended; refresh anything
        // that is not currently Ok.
        for account_id in self.registrations.unhealthy_accounts() {
            if let Err(error) = self.engine.refresh_registration(&account_id).await {
                warn!(account_id = %account_id, error = %error, "Foreground registration refresh failed");
                self.emit(SessionEvent::CoordinatorError { error, call_id: None }).await;
            }
        }
    }

    async fn on_budget_expiring(&self, handle: crate::budget::TaskHandle) {
        let Some(grant) = self.budgets.notify_expiring(handle) else {
            return;
        };
        match grant.kind {
            BudgetKind::Call => {
                let call_id = grant.owner.clone();
                self.registry.update(&call_id, |ctx| {
                    ctx.battery_warning_shown = true;
                    ctx.budget = None;
                    ctx.budget_less = true;
                });
                self.apply_call_state(&call_id, CallState::Paused, Some("background budget expiring"))
                    .await;
                self.budgets.release(handle);
            }
            BudgetKind::Registration => {
                self.budgets.release(handle);
            }
        }
    }

    // ===== CONNECTIVITY =====

    async fn on_connectivity_event(&self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::StateChanged(state) => {
                // Repeated identical states are idempotent no-ops by contract;
                // nothing to reconcile on a plain change.
                debug!(state = %state, "Connectivity state recorded");
            }
            ConnectivityEvent::ReconnectRequested(state) => {
                info!(state = %state, "Reconnect requested, retrying failed registrations");
                for account_id in self.registrations.failed_accounts() {
                    self.schedule_registration_retry(&account_id);
                }
            }
        }
    }

    // ===== PUSH EXPIRY =====

    async fn sweep_push_deadlines(&self) {
        let expired = self.push_queue.expire(chrono::Utc::now());
        for entry in expired {
            warn!(call_id = %entry.call_id, "Push-announced call expired unconfirmed");
            self.emit(SessionEvent::MissedPushCall { call_id: entry.call_id }).await;
        }
    }

    // ===== EVENT EMISSION =====

    pub(crate) async fn emit(&self, event: SessionEvent) {
        if let Some(handler) = self.event_handler.read().await.as_ref() {
            handler.on_event(event.clone()).await;
        }
        let _ = self.event_tx.send(event);
    }
}
