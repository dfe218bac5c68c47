//! # sipkeep - Mobile SIP Session Coordination
//!
//! This crate keeps a mobile SIP client's sessions coherent while the platform
//! works against it: apps get suspended mid-call, networks flap between WiFi
//! and cellular, push notifications announce calls before the signaling engine
//! knows about them, and background execution is rationed. It coordinates:
//! - **connectivity**: reachability classification with debounce and reconnect hints
//! - **push**: push-announced calls tracked until confirmed or expired
//! - **registry**: one authoritative context per live call
//! - **budget**: OS background execution windows for calls and registration
//! - **coordinator**: the state machine reconciling all of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipkeep::{CoordinatorConfig, SessionCoordinator};
//! use sipkeep::engine::SignalingEngine;
//! use sipkeep::events::{CoordinatorEvent, EngineEvent, CallEvent};
//!
//! # async fn run(engine: Arc<dyn SignalingEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = SessionCoordinator::builder(CoordinatorConfig::default())
//!     .engine(engine)
//!     .build()?;
//! let _pump = coordinator.start();
//!
//! // Platform glue forwards engine events into the queue:
//! coordinator.handle().send(CoordinatorEvent::Engine(EngineEvent::Call(
//!     CallEvent::Incoming { call_id: "call-1".into(), remote_uri: None },
//! )))?;
//!
//! // The application answers through commands:
//! coordinator.accept_call(&"call-1".into(), false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The coordinator is a pure state machine: the SIP engine, the notification
//! center, the budget source, and persistence are all injected as traits (see
//! [`engine`] and [`budget::BudgetHost`]). Inbound events from every
//! collaborator funnel through one single-consumer queue, so processing is
//! serialized and per-call ordering is preserved without component-level
//! locking discipline leaking into callers.
//!
//! Every externally visible effect is either a [`events::SessionEvent`] state
//! change or an explicit recoverable error event; processing never panics on
//! engine input.

#![warn(missing_docs)]

pub mod backoff;
pub mod budget;
pub mod call;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod push;
pub mod registration;
pub mod registry;

// Re-export main types
pub use backoff::BackoffConfig;
pub use budget::{BudgetKind, BudgetManager, TaskHandle};
pub use call::{AccountId, CallId, CallState};
pub use config::CoordinatorConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityState, LinkStatus};
pub use coordinator::{CoordinatorStats, SessionCoordinator, SessionCoordinatorBuilder};
pub use error::{CoordinatorError, CoordinatorResult};
pub use events::{CoordinatorEvent, SessionEvent, SessionEventHandler};
pub use push::PushWakeQueue;
pub use registration::RegistrationState;
pub use registry::{CallContext, CallRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
