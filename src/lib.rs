//! closed-loop - Event correlation and remediation engine
//!
//! Receives control-loop events (an ONSET reporting a fault, later an
//! ABATEMENT), correlates them into transactions keyed by request id, and
//! drives each transaction through the operations named by an operational
//! policy: target determination, locking, inventory queries, guard checks,
//! the remediation itself, and retries. Every transition is published as a
//! notification.
//!
//! # Architecture
//!
//! - Each transaction is owned by an `EventManager` whose mutations are
//!   serialized through a `SerialWorkQueue`
//! - Remediation operations run as tokio tasks and post their outcomes back
//!   to the owning manager's queue
//! - The `Controller` holds the policy tables and the manager registry
//!
//! # Modules
//!
//! - `adapters`: Operators and notification sinks
//! - `core`: Work queue, steps, policy processor, manager, controller
//! - `domain`: Events, policies, outcomes, notifications
//! - `config`: Configuration discovery
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Check a policy
//! clctl validate policy.yaml
//!
//! # Replay recorded events
//! clctl replay --policy policy.yaml --events events.jsonl --simulate
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{ActorService, CollectingSink, NotificationSink, Operator, SimulatedOperator};
pub use core::{Controller, Dispatch, EventManager, ManagerState, SerialWorkQueue};
pub use domain::{
    ControlLoopEvent, ControlLoopParams, FinalResult, InboundMessage, Notification,
    NotificationType, OperationResult, ToscaPolicy,
};
