//! Core closed-loop logic.
//!
//! This module contains:
//! - SerialWorkQueue: per-transaction serialization
//! - StepContext and the property resolver
//! - Step: one remediation sub-operation with its preprocessors
//! - ControlLoopProcessor: walks the operational policy graph
//! - EventManager: the per-transaction state machine
//! - Controller: policy tables and event dispatch

pub mod context;
pub mod controller;
pub mod inventory;
pub mod locks;
pub mod manager;
pub mod processor;
pub mod properties;
pub mod step;
pub mod validation;
pub mod work_queue;

// Re-export commonly used types
pub use context::{ContextError, StepContext};
pub use controller::{Controller, Dispatch};
pub use inventory::InventoryResponse;
pub use locks::TargetLocks;
pub use manager::{EventManager, ManagerServices, ManagerState};
pub use processor::{ControlLoopProcessor, ProcessorError};
pub use step::{Launcher, Step, StepError, StepKind};
pub use validation::{validate, ValidationError};
pub use work_queue::SerialWorkQueue;
