//! Domain types for the closed-loop engine.
//!
//! Value objects exchanged between the controller, the correlation managers
//! and the outside world: events, policies, outcomes and notifications.

pub mod event;
pub mod notification;
pub mod outcome;
pub mod policy;

pub use event::{ControlLoopEvent, EventStatus, NewEventStatus, TargetType};
pub use notification::{
    ControlLoopResponse, Notification, NotificationType, OperationRecord, OutboundMessage,
    NOTIFICATION_FROM,
};
pub use outcome::{FinalResult, OperationOutcome, OperationResult};
pub use policy::{
    ActorOperation, ControlLoopParams, OperationalPolicy, OperationalTarget, PolicyError,
    PolicyOperation, ToscaPolicy,
};

/// Object delivered by the inbound message source
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Policy(ToscaPolicy),
    Event(ControlLoopEvent),
    /// Anything else; left for other consumers
    Other(serde_json::Value),
}
