//! Notifications emitted by correlation managers.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{ControlLoopEvent, TargetType};

/// Sender recorded on every notification
pub const NOTIFICATION_FROM: &str = "policy";

/// Kind of notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Active,
    Rejected,
    Operation,
    OperationSuccess,
    OperationFailure,
    FinalSuccess,
    FinalFailure,
    FinalOpenloop,
}

impl NotificationType {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            NotificationType::FinalSuccess
                | NotificationType::FinalFailure
                | NotificationType::FinalOpenloop
        )
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationType::Active => "ACTIVE",
            NotificationType::Rejected => "REJECTED",
            NotificationType::Operation => "OPERATION",
            NotificationType::OperationSuccess => "OPERATION_SUCCESS",
            NotificationType::OperationFailure => "OPERATION_FAILURE",
            NotificationType::FinalSuccess => "FINAL_SUCCESS",
            NotificationType::FinalFailure => "FINAL_FAILURE",
            NotificationType::FinalOpenloop => "FINAL_OPENLOOP",
        };
        f.write_str(s)
    }
}

/// One entry of a transaction's operation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub actor: String,
    pub operation: String,
    pub target: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub subrequest_id: Option<String>,
    pub outcome: Option<String>,
    pub message: Option<String>,
}

impl OperationRecord {
    /// Short description used while an operation is in flight
    pub fn to_message(&self) -> String {
        format!(
            "actor={} operation={} target={} subRequestId={}",
            self.actor,
            self.operation,
            self.target.as_deref().unwrap_or(""),
            self.subrequest_id.as_deref().unwrap_or("")
        )
    }

    /// Description including the outcome, used once an operation completes
    pub fn to_history(&self) -> String {
        format!(
            "actor={} operation={} target={} start={} end={} subrequestId={} outcome={} message={}",
            self.actor,
            self.operation,
            self.target.as_deref().unwrap_or(""),
            self.start.map(|t| t.to_rfc3339()).unwrap_or_default(),
            self.end.map(|t| t.to_rfc3339()).unwrap_or_default(),
            self.subrequest_id.as_deref().unwrap_or(""),
            self.outcome.as_deref().unwrap_or(""),
            self.message.as_deref().unwrap_or("")
        )
    }
}

/// Status notification for one control-loop transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub closed_loop_control_name: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "requestID")]
    pub request_id: Option<Uuid>,
    pub closed_loop_event_client: Option<String>,
    #[serde(rename = "target_type")]
    pub target_type: Option<TargetType>,
    pub target: Option<String>,
    pub from: String,
    pub policy_scope: Option<String>,
    pub policy_name: Option<String>,
    pub policy_version: Option<String>,
    pub notification: NotificationType,
    pub message: Option<String>,
    pub notification_time: DateTime<Utc>,
    pub op_seq_num: u32,
    #[serde(default)]
    pub history: Vec<OperationRecord>,
    #[serde(rename = "AAI", default)]
    pub aai: HashMap<String, String>,
}

impl Notification {
    /// Notification describing `event`, without policy details
    pub fn for_event(event: &ControlLoopEvent, notification: NotificationType) -> Self {
        Self {
            closed_loop_control_name: event.closed_loop_control_name.clone(),
            version: event.version.clone(),
            request_id: event.request_id,
            closed_loop_event_client: event.closed_loop_event_client.clone(),
            target_type: event.target_type,
            target: event.target.clone(),
            from: NOTIFICATION_FROM.to_string(),
            policy_scope: None,
            policy_name: None,
            policy_version: None,
            notification,
            message: None,
            notification_time: Utc::now(),
            op_seq_num: 0,
            history: Vec::new(),
            aai: event.aai.clone(),
        }
    }

    pub fn with_policy(
        mut self,
        policy_name: impl Into<String>,
        policy_scope: impl Into<String>,
        policy_version: impl Into<String>,
    ) -> Self {
        self.policy_name = Some(policy_name.into());
        self.policy_scope = Some(policy_scope.into());
        self.policy_version = Some(policy_version.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Response sent back to the event originator on behalf of an actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLoopResponse {
    pub closed_loop_control_name: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "requestID")]
    pub request_id: Option<Uuid>,
    pub target: String,
    pub from: String,
    pub policy_name: Option<String>,
    pub policy_version: Option<String>,
    pub payload: Option<String>,
}

/// Anything published by the engine on a named channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Notification(Notification),
    Response(ControlLoopResponse),
}

impl OutboundMessage {
    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            OutboundMessage::Notification(n) => Some(n),
            OutboundMessage::Response(_) => None,
        }
    }
}
