//! Operation outcomes and final results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::{NotificationType, OperationRecord};

/// Result of one remediation operation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationResult {
    Success,
    Failure,
    FailureTimeout,
    FailureRetries,
    FailureException,
    FailureGuard,
}

impl OperationResult {
    pub fn is_success(self) -> bool {
        self == OperationResult::Success
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationResult::Success => "SUCCESS",
            OperationResult::Failure => "FAILURE",
            OperationResult::FailureTimeout => "FAILURE_TIMEOUT",
            OperationResult::FailureRetries => "FAILURE_RETRIES",
            OperationResult::FailureException => "FAILURE_EXCEPTION",
            OperationResult::FailureGuard => "FAILURE_GUARD",
        };
        f.write_str(s)
    }
}

/// Terminal result of a control loop, named by the `final_*` policy ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalResult {
    FinalSuccess,
    FinalFailure,
    FinalFailureTimeout,
    FinalFailureRetries,
    FinalFailureException,
    FinalFailureGuard,
    FinalOpenloop,
}

impl FinalResult {
    /// Parse a policy id such as `final_success`; `None` for regular operation ids
    pub fn from_policy_id(id: &str) -> Option<Self> {
        match id {
            "final_success" => Some(FinalResult::FinalSuccess),
            "final_failure" => Some(FinalResult::FinalFailure),
            "final_failure_timeout" => Some(FinalResult::FinalFailureTimeout),
            "final_failure_retries" => Some(FinalResult::FinalFailureRetries),
            "final_failure_exception" => Some(FinalResult::FinalFailureException),
            "final_failure_guard" => Some(FinalResult::FinalFailureGuard),
            "final_openloop" => Some(FinalResult::FinalOpenloop),
            _ => None,
        }
    }

    pub fn policy_id(self) -> &'static str {
        match self {
            FinalResult::FinalSuccess => "final_success",
            FinalResult::FinalFailure => "final_failure",
            FinalResult::FinalFailureTimeout => "final_failure_timeout",
            FinalResult::FinalFailureRetries => "final_failure_retries",
            FinalResult::FinalFailureException => "final_failure_exception",
            FinalResult::FinalFailureGuard => "final_failure_guard",
            FinalResult::FinalOpenloop => "final_openloop",
        }
    }

    /// Notification type and message used for the FINAL notification
    pub fn notification(self) -> (NotificationType, Option<&'static str>) {
        match self {
            FinalResult::FinalSuccess => (NotificationType::FinalSuccess, None),
            FinalResult::FinalOpenloop => (NotificationType::FinalOpenloop, None),
            FinalResult::FinalFailureException => (
                NotificationType::FinalFailure,
                Some("Exception in processing closed loop"),
            ),
            _ => (NotificationType::FinalFailure, None),
        }
    }
}

impl fmt::Display for FinalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.policy_id().to_uppercase())
    }
}

/// Outcome reported by a remediation operation, either at start or completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub actor: String,
    pub operation: String,
    pub target: Option<String>,
    pub start: DateTime<Utc>,
    /// `None` for a start outcome
    pub end: Option<DateTime<Utc>>,
    pub result: OperationResult,
    pub message: Option<String>,
    pub response: Option<serde_json::Value>,
    pub subrequest_id: Option<String>,
    /// Payload destined for an external control-loop response
    pub control_loop_payload: Option<String>,
}

impl OperationOutcome {
    /// Outcome marking the start of an operation
    pub fn started(actor: &str, operation: &str, target: Option<String>) -> Self {
        Self {
            actor: actor.to_string(),
            operation: operation.to_string(),
            target,
            start: Utc::now(),
            end: None,
            result: OperationResult::Success,
            message: None,
            response: None,
            subrequest_id: None,
            control_loop_payload: None,
        }
    }

    /// Mark the outcome complete with the given result
    pub fn complete(mut self, result: OperationResult) -> Self {
        self.end = Some(Utc::now());
        self.result = result;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn is_start(&self) -> bool {
        self.end.is_none()
    }

    pub fn is_for(&self, actor: &str, operation: &str) -> bool {
        self.actor == actor && self.operation == operation
    }

    /// History record for this outcome
    pub fn to_record(&self) -> OperationRecord {
        OperationRecord {
            actor: self.actor.clone(),
            operation: self.operation.clone(),
            target: self.target.clone(),
            start: Some(self.start),
            end: self.end,
            subrequest_id: self.subrequest_id.clone(),
            outcome: Some(if self.is_start() {
                "Started".to_string()
            } else {
                self.result.to_string()
            }),
            message: self.message.clone(),
        }
    }
}
