//! Control-loop events.
//!
//! An event reports an anomaly (onset) or its clearing (abatement) for one
//! remediation transaction, identified by its request id.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status carried by a control-loop event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Onset,
    Abated,
}

/// Kind of entity an event or an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    #[serde(rename = "VM")]
    Vm,
    #[serde(rename = "VNF")]
    Vnf,
    #[serde(rename = "VFMODULE")]
    VfModule,
    #[serde(rename = "PNF")]
    Pnf,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetType::Vm => "VM",
            TargetType::Vnf => "VNF",
            TargetType::VfModule => "VFMODULE",
            TargetType::Pnf => "PNF",
        };
        f.write_str(s)
    }
}

/// Classification of an event delivered to an existing transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewEventStatus {
    FirstOnset,
    SubsequentOnset,
    FirstAbatement,
    SubsequentAbatement,
    SyntaxError,
}

/// A decoded control-loop event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLoopEvent {
    pub closed_loop_control_name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(rename = "requestID", default)]
    pub request_id: Option<Uuid>,

    #[serde(default)]
    pub closed_loop_alarm_start: Option<DateTime<Utc>>,

    #[serde(default)]
    pub closed_loop_alarm_end: Option<DateTime<Utc>>,

    #[serde(default)]
    pub closed_loop_event_client: Option<String>,

    #[serde(rename = "target_type", default)]
    pub target_type: Option<TargetType>,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub policy_scope: Option<String>,

    #[serde(default)]
    pub policy_name: Option<String>,

    #[serde(default)]
    pub policy_version: Option<String>,

    #[serde(default)]
    pub closed_loop_event_status: Option<EventStatus>,

    /// Enrichment data supplied by the upstream inventory process
    #[serde(rename = "AAI", default)]
    pub aai: HashMap<String, String>,

    #[serde(default)]
    pub additional_event_params: HashMap<String, String>,

    #[serde(default)]
    pub payload: Option<String>,
}

impl ControlLoopEvent {
    /// Create an onset event for the given control loop and request
    pub fn onset(closed_loop_control_name: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            closed_loop_control_name: Some(closed_loop_control_name.into()),
            request_id: Some(request_id),
            closed_loop_alarm_start: Some(Utc::now()),
            closed_loop_event_status: Some(EventStatus::Onset),
            ..Default::default()
        }
    }

    /// Create an abatement event for the given control loop and request
    pub fn abatement(closed_loop_control_name: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            closed_loop_control_name: Some(closed_loop_control_name.into()),
            request_id: Some(request_id),
            closed_loop_alarm_end: Some(Utc::now()),
            closed_loop_event_status: Some(EventStatus::Abated),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target_type: TargetType, target: impl Into<String>) -> Self {
        self.target_type = Some(target_type);
        self.target = Some(target.into());
        self
    }

    pub fn with_aai(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.aai.insert(key.into(), value.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Option<Uuid>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn is_onset(&self) -> bool {
        self.closed_loop_event_status == Some(EventStatus::Onset)
    }

    pub fn is_abatement(&self) -> bool {
        self.closed_loop_event_status == Some(EventStatus::Abated)
    }

    /// Control loop name, or an empty string when absent
    pub fn control_loop_name(&self) -> &str {
        self.closed_loop_control_name.as_deref().unwrap_or("")
    }
}
