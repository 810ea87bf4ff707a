//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use closed_loop::adapters::{
    ActorService, CollectingSink, OperationRequest, Operator, OperatorOutput, SimulatedOperator,
};
use closed_loop::config::EngineSettings;
use closed_loop::domain::{ControlLoopEvent, Notification, NotificationType, TargetType, ToscaPolicy};
use closed_loop::Controller;

pub const CL_NAME: &str = "CL-TEST";
pub const POLICY_NAME: &str = "operational.restart";

/// Restart-a-VM policy with the given operation overrides
pub fn restart_policy(operation: Value) -> ToscaPolicy {
    restart_policy_with_timeout(operation, 3600)
}

pub fn restart_policy_with_timeout(operation: Value, timeout: u64) -> ToscaPolicy {
    let mut op = json!({
        "id": "restart",
        "operation": {
            "actor": "APPC",
            "operation": "Restart",
            "target": {"targetType": "VM"}
        }
    });

    if let (Some(base), Some(extra)) = (op.as_object_mut(), operation.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }

    ToscaPolicy {
        name: POLICY_NAME.into(),
        version: "1.0.0".into(),
        type_name: "onap.policies.controlloop.operational.common.Drools".into(),
        type_version: "1.0.0".into(),
        properties: json!({
            "id": CL_NAME,
            "timeout": timeout,
            "trigger": "restart",
            "operations": [op]
        }),
        metadata: HashMap::new(),
    }
}

/// Valid VM onset for `CL-TEST`
pub fn vm_onset(request_id: Uuid) -> ControlLoopEvent {
    ControlLoopEvent::onset(CL_NAME, request_id)
        .with_target(TargetType::Vm, "vserver.vserver-name")
        .with_aai("vserver.vserver-name", "vm-1")
        .with_aai("vserver.is-closed-loop-disabled", "false")
        .with_aai("vserver.prov-status", "ACTIVE")
}

/// Guard that permits and APPC restart that succeeds
pub fn default_actors(appc: SimulatedOperator) -> ActorService {
    ActorService::new()
        .with_operator(SimulatedOperator::new("GUARD", "Decision"))
        .with_operator(appc)
}

pub fn controller(actors: ActorService, sink: Arc<CollectingSink>) -> Controller {
    controller_with(EngineSettings::default(), actors, sink)
}

pub fn controller_with(settings: EngineSettings, actors: ActorService, sink: Arc<CollectingSink>) -> Controller {
    let controller = Controller::new("test", settings, actors, sink).unwrap();
    controller.start();
    controller
}

pub fn kinds(notifications: &[Notification]) -> Vec<NotificationType> {
    notifications.iter().map(|n| n.notification).collect()
}

pub fn messages_of(notifications: &[Notification], kind: NotificationType) -> Vec<String> {
    notifications
        .iter()
        .filter(|n| n.notification == kind)
        .filter_map(|n| n.message.clone())
        .collect()
}

/// `actor.operation` of every request, in the order operators saw them
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Operator that records every request it receives
pub struct RecordingOperator {
    actor: String,
    operation: String,
    property_names: Vec<String>,
    output: OperatorOutput,
    requests: Mutex<Vec<OperationRequest>>,
    journal: Option<Journal>,
}

impl RecordingOperator {
    pub fn new(actor: &str, operation: &str, output: OperatorOutput) -> Arc<Self> {
        Self::with_properties(actor, operation, Vec::new(), output)
    }

    pub fn with_properties(actor: &str, operation: &str, names: Vec<String>, output: OperatorOutput) -> Arc<Self> {
        Arc::new(Self {
            actor: actor.into(),
            operation: operation.into(),
            property_names: names,
            output,
            requests: Mutex::new(Vec::new()),
            journal: None,
        })
    }

    /// Like `with_properties`, also appending each request to `journal`
    pub fn journaled(
        actor: &str,
        operation: &str,
        names: Vec<String>,
        output: OperatorOutput,
        journal: &Journal,
    ) -> Arc<Self> {
        Arc::new(Self {
            actor: actor.into(),
            operation: operation.into(),
            property_names: names,
            output,
            requests: Mutex::new(Vec::new()),
            journal: Some(journal.clone()),
        })
    }

    pub fn requests(&self) -> Vec<OperationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Operator for RecordingOperator {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn operation(&self) -> &str {
        &self.operation
    }

    fn property_names(&self) -> Vec<String> {
        self.property_names.clone()
    }

    async fn execute(&self, request: &OperationRequest) -> anyhow::Result<OperatorOutput> {
        self.requests.lock().push(request.clone());
        if let Some(ref journal) = self.journal {
            journal.lock().push(format!("{}.{}", self.actor, self.operation));
        }
        Ok(self.output.clone())
    }
}
