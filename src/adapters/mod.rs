//! Adapter interfaces for external systems.
//!
//! Remediation operations (inventory queries, guard decisions, orchestration
//! requests) are reached through [`Operator`]s registered in an
//! [`ActorService`] under their (actor, operation) pair. Notifications leave
//! the engine through a [`NotificationSink`].

pub mod http;
pub mod simulated;
pub mod sink;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::{OperatorConfig, OperatorKind};
use crate::domain::{OperationResult, OperationalTarget};

pub use http::HttpOperator;
pub use simulated::SimulatedOperator;
pub use sink::{CollectingSink, JsonLinesSink, NotificationSink};

/// Inventory actor and its operations
pub const AAI_ACTOR: &str = "AAI";
pub const AAI_CUSTOM_QUERY: &str = "CustomQuery";
pub const AAI_TENANT: &str = "Tenant";
pub const AAI_PNF: &str = "Pnf";

/// Guard actor and its decision operation
pub const GUARD_ACTOR: &str = "GUARD";
pub const GUARD_DECISION: &str = "Decision";

/// Lock pseudo-actor, served in-process
pub const LOCK_ACTOR: &str = "LOCK";
pub const LOCK_OPERATION: &str = "Lock";

/// Target-entity pseudo-actor; never invoked remotely
pub const TARGET_ENTITY_ACTOR: &str = "pseudo/getTargetEntity";
pub const TARGET_ENTITY_OPERATION: &str = "pseudo/getTargetEntity";

/// Everything an operator needs to perform one attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub request_id: Uuid,
    pub closed_loop_control_name: String,
    pub actor: String,
    pub operation: String,
    pub target_entity: Option<String>,
    pub target: Option<OperationalTarget>,
    pub payload: Map<String, Value>,
    /// Resolved properties, keyed by canonical property name
    pub properties: Map<String, Value>,
    #[serde(skip)]
    pub timeout: Duration,
}

/// Output from an operator execution
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorOutput {
    pub result: OperationResult,
    pub message: Option<String>,
    pub response: Option<Value>,
    /// Payload to forward as a control-loop response, if any
    pub control_loop_payload: Option<String>,
}

impl OperatorOutput {
    pub fn success(response: Option<Value>) -> Self {
        Self {
            result: OperationResult::Success,
            message: None,
            response,
            control_loop_payload: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: OperationResult::Failure,
            message: Some(message.into()),
            response: None,
            control_loop_payload: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A remediation operation reachable by (actor, operation)
#[async_trait]
pub trait Operator: Send + Sync {
    fn actor(&self) -> &str;

    fn operation(&self) -> &str;

    /// Canonical names of the properties this operation needs
    fn property_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Perform one attempt. An `Err` is reported as FAILURE_EXCEPTION.
    async fn execute(&self, request: &OperationRequest) -> Result<OperatorOutput>;
}

/// Registry of operators keyed by (actor, operation)
#[derive(Default, Clone)]
pub struct ActorService {
    operators: HashMap<(String, String), Arc<dyn Operator>>,
}

impl ActorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configured operators
    pub fn from_config(configs: &[OperatorConfig]) -> Result<Self> {
        let mut service = Self::new();

        for cfg in configs {
            let operator: Arc<dyn Operator> = match cfg.kind {
                OperatorKind::Http => {
                    let url = cfg.url.clone().ok_or_else(|| {
                        anyhow::anyhow!("operator {}.{} needs a url", cfg.actor, cfg.operation)
                    })?;
                    Arc::new(
                        HttpOperator::new(&cfg.actor, &cfg.operation, url)
                            .with_property_names(cfg.property_names.clone()),
                    )
                }
                OperatorKind::Simulated => Arc::new(SimulatedOperator::from_config(cfg)),
            };
            service.register(operator);
        }

        Ok(service)
    }

    pub fn register(&mut self, operator: Arc<dyn Operator>) {
        let key = (operator.actor().to_string(), operator.operation().to_string());
        self.operators.insert(key, operator);
    }

    pub fn with_operator(mut self, operator: impl Operator + 'static) -> Self {
        self.register(Arc::new(operator));
        self
    }

    pub fn get(&self, actor: &str, operation: &str) -> Option<Arc<dyn Operator>> {
        self.operators
            .get(&(actor.to_string(), operation.to_string()))
            .cloned()
    }

    pub fn contains(&self, actor: &str, operation: &str) -> bool {
        self.operators
            .contains_key(&(actor.to_string(), operation.to_string()))
    }

    /// Property names declared by an operator; empty when it is not registered
    pub fn property_names(&self, actor: &str, operation: &str) -> Vec<String> {
        self.get(actor, operation)
            .map(|op| op.property_names())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl std::fmt::Debug for ActorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .operators
            .keys()
            .map(|(a, o)| format!("{}.{}", a, o))
            .collect();
        keys.sort();
        f.debug_struct("ActorService").field("operators", &keys).finish()
    }
}
