//! Policy configuration objects.
//!
//! A [`ToscaPolicy`] carries an operational policy in its `properties`.
//! [`ControlLoopParams`] is the lookup record derived from it and keyed by
//! closed-loop control name.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::TargetType;

/// Errors raised while interpreting a policy
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid operational policy {name}:{version}: {source}")]
    InvalidProperties {
        name: String,
        version: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("policy {0} has no closed loop id")]
    MissingId(String),
}

/// Policy object as delivered by the configuration source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToscaPolicy {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub type_version: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToscaPolicy {
    /// Parse `properties` as an operational policy
    pub fn operational(&self) -> Result<OperationalPolicy, PolicyError> {
        serde_json::from_value(self.properties.clone()).map_err(|source| {
            PolicyError::InvalidProperties {
                name: self.name.clone(),
                version: self.version.clone(),
                source,
            }
        })
    }

    /// Scope recorded on notifications: `type:type_version`
    pub fn scope(&self) -> String {
        format!("{}:{}", self.type_name, self.type_version)
    }
}

/// Operational policy: a graph of operations starting at `trigger`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalPolicy {
    pub id: String,
    #[serde(default = "default_control_loop_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub abatement: bool,
    pub trigger: String,
    #[serde(default)]
    pub operations: Vec<PolicyOperation>,
}

fn default_control_loop_timeout() -> u64 {
    3600
}

/// One node of the operational policy graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOperation {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub operation: ActorOperation,
    /// Per-attempt timeout in seconds
    #[serde(default = "default_operation_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_success")]
    pub success: String,
    #[serde(default = "default_failure")]
    pub failure: String,
    #[serde(default = "default_failure_timeout")]
    pub failure_timeout: String,
    #[serde(default = "default_failure_retries")]
    pub failure_retries: String,
    #[serde(default = "default_failure_exception")]
    pub failure_exception: String,
    #[serde(default = "default_failure_guard")]
    pub failure_guard: String,
}

fn default_operation_timeout() -> u64 {
    300
}
fn default_success() -> String {
    "final_success".to_string()
}
fn default_failure() -> String {
    "final_failure".to_string()
}
fn default_failure_timeout() -> String {
    "final_failure_timeout".to_string()
}
fn default_failure_retries() -> String {
    "final_failure_retries".to_string()
}
fn default_failure_exception() -> String {
    "final_failure_exception".to_string()
}
fn default_failure_guard() -> String {
    "final_failure_guard".to_string()
}

/// Actor and operation invoked by a policy operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorOperation {
    pub actor: String,
    pub operation: String,
    #[serde(default)]
    pub target: Option<OperationalTarget>,
    #[serde(default)]
    pub payload: HashMap<String, String>,
}

/// Target of a policy operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalTarget {
    pub target_type: TargetType,
    #[serde(default)]
    pub entity_ids: HashMap<String, String>,
}

impl OperationalTarget {
    pub fn new(target_type: TargetType) -> Self {
        Self {
            target_type,
            entity_ids: HashMap::new(),
        }
    }

    pub fn with_entity_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entity_ids.insert(key.into(), value.into());
        self
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.entity_ids.get("resourceID").map(String::as_str)
    }

    pub fn model_invariant_id(&self) -> Option<&str> {
        self.entity_ids.get("modelInvariantId").map(String::as_str)
    }

    pub fn model_version_id(&self) -> Option<&str> {
        self.entity_ids.get("modelVersionId").map(String::as_str)
    }

    pub fn model_customization_id(&self) -> Option<&str> {
        self.entity_ids.get("modelCustomizationId").map(String::as_str)
    }
}

/// Lookup record tying a closed-loop control name to its policy
#[derive(Debug, Clone, PartialEq)]
pub struct ControlLoopParams {
    pub closed_loop_control_name: String,
    pub policy_name: String,
    pub policy_version: String,
    pub policy_scope: String,
    /// `None` while the policy is not known yet
    pub tosca_policy: Option<Arc<ToscaPolicy>>,
}

impl ControlLoopParams {
    /// Derive params from a policy; the policy must name its closed loop
    pub fn from_policy(policy: &Arc<ToscaPolicy>) -> Result<Self, PolicyError> {
        let id = policy
            .properties
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PolicyError::MissingId(policy.name.clone()))?;

        Ok(Self {
            closed_loop_control_name: id.to_string(),
            policy_name: policy.name.clone(),
            policy_version: policy.version.clone(),
            policy_scope: policy.scope(),
            tosca_policy: Some(policy.clone()),
        })
    }

    /// True if these params refer to `name:version`
    pub fn refers_to(&self, name: &str, version: &str) -> bool {
        self.policy_name == name && self.policy_version == version
    }

    pub fn is_bound(&self) -> bool {
        self.tosca_policy.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_policy() -> ToscaPolicy {
        ToscaPolicy {
            name: "operational.restart".into(),
            version: "1.0.0".into(),
            type_name: "onap.policies.controlloop.operational.common.Drools".into(),
            type_version: "1.0.0".into(),
            properties: json!({
                "id": "CL-TEST",
                "trigger": "restart",
                "operations": [{
                    "id": "restart",
                    "operation": {
                        "actor": "APPC",
                        "operation": "Restart",
                        "target": {"targetType": "VM"}
                    },
                    "retries": 2
                }]
            }),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_params_from_policy() {
        let policy = Arc::new(sample_policy());
        let params = ControlLoopParams::from_policy(&policy).unwrap();

        assert_eq!(params.closed_loop_control_name, "CL-TEST");
        assert_eq!(
            params.policy_scope,
            "onap.policies.controlloop.operational.common.Drools:1.0.0"
        );
        assert!(params.refers_to("operational.restart", "1.0.0"));
        assert!(params.is_bound());
    }

    #[test]
    fn test_params_require_id() {
        let mut policy = sample_policy();
        policy.properties = json!({"trigger": "x"});
        let err = ControlLoopParams::from_policy(&Arc::new(policy)).unwrap_err();
        assert!(matches!(err, PolicyError::MissingId(_)));
    }

    #[test]
    fn test_operational_defaults() {
        let operational = sample_policy().operational().unwrap();
        assert_eq!(operational.timeout, 3600);

        let op = &operational.operations[0];
        assert_eq!(op.timeout, 300);
        assert_eq!(op.retries, 2);
        assert_eq!(op.success, "final_success");
        assert_eq!(op.failure_guard, "final_failure_guard");
        assert_eq!(
            op.operation.target.as_ref().map(|t| t.target_type),
            Some(TargetType::Vm)
        );
    }
}
