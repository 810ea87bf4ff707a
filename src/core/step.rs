//! Steps: one remediation sub-operation each.
//!
//! The policy's own operation is a [`StepKind::Policy`] step. Before it runs,
//! the manager pushes preprocessor steps in front of it (target
//! determination, lock, inventory queries, guard). Every step may be skipped
//! when the data it would fetch is already cached in the [`StepContext`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::context::{ContextError, StepContext};
use super::inventory::{self, InventoryResponse, CQ_CONTEXT_KEY};
use super::properties::{self, PropertySource};
use crate::adapters::{
    ActorService, OperationRequest, AAI_ACTOR, AAI_CUSTOM_QUERY, AAI_PNF, AAI_TENANT,
    GUARD_ACTOR, GUARD_DECISION, LOCK_ACTOR, LOCK_OPERATION, TARGET_ENTITY_ACTOR,
    TARGET_ENTITY_OPERATION,
};
use crate::domain::{ControlLoopEvent, OperationOutcome, OperationalTarget, PolicyOperation, TargetType};

/// Errors that are fatal to one step
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown property {name} needed by {actor}.{operation}")]
    UnknownProperty {
        name: String,
        actor: String,
        operation: String,
    },

    #[error("missing {what} for {actor}.{operation}")]
    Missing {
        what: String,
        actor: String,
        operation: String,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("Target Entity has not been determined yet")]
    TargetUndetermined,

    #[error("no operator registered for {actor}.{operation}")]
    UnknownOperator { actor: String, operation: String },

    #[error("too many steps")]
    TooManySteps,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("invalid inventory data: {0}")]
    Inventory(#[from] serde_json::Error),
}

/// Kind of work a step performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// The operation named by the policy
    Policy,
    /// Inventory custom query
    CustomQuery,
    /// Tenant lookup for a vserver
    GetTenant { vserver: String },
    /// PNF lookup for the target entity
    GetPnf,
    /// Determines the target entity; never invoked remotely
    GetTargetEntity,
    /// Lock on the target entity
    Lock,
    /// Guard decision
    Guard,
}

/// Starts operations on behalf of a step
pub trait Launcher {
    /// Begin `request`; its outcome is reported back later
    fn launch(&mut self, request: OperationRequest) -> Result<(), StepError>;
}

/// How the target entity is found for VM/VNF/VF-module targets
enum TargetResolution {
    Known(String),
    NeedsDefaultVnf,
}

/// One remediation sub-operation
#[derive(Debug, Clone)]
pub struct Step {
    kind: StepKind,
    actor: String,
    operation: String,
    event: Arc<ControlLoopEvent>,
    policy: Arc<PolicyOperation>,
    payload: Map<String, Value>,
    properties: Map<String, Value>,
    /// Properties stored back into the context on success
    savers: Vec<String>,
    preprocessed: bool,
}

impl Step {
    /// The policy's own operation
    pub fn policy(event: Arc<ControlLoopEvent>, policy: Arc<PolicyOperation>) -> Self {
        let payload = policy
            .operation
            .payload
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        Self {
            kind: StepKind::Policy,
            actor: policy.operation.actor.clone(),
            operation: policy.operation.operation.clone(),
            event,
            policy,
            payload,
            properties: Map::new(),
            savers: Vec::new(),
            preprocessed: false,
        }
    }

    /// A step derived from `other`, sharing its event and policy operation
    pub fn derive(other: &Step, kind: StepKind) -> Self {
        let (actor, operation) = match kind {
            StepKind::Policy => (other.policy.operation.actor.as_str(), other.policy.operation.operation.as_str()),
            StepKind::CustomQuery => (AAI_ACTOR, AAI_CUSTOM_QUERY),
            StepKind::GetTenant { .. } => (AAI_ACTOR, AAI_TENANT),
            StepKind::GetPnf => (AAI_ACTOR, AAI_PNF),
            StepKind::GetTargetEntity => (TARGET_ENTITY_ACTOR, TARGET_ENTITY_OPERATION),
            StepKind::Lock => (LOCK_ACTOR, LOCK_OPERATION),
            StepKind::Guard => (GUARD_ACTOR, GUARD_DECISION),
        };

        let mut step = Self {
            actor: actor.to_string(),
            operation: operation.to_string(),
            kind,
            event: other.event.clone(),
            policy: other.policy.clone(),
            payload: Map::new(),
            properties: Map::new(),
            savers: Vec::new(),
            preprocessed: false,
        };

        if step.kind == StepKind::Guard {
            step.payload = step.guard_payload();
        }

        step
    }

    /// A new attempt of the same policy operation, already preprocessed
    pub fn fresh(&self) -> Self {
        let mut step = match self.kind {
            StepKind::Policy => Step::policy(self.event.clone(), self.policy.clone()),
            _ => Step::derive(self, self.kind.clone()),
        };
        step.preprocessed = true;
        step
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn is_policy_step(&self) -> bool {
        self.kind == StepKind::Policy
    }

    pub fn policy_operation(&self) -> &PolicyOperation {
        &self.policy
    }

    pub fn event(&self) -> &ControlLoopEvent {
        &self.event
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn is_preprocessed(&self) -> bool {
        self.preprocessed
    }

    pub fn set_preprocessed(&mut self, preprocessed: bool) {
        self.preprocessed = preprocessed;
    }

    /// Target of the policy operation
    pub fn target(&self) -> Option<&OperationalTarget> {
        self.policy.operation.target.as_ref()
    }

    pub fn target_type(&self) -> Option<TargetType> {
        self.target().map(|t| t.target_type)
    }

    /// Steps that stay sensitive to newly arriving events while in flight
    pub fn accepts_event(&self) -> bool {
        matches!(self.kind, StepKind::Policy | StepKind::Guard)
    }

    /// Names of the properties this step needs, given what is known so far
    pub fn property_names(&self, ctx: &StepContext, actors: &ActorService) -> Vec<String> {
        match &self.kind {
            StepKind::Policy => actors.property_names(&self.actor, &self.operation),
            StepKind::Guard => {
                let mut names = vec![properties::AAI_TARGET_ENTITY.to_string()];
                let policy_needs = actors.property_names(
                    &self.policy.operation.actor,
                    &self.policy.operation.operation,
                );
                if policy_needs.iter().any(|n| n == properties::DATA_VF_COUNT) {
                    names.push(properties::DATA_VF_COUNT.to_string());
                }
                names
            }
            StepKind::GetTargetEntity => {
                if ctx.contains(properties::AAI_TARGET_ENTITY) {
                    return Vec::new();
                }
                match self.resolve_target() {
                    Ok(TargetResolution::NeedsDefaultVnf) => {
                        vec![properties::AAI_DEFAULT_GENERIC_VNF.to_string()]
                    }
                    // errors surface from set_properties
                    _ => Vec::new(),
                }
            }
            StepKind::CustomQuery | StepKind::GetTenant { .. } | StepKind::GetPnf | StepKind::Lock => {
                Vec::new()
            }
        }
    }

    /// Load every property this step needs. Runs after its preprocessor steps.
    pub fn set_properties(&mut self, ctx: &mut StepContext, actors: &ActorService) -> Result<(), StepError> {
        self.savers.clear();

        for name in self.property_names(ctx, actors) {
            if properties::has_saver(&name) && !self.savers.contains(&name) {
                self.savers.push(name.clone());
            }

            let source = PropertySource {
                event: &self.event,
                context: ctx,
                target: self.policy.operation.target.as_ref(),
                actor: &self.actor,
                operation: &self.operation,
            };

            if let Some(value) = properties::load_property(&name, &source)? {
                self.store_property(&name, value)?;
            }
        }

        match self.kind {
            StepKind::GetTargetEntity => self.determine_target_entity(ctx)?,
            StepKind::Guard => self.add_guard_inventory_fields(ctx)?,
            _ => {}
        }

        Ok(())
    }

    /// Begin the step. `Ok(false)` means there is nothing to run.
    pub fn start(
        &mut self,
        remaining: Duration,
        ctx: &StepContext,
        launcher: &mut dyn Launcher,
    ) -> Result<bool, StepError> {
        match &self.kind {
            StepKind::CustomQuery if ctx.contains(CQ_CONTEXT_KEY) => return Ok(false),
            StepKind::GetTenant { vserver } if ctx.contains(&inventory::tenant_key(vserver)) => {
                return Ok(false)
            }
            StepKind::GetPnf => {
                let entity = self.context_target_entity(ctx)?;
                if ctx.contains(&inventory::pnf_key(&entity)) {
                    return Ok(false);
                }
            }
            StepKind::GetTargetEntity => {
                return if ctx.contains(properties::AAI_TARGET_ENTITY) {
                    Ok(false)
                } else {
                    Err(StepError::TargetUndetermined)
                };
            }
            StepKind::Lock => {
                self.context_target_entity(ctx)?;
            }
            _ => {}
        }

        let request = self.build_request(remaining, ctx);
        launcher.launch(request)?;
        Ok(true)
    }

    /// Record the data returned by a successful operation
    pub fn success(&self, outcome: &OperationOutcome, ctx: &mut StepContext) {
        let response = outcome.response.clone();

        match &self.kind {
            StepKind::CustomQuery => {
                let cq = response.unwrap_or_else(|| serde_json::json!({ "results": [] }));
                ctx.set_property(CQ_CONTEXT_KEY, cq);
            }
            StepKind::GetTenant { vserver } => {
                ctx.set_property(inventory::tenant_key(vserver), response.unwrap_or(Value::Null));
            }
            StepKind::GetPnf => {
                if let Some(entity) = ctx.get_str(properties::AAI_TARGET_ENTITY).map(str::to_string) {
                    ctx.set_property(inventory::pnf_key(&entity), response.unwrap_or(Value::Null));
                }
            }
            _ => {}
        }

        for saver in &self.savers {
            if saver == properties::DATA_VF_COUNT {
                if let Some(count) = self.properties.get(properties::DATA_VF_COUNT).and_then(Value::as_i64) {
                    let saved = properties::resulting_vf_count(count, &self.operation);
                    ctx.set_property(properties::DATA_VF_COUNT, Value::from(saved));
                }
            }
        }
    }

    /// Request sent to the operator for this step
    pub fn build_request(&self, remaining: Duration, ctx: &StepContext) -> OperationRequest {
        let target_entity = match &self.kind {
            StepKind::GetTenant { vserver } => Some(vserver.clone()),
            _ => ctx.get_str(properties::AAI_TARGET_ENTITY).map(str::to_string),
        };

        let timeout = Duration::from_secs(self.policy.timeout).min(remaining);

        OperationRequest {
            request_id: self.event.request_id.unwrap_or_else(Uuid::nil),
            closed_loop_control_name: self.event.control_loop_name().to_string(),
            actor: self.actor.clone(),
            operation: self.operation.clone(),
            target_entity,
            target: self.policy.operation.target.clone(),
            payload: self.payload.clone(),
            properties: self.properties.clone(),
            timeout,
        }
    }

    fn store_property(&mut self, name: &str, value: Value) -> Result<(), StepError> {
        match (&self.kind, name) {
            (StepKind::Guard, properties::AAI_TARGET_ENTITY) => {
                self.payload.insert("target".to_string(), value);
            }
            (StepKind::Guard, properties::DATA_VF_COUNT) => {
                let current = value.as_i64().ok_or_else(|| {
                    StepError::Invalid(format!("VF count is not a number: {}", value))
                })?;
                let proposed = properties::proposed_vf_count(current, &self.policy.operation.operation);
                self.payload.insert("vfCount".to_string(), Value::from(proposed));
            }
            _ => {
                self.properties.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    fn guard_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("actor".into(), Value::String(self.policy.operation.actor.clone()));
        payload.insert("operation".into(), Value::String(self.policy.operation.operation.clone()));
        payload.insert(
            "requestId".into(),
            self.event
                .request_id
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert("clname".into(), Value::String(self.event.control_loop_name().to_string()));
        payload
    }

    fn add_guard_inventory_fields(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        if self.target_type() == Some(TargetType::Pnf) {
            return Ok(());
        }

        if let Ok(value) = ctx.get_property(CQ_CONTEXT_KEY) {
            let cq = InventoryResponse::from_value(value)?;
            if let Some(vnf) = cq.default_generic_vnf() {
                self.payload.insert("vnfId".into(), Value::String(vnf.vnf_id.clone()));
                if let Some(ref name) = vnf.vnf_name {
                    self.payload.insert("vnfName".into(), Value::String(name.clone()));
                }
            }
        }

        if let Some(vserver) = self.event.aai.get(properties::VSERVER_VSERVER_NAME) {
            self.payload.insert("vserverName".into(), Value::String(vserver.clone()));
        }

        Ok(())
    }

    fn context_target_entity(&self, ctx: &StepContext) -> Result<String, StepError> {
        ctx.get_str(properties::AAI_TARGET_ENTITY)
            .map(str::to_string)
            .ok_or(StepError::TargetUndetermined)
    }

    fn determine_target_entity(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        if ctx.contains(properties::AAI_TARGET_ENTITY) {
            return Ok(());
        }

        let entity = match self.resolve_target()? {
            TargetResolution::Known(entity) => entity,
            TargetResolution::NeedsDefaultVnf => self
                .properties
                .get(properties::AAI_DEFAULT_GENERIC_VNF)
                .and_then(|vnf| vnf.get("vnf-id"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| StepError::Missing {
                    what: "default generic VNF".to_string(),
                    actor: self.actor.clone(),
                    operation: self.operation.clone(),
                })?,
        };

        ctx.set_property(properties::AAI_TARGET_ENTITY, Value::String(entity));
        Ok(())
    }

    fn resolve_target(&self) -> Result<TargetResolution, StepError> {
        let target_field = self
            .event
            .target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StepError::Invalid("The target is null".to_string()))?;

        let target_type = self
            .target_type()
            .ok_or_else(|| StepError::Invalid("The target type is null".to_string()))?;

        let aai = &self.event.aai;
        let from_enrichment = |key: &str| {
            aai.get(key)
                .cloned()
                .ok_or_else(|| StepError::Invalid(format!("Enrichment data is missing {}", key)))
        };

        match target_type {
            TargetType::Pnf => {
                if !target_field.eq_ignore_ascii_case(properties::PNF_NAME) {
                    return Err(StepError::Invalid("Target does not match target type".to_string()));
                }
                aai.get(properties::PNF_NAME)
                    .cloned()
                    .map(TargetResolution::Known)
                    .ok_or_else(|| StepError::Invalid("AAI section is missing pnf.pnf-name".to_string()))
            }
            TargetType::Vm | TargetType::Vnf | TargetType::VfModule => {
                match target_field.to_ascii_lowercase().as_str() {
                    properties::VSERVER_VSERVER_NAME => {
                        from_enrichment(properties::VSERVER_VSERVER_NAME).map(TargetResolution::Known)
                    }
                    properties::GENERIC_VNF_VNF_ID => {
                        from_enrichment(properties::GENERIC_VNF_VNF_ID).map(TargetResolution::Known)
                    }
                    properties::GENERIC_VNF_VNF_NAME => Ok(aai
                        .get(properties::GENERIC_VNF_VNF_ID)
                        .cloned()
                        .map(TargetResolution::Known)
                        .unwrap_or(TargetResolution::NeedsDefaultVnf)),
                    _ => Err(StepError::Invalid("Target does not match target type".to_string())),
                }
            }
        }
    }
}
