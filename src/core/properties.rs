//! Property resolution.
//!
//! Operators declare the properties they need by canonical name. Each name
//! maps to a loader that reads the event, the policy target or data already
//! cached in the [`StepContext`]. Names starting with `enrichment/` are read
//! straight from the event's enrichment map.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;

use super::context::StepContext;
use super::inventory::{self, InventoryResponse, CQ_CONTEXT_KEY};
use super::step::StepError;
use crate::domain::{ControlLoopEvent, OperationalTarget};

pub const AAI_DEFAULT_CLOUD_REGION: &str = "AAI/defaultCloudRegion";
pub const AAI_DEFAULT_TENANT: &str = "AAI/defaultTenant";
pub const AAI_PNF: &str = "AAI/pnf";
pub const AAI_RESOURCE_VNF: &str = "AAI/resourceVnf";
pub const AAI_SERVICE: &str = "AAI/service";
pub const AAI_SERVICE_MODEL: &str = "AAI/serviceModel";
pub const AAI_TARGET_ENTITY: &str = "AAI/targetEntity";
pub const AAI_VNF: &str = "AAI/vnf";
pub const AAI_VNF_MODEL: &str = "AAI/vnfModel";
pub const AAI_VSERVER_LINK: &str = "AAI/vserverLink";
pub const AAI_DEFAULT_GENERIC_VNF: &str = "AAI/default/genericVnf";
pub const DATA_VF_COUNT: &str = "data/vfCount";
pub const EVENT_ADDITIONAL_PARAMS: &str = "event/additionalParams";
pub const EVENT_PAYLOAD: &str = "event/payload";
pub const OPT_CDS_GRPC_AAI_PROPERTIES: &str = "cds/grpcAaiProperties";

pub const ENRICHMENT_PREFIX: &str = "enrichment/";

/// Enrichment keys
pub const VSERVER_VSERVER_NAME: &str = "vserver.vserver-name";
pub const GENERIC_VNF_VNF_ID: &str = "generic-vnf.vnf-id";
pub const GENERIC_VNF_VNF_NAME: &str = "generic-vnf.vnf-name";
pub const PNF_NAME: &str = "pnf.pnf-name";

/// Properties whose loaders read the custom query response
pub const CQ_PROPERTIES: &[&str] = &[
    AAI_DEFAULT_CLOUD_REGION,
    AAI_DEFAULT_TENANT,
    AAI_RESOURCE_VNF,
    AAI_SERVICE,
    AAI_SERVICE_MODEL,
    AAI_VNF,
    AAI_VNF_MODEL,
    AAI_DEFAULT_GENERIC_VNF,
    DATA_VF_COUNT,
];

/// Properties whose loaders read tenant data
pub const TENANT_PROPERTIES: &[&str] = &[AAI_VSERVER_LINK];

/// Properties whose loaders read PNF data
pub const PNF_PROPERTIES: &[&str] = &[AAI_PNF];

/// What a loader may look at
pub struct PropertySource<'a> {
    pub event: &'a ControlLoopEvent,
    pub context: &'a StepContext,
    pub target: Option<&'a OperationalTarget>,
    pub actor: &'a str,
    pub operation: &'a str,
}

impl PropertySource<'_> {
    fn missing(&self, what: &str) -> StepError {
        StepError::Missing {
            what: what.to_string(),
            actor: self.actor.to_string(),
            operation: self.operation.to_string(),
        }
    }

    fn target(&self) -> Result<&OperationalTarget, StepError> {
        self.target.ok_or_else(|| self.missing("Target information"))
    }

    fn custom_query(&self) -> Result<InventoryResponse, StepError> {
        let value = self
            .context
            .get_property(CQ_CONTEXT_KEY)
            .map_err(|_| self.missing("custom query data"))?;
        Ok(InventoryResponse::from_value(value)?)
    }

    fn target_entity(&self) -> Result<&str, StepError> {
        self.context
            .get_str(AAI_TARGET_ENTITY)
            .ok_or_else(|| self.missing("target entity"))
    }
}

/// Loads one property; `None` leaves the property unset
pub type Loader = fn(&PropertySource<'_>) -> Result<Option<Value>, StepError>;

static PROPERTY_LOADERS: OnceLock<HashMap<&'static str, Loader>> = OnceLock::new();

fn loaders() -> &'static HashMap<&'static str, Loader> {
    PROPERTY_LOADERS.get_or_init(|| {
        let mut map: HashMap<&'static str, Loader> = HashMap::new();
        map.insert(AAI_DEFAULT_CLOUD_REGION, load_cloud_region);
        map.insert(AAI_DEFAULT_TENANT, load_tenant);
        map.insert(AAI_PNF, load_pnf);
        map.insert(AAI_RESOURCE_VNF, load_resource_vnf);
        map.insert(AAI_SERVICE, load_service);
        map.insert(AAI_SERVICE_MODEL, load_service_model);
        map.insert(AAI_TARGET_ENTITY, load_target_entity);
        map.insert(AAI_VNF, load_vnf);
        map.insert(AAI_VNF_MODEL, load_vnf_model);
        map.insert(AAI_VSERVER_LINK, load_vserver_link);
        map.insert(DATA_VF_COUNT, load_vf_count);
        map.insert(EVENT_ADDITIONAL_PARAMS, load_additional_event_params);
        map.insert(EVENT_PAYLOAD, load_event_payload);
        map.insert(OPT_CDS_GRPC_AAI_PROPERTIES, load_nothing);
        map.insert(AAI_DEFAULT_GENERIC_VNF, load_default_generic_vnf);
        map
    })
}

/// Loader registered for `name`
pub fn property_loader(name: &str) -> Option<Loader> {
    loaders().get(name).copied()
}

/// True if a value loaded under `name` is stored back into the context on success
pub fn has_saver(name: &str) -> bool {
    name == DATA_VF_COUNT
}

/// Resolve one property by name
pub fn load_property(name: &str, source: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    if let Some(key) = name.strip_prefix(ENRICHMENT_PREFIX) {
        let value = source
            .event
            .aai
            .get(key)
            .ok_or_else(|| source.missing(name))?;
        return Ok(Some(Value::String(value.clone())));
    }

    let loader = property_loader(name).ok_or_else(|| StepError::UnknownProperty {
        name: name.to_string(),
        actor: source.actor.to_string(),
        operation: source.operation.to_string(),
    })?;

    loader(source)
}

/// Proposed VF-module count for a guard check
pub fn proposed_vf_count(current: i64, operation: &str) -> i64 {
    if operation == "VF Module Create" {
        current + 1
    } else {
        current - 1
    }
}

/// VF-module count after a successful operation
pub fn resulting_vf_count(current: i64, operation: &str) -> i64 {
    match operation {
        "VF Module Create" => current + 1,
        "VF Module Delete" => current - 1,
        _ => current,
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Option<Value>, StepError> {
    Ok(Some(serde_json::to_value(value)?))
}

fn load_cloud_region(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    to_value(src.custom_query()?.default_cloud_region())
}

fn load_tenant(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    to_value(src.custom_query()?.default_tenant())
}

fn load_pnf(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    let entity = src.target_entity()?;
    let pnf = src
        .context
        .get_property(&inventory::pnf_key(entity))
        .map_err(|_| src.missing("PNF data"))?;
    Ok(Some(pnf.clone()))
}

fn load_resource_vnf(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    let resource_id = src
        .target()?
        .resource_id()
        .ok_or_else(|| src.missing("Target resource ID"))?;
    to_value(src.custom_query()?.generic_vnf_by_model_invariant_id(resource_id))
}

fn load_service(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    to_value(src.custom_query()?.service_instance())
}

fn load_service_model(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    let cq = src.custom_query()?;
    let service = cq
        .service_instance()
        .ok_or_else(|| src.missing("service instance"))?;
    let version = service
        .model_version_id
        .as_deref()
        .ok_or_else(|| src.missing("service model version id"))?;
    to_value(cq.model_ver_by_version_id(version))
}

fn load_target_entity(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    Ok(Some(Value::String(src.target_entity()?.to_string())))
}

fn load_vnf(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    let invariant = src
        .target()?
        .model_invariant_id()
        .ok_or_else(|| src.missing("modelInvariantId"))?;
    to_value(src.custom_query()?.generic_vnf_by_vf_module_model_invariant_id(invariant))
}

fn load_vnf_model(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    let invariant = src
        .target()?
        .model_invariant_id()
        .ok_or_else(|| src.missing("modelInvariantId"))?;
    let cq = src.custom_query()?;
    let vnf = cq
        .generic_vnf_by_vf_module_model_invariant_id(invariant)
        .ok_or_else(|| src.missing("VNF"))?;
    let version = vnf
        .model_version_id
        .as_deref()
        .ok_or_else(|| src.missing("VNF model version id"))?;
    to_value(cq.model_ver_by_version_id(version))
}

fn load_vserver_link(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    let vserver = src
        .event
        .aai
        .get(VSERVER_VSERVER_NAME)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            StepError::Invalid(format!("missing {} in enrichment data", VSERVER_VSERVER_NAME))
        })?;

    let tenant = src
        .context
        .get_property(&inventory::tenant_key(vserver))
        .map_err(|_| src.missing("tenant data"))?;
    let link = inventory::tenant_resource_link(tenant)
        .ok_or_else(|| src.missing("tenant data resource-link"))?;

    Ok(Some(Value::String(inventory::strip_prefix(link, 3).to_string())))
}

fn load_vf_count(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    if let Ok(count) = src.context.get_property(DATA_VF_COUNT) {
        return Ok(Some(count.clone()));
    }

    let target = src.target()?;
    let customization = target
        .model_customization_id()
        .ok_or_else(|| src.missing("target modelCustomizationId"))?;
    let invariant = target
        .model_invariant_id()
        .ok_or_else(|| src.missing("target modelInvariantId"))?;
    let version = target
        .model_version_id()
        .ok_or_else(|| src.missing("target modelVersionId"))?;

    let count = src
        .custom_query()?
        .vf_module_count(customization, invariant, version);
    Ok(Some(Value::from(count)))
}

fn load_additional_event_params(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    to_value(&src.event.additional_event_params)
}

fn load_event_payload(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    to_value(&src.event.payload)
}

fn load_nothing(_src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    Ok(None)
}

fn load_default_generic_vnf(src: &PropertySource<'_>) -> Result<Option<Value>, StepError> {
    to_value(src.custom_query()?.default_generic_vnf())
}
