//! Typed view over inventory query responses.
//!
//! The custom query returns a flat `results` list in which each entry holds a
//! single object keyed by its inventory type (`vserver`, `generic-vnf`, ...).
//! Tenant lookups return `result-data` entries carrying resource links.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context key under which the custom query response is cached
pub const CQ_CONTEXT_KEY: &str = "AAI.AaiCqResponse";

/// Context key for tenant data of a vserver
pub fn tenant_key(vserver: &str) -> String {
    format!("AAI.Tenant.{}", vserver)
}

/// Context key for PNF data of a target entity
pub fn pnf_key(entity: &str) -> String {
    format!("AAI.Pnf.{}", entity)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Vserver {
    #[serde(default)]
    pub vserver_id: Option<String>,
    #[serde(default)]
    pub vserver_name: Option<String>,
    #[serde(default)]
    pub prov_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VfModule {
    #[serde(default)]
    pub vf_module_id: Option<String>,
    #[serde(default)]
    pub vf_module_name: Option<String>,
    #[serde(default)]
    pub is_base_vf_module: bool,
    #[serde(default)]
    pub model_invariant_id: Option<String>,
    #[serde(default)]
    pub model_version_id: Option<String>,
    #[serde(default)]
    pub model_customization_id: Option<String>,
}

impl VfModule {
    fn matches(&self, customization_id: &str, invariant_id: &str, version_id: &str) -> bool {
        self.model_customization_id.as_deref() == Some(customization_id)
            && self.model_invariant_id.as_deref() == Some(invariant_id)
            && self.model_version_id.as_deref() == Some(version_id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VfModules {
    #[serde(default)]
    pub vf_module: Vec<VfModule>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GenericVnf {
    pub vnf_id: String,
    #[serde(default)]
    pub vnf_name: Option<String>,
    #[serde(default)]
    pub vnf_type: Option<String>,
    #[serde(default)]
    pub model_invariant_id: Option<String>,
    #[serde(default)]
    pub model_version_id: Option<String>,
    #[serde(default)]
    pub vf_modules: VfModules,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CloudRegion {
    #[serde(default)]
    pub cloud_owner: Option<String>,
    pub cloud_region_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Tenant {
    pub tenant_id: String,
    #[serde(default)]
    pub tenant_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceInstance {
    pub service_instance_id: String,
    #[serde(default)]
    pub service_instance_name: Option<String>,
    #[serde(default)]
    pub model_invariant_id: Option<String>,
    #[serde(default)]
    pub model_version_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelVer {
    pub model_version_id: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// One entry of the `results` list; exactly one field is normally set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InventoryItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vserver: Option<Vserver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_vnf: Option<GenericVnf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vf_module: Option<VfModule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_region: Option<CloudRegion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Tenant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_instance: Option<ServiceInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ver: Option<ModelVer>,
}

/// Custom query response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InventoryResponse {
    #[serde(default)]
    pub results: Vec<InventoryItem>,
}

impl InventoryResponse {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn default_cloud_region(&self) -> Option<&CloudRegion> {
        self.results.iter().find_map(|i| i.cloud_region.as_ref())
    }

    pub fn default_tenant(&self) -> Option<&Tenant> {
        self.results.iter().find_map(|i| i.tenant.as_ref())
    }

    pub fn default_generic_vnf(&self) -> Option<&GenericVnf> {
        self.generic_vnfs().next()
    }

    pub fn service_instance(&self) -> Option<&ServiceInstance> {
        self.results.iter().find_map(|i| i.service_instance.as_ref())
    }

    pub fn generic_vnf_by_model_invariant_id(&self, id: &str) -> Option<&GenericVnf> {
        self.generic_vnfs()
            .find(|vnf| vnf.model_invariant_id.as_deref() == Some(id))
    }

    /// The generic VNF owning a VF module with the given model invariant id
    pub fn generic_vnf_by_vf_module_model_invariant_id(&self, id: &str) -> Option<&GenericVnf> {
        self.generic_vnfs().find(|vnf| {
            vnf.vf_modules
                .vf_module
                .iter()
                .any(|m| m.model_invariant_id.as_deref() == Some(id))
        })
    }

    pub fn model_ver_by_version_id(&self, id: &str) -> Option<&ModelVer> {
        self.results
            .iter()
            .filter_map(|i| i.model_ver.as_ref())
            .find(|m| m.model_version_id == id)
    }

    /// Number of VF modules matching all three model ids
    pub fn vf_module_count(&self, customization_id: &str, invariant_id: &str, version_id: &str) -> usize {
        let nested = self
            .generic_vnfs()
            .flat_map(|vnf| vnf.vf_modules.vf_module.iter());
        let top_level = self.results.iter().filter_map(|i| i.vf_module.as_ref());

        nested
            .chain(top_level)
            .filter(|m| m.matches(customization_id, invariant_id, version_id))
            .count()
    }

    fn generic_vnfs(&self) -> impl Iterator<Item = &GenericVnf> {
        self.results.iter().filter_map(|i| i.generic_vnf.as_ref())
    }
}

/// `result-data[0].resource-link` of a tenant lookup response
pub fn tenant_resource_link(tenant: &Value) -> Option<&str> {
    tenant
        .get("result-data")?
        .get(0)?
        .get("resource-link")?
        .as_str()
}

/// Drop the leading `ncomponents` path components of a resource link
///
/// `/aai/v21/cloud-infrastructure/...` with 3 yields `/cloud-infrastructure/...`
pub fn strip_prefix(link: &str, ncomponents: usize) -> &str {
    let mut prev: Option<usize> = None;
    for _ in 0..ncomponents {
        let from = prev.map_or(0, |p| p + 1);
        match link[from..].find('/') {
            Some(idx) => prev = Some(from + idx),
            None => break,
        }
    }

    &link[prev.unwrap_or(0)..]
}
