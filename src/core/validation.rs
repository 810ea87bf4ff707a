//! Event validation.
//!
//! Checks applied before a correlation manager accepts an onset: syntax,
//! enrichment data for the target type, and whether the closed loop is
//! disabled or the target is not in service.

use std::collections::HashMap;

use thiserror::Error;

use super::properties::{GENERIC_VNF_VNF_ID, GENERIC_VNF_VNF_NAME, PNF_NAME, VSERVER_VSERVER_NAME};
use crate::domain::{ControlLoopEvent, TargetType};

const VM_NAME: &str = "VM_NAME";
const VNF_NAME: &str = "VNF_NAME";

const VSERVER_IS_CLOSED_LOOP_DISABLED: &str = "vserver.is-closed-loop-disabled";
const GENERIC_VNF_IS_CLOSED_LOOP_DISABLED: &str = "generic-vnf.is-closed-loop-disabled";
const PNF_IS_IN_MAINT: &str = "pnf.in-maint";
const VSERVER_PROV_STATUS: &str = "vserver.prov-status";
const GENERIC_VNF_PROV_STATUS: &str = "generic-vnf.prov-status";

const VALID_TARGETS: &[&str] = &[
    VM_NAME,
    VNF_NAME,
    VSERVER_VSERVER_NAME,
    GENERIC_VNF_VNF_ID,
    GENERIC_VNF_VNF_NAME,
    PNF_NAME,
];

const TRUE_VALUES: &[&str] = &["true", "t", "yes", "y"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid value in closedLoopEventStatus")]
    InvalidStatus,

    #[error("No control loop name")]
    MissingControlLoopName,

    #[error("No request ID")]
    MissingRequestId,

    #[error("No target field")]
    MissingTarget,

    #[error("target field invalid")]
    InvalidTarget,

    #[error("AAI is null")]
    MissingEnrichment,

    #[error("The Target type is null")]
    MissingTargetType,

    #[error("The target type is not supported")]
    UnsupportedTargetType,

    #[error("generic-vnf.vnf-id or generic-vnf.vnf-name or vserver.vserver-name information missing")]
    MissingVnfInformation,

    #[error("AAI PNF object key pnf-name is missing")]
    MissingPnfName,

    #[error("is-closed-loop-disabled is set to true on VServer or VNF")]
    ClosedLoopDisabled,

    #[error("prov-status is not ACTIVE on VServer or VNF")]
    ProvStatusInactive,
}

/// Run every check in order
pub fn validate(event: &ControlLoopEvent) -> Result<(), ValidationError> {
    check_syntax(event)?;

    if event.is_onset() {
        if is_closed_loop_disabled(event) {
            return Err(ValidationError::ClosedLoopDisabled);
        }
        if is_prov_status_inactive(event) {
            return Err(ValidationError::ProvStatusInactive);
        }
    }

    Ok(())
}

/// Syntax checks; abatements only need status, name and request id
pub fn check_syntax(event: &ControlLoopEvent) -> Result<(), ValidationError> {
    if event.closed_loop_event_status.is_none() {
        return Err(ValidationError::InvalidStatus);
    }

    if event.control_loop_name().trim().is_empty() {
        return Err(ValidationError::MissingControlLoopName);
    }

    if event.request_id.is_none() {
        return Err(ValidationError::MissingRequestId);
    }

    if event.is_abatement() {
        return Ok(());
    }

    let target = event
        .target
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or(ValidationError::MissingTarget)?;

    if !VALID_TARGETS
        .iter()
        .any(|valid| valid.eq_ignore_ascii_case(target))
    {
        return Err(ValidationError::InvalidTarget);
    }

    check_enrichment(event)
}

fn check_enrichment(event: &ControlLoopEvent) -> Result<(), ValidationError> {
    if event.aai.is_empty() {
        return Err(ValidationError::MissingEnrichment);
    }

    match event.target_type {
        None => Err(ValidationError::MissingTargetType),
        Some(TargetType::Vm) | Some(TargetType::Vnf) => {
            let has_any = [GENERIC_VNF_VNF_ID, GENERIC_VNF_VNF_NAME, VSERVER_VSERVER_NAME]
                .iter()
                .any(|key| event.aai.contains_key(*key));
            if has_any {
                Ok(())
            } else {
                Err(ValidationError::MissingVnfInformation)
            }
        }
        Some(TargetType::Pnf) => {
            if event.aai.contains_key(PNF_NAME) {
                Ok(())
            } else {
                Err(ValidationError::MissingPnfName)
            }
        }
        Some(TargetType::VfModule) => Err(ValidationError::UnsupportedTargetType),
    }
}

pub fn is_closed_loop_disabled(event: &ControlLoopEvent) -> bool {
    [VSERVER_IS_CLOSED_LOOP_DISABLED, GENERIC_VNF_IS_CLOSED_LOOP_DISABLED, PNF_IS_IN_MAINT]
        .iter()
        .any(|key| is_aai_true(&event.aai, key))
}

pub fn is_prov_status_inactive(event: &ControlLoopEvent) -> bool {
    [VSERVER_PROV_STATUS, GENERIC_VNF_PROV_STATUS]
        .iter()
        .filter_map(|key| event.aai.get(*key))
        .any(|status| status != "ACTIVE")
}

fn is_aai_true(aai: &HashMap<String, String>, key: &str) -> bool {
    aai.get(key)
        .map(|v| TRUE_VALUES.iter().any(|t| t.eq_ignore_ascii_case(v.trim())))
        .unwrap_or(false)
}
