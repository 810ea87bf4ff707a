//! Operational policy processor.
//!
//! Walks the policy graph: starts at the trigger, then follows the
//! next-policy id chosen by each operation result until a `final_*` id.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{
    FinalResult, OperationResult, OperationalPolicy, PolicyError, PolicyOperation, ToscaPolicy,
};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("operational policy {0} has no trigger")]
    MissingTrigger(String),

    #[error("unable to find policy operation {0}")]
    UnknownOperation(String),

    #[error("current policy is final: {0}")]
    Final(FinalResult),
}

/// Cursor over an operational policy
#[derive(Debug, Clone)]
pub struct ControlLoopProcessor {
    policy: OperationalPolicy,
    current: String,
}

impl ControlLoopProcessor {
    pub fn new(tosca: &ToscaPolicy) -> Result<Self, ProcessorError> {
        let policy = tosca.operational()?;
        if policy.trigger.trim().is_empty() {
            return Err(ProcessorError::MissingTrigger(tosca.name.clone()));
        }

        let current = policy.trigger.clone();
        Ok(Self { policy, current })
    }

    pub fn policy(&self) -> &OperationalPolicy {
        &self.policy
    }

    /// Id of the current node
    pub fn current_id(&self) -> &str {
        &self.current
    }

    /// Overall control-loop timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.policy.timeout)
    }

    /// Final result if the current node is a `final_*` id
    pub fn is_current_final(&self) -> Option<FinalResult> {
        FinalResult::from_policy_id(&self.current)
    }

    /// The operation at the current node
    pub fn current_policy(&self) -> Result<Arc<PolicyOperation>, ProcessorError> {
        if let Some(result) = self.is_current_final() {
            return Err(ProcessorError::Final(result));
        }

        self.policy
            .operations
            .iter()
            .find(|op| op.id == self.current)
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| ProcessorError::UnknownOperation(self.current.clone()))
    }

    /// Move to the node chosen by `result`
    pub fn next_policy_for_result(&mut self, result: OperationResult) -> Result<(), ProcessorError> {
        let op = self.current_policy()?;

        self.current = match result {
            OperationResult::Success => op.success.clone(),
            OperationResult::Failure => op.failure.clone(),
            OperationResult::FailureTimeout => op.failure_timeout.clone(),
            OperationResult::FailureRetries => op.failure_retries.clone(),
            OperationResult::FailureException => op.failure_exception.clone(),
            OperationResult::FailureGuard => op.failure_guard.clone(),
        };

        Ok(())
    }
}
