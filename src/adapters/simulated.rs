//! Simulated operator.
//!
//! Answers every request with a scripted outcome after an optional delay.
//! Used by `clctl replay` when no live endpoint is configured, and by tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{OperationRequest, Operator, OperatorOutput};
use crate::config::OperatorConfig;
use crate::domain::OperationResult;

pub struct SimulatedOperator {
    actor: String,
    operation: String,
    property_names: Vec<String>,
    result: OperationResult,
    response: Option<Value>,
    message: Option<String>,
    control_loop_payload: Option<String>,
    error: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl SimulatedOperator {
    /// Operator that succeeds immediately with no response
    pub fn new(actor: &str, operation: &str) -> Self {
        Self {
            actor: actor.to_string(),
            operation: operation.to_string(),
            property_names: Vec::new(),
            result: OperationResult::Success,
            response: None,
            message: None,
            control_loop_payload: None,
            error: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_config(cfg: &OperatorConfig) -> Self {
        let mut op = Self::new(&cfg.actor, &cfg.operation)
            .with_property_names(cfg.property_names.clone())
            .with_result(cfg.result)
            .with_delay(Duration::from_millis(cfg.delay_ms));
        op.response = cfg.response.clone();
        op.message = cfg.message.clone();
        op
    }

    pub fn with_property_names(mut self, names: Vec<String>) -> Self {
        self.property_names = names;
        self
    }

    pub fn with_result(mut self, result: OperationResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Payload relayed to the event originator on success
    pub fn with_control_loop_payload(mut self, payload: impl Into<String>) -> Self {
        self.control_loop_payload = Some(payload.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every call fail with an error instead of an outcome
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Number of times `execute` has been called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operator for SimulatedOperator {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn operation(&self) -> &str {
        &self.operation
    }

    fn property_names(&self) -> Vec<String> {
        self.property_names.clone()
    }

    async fn execute(&self, request: &OperationRequest) -> Result<OperatorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            actor = %self.actor,
            operation = %self.operation,
            request_id = %request.request_id,
            "simulated operation"
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(ref error) = self.error {
            anyhow::bail!("{}", error);
        }

        Ok(OperatorOutput {
            result: self.result,
            message: self.message.clone(),
            response: self.response.clone(),
            control_loop_payload: self.control_loop_payload.clone(),
        })
    }
}
