//! HTTP operator.
//!
//! Posts the operation request as JSON to a configured endpoint. A 2xx reply
//! is a success unless its body reports `"status": "Deny"` or
//! `"status": "Failure"`; anything else is a failure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{OperationRequest, Operator, OperatorOutput};
use crate::domain::OperationResult;

pub struct HttpOperator {
    actor: String,
    operation: String,
    url: String,
    property_names: Vec<String>,
    client: reqwest::Client,
}

impl HttpOperator {
    pub fn new(actor: &str, operation: &str, url: impl Into<String>) -> Self {
        Self {
            actor: actor.to_string(),
            operation: operation.to_string(),
            url: url.into(),
            property_names: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_property_names(mut self, names: Vec<String>) -> Self {
        self.property_names = names;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Interpret a 2xx reply body
fn interpret_body(body: Value) -> OperatorOutput {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    let payload = body
        .get("payload")
        .and_then(Value::as_str)
        .map(str::to_string);

    let result = match status.as_deref() {
        Some("deny") | Some("failure") | Some("failed") => OperationResult::Failure,
        _ => OperationResult::Success,
    };

    OperatorOutput {
        result,
        message,
        response: Some(body),
        control_loop_payload: payload,
    }
}

#[async_trait]
impl Operator for HttpOperator {
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
        debug!(url = %self.url, actor = %self.actor, operation = %self.operation, "posting operation");

        let response = self
            .client
            .post(&self.url)
            .timeout(request.timeout)
            .header("X-ONAP-RequestID", request.request_id.to_string())
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {} for {}.{}", self.url, self.actor, self.operation))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(actor = %self.actor, operation = %self.operation, %status, "operation rejected");
            return Ok(OperatorOutput::failure(format!("{} returned {}: {}", self.actor, status, text)));
        }

        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read reply from {}", self.url))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid JSON reply from {}", self.url))?
        };

        Ok(interpret_body(body))
    }
}
