//! Generation/judgment capability abstraction
//!
//! Agents never talk to a model directly. They receive a [`Capability`], which
//! wraps an injected [`LLMClient`] and enforces a per-call timeout.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Injected text-generation or judging backend.
///
/// `schema` is an optional response-shape contract (a JSON object describing
/// the expected fields). Implementations that support structured output
/// should answer with [`LLMResponse::Structured`].
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn invoke(&self, prompt: &str, schema: Option<&Value>) -> Result<LLMResponse>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Response from a capability call
#[derive(Debug, Clone, PartialEq)]
pub enum LLMResponse {
    Structured(Value),
    Text(String),
}

impl LLMResponse {
    /// Returns the structured value, parsing JSON text when necessary.
    pub fn into_structured(self) -> Result<Value> {
        match self {
            LLMResponse::Structured(value) => Ok(value),
            LLMResponse::Text(text) => {
                let trimmed = strip_code_fence(&text);
                serde_json::from_str(trimmed).map_err(|e| {
                    AppError::Capability(format!("Expected structured response: {}", e))
                })
            }
        }
    }

    pub fn into_text(self) -> String {
        match self {
            LLMResponse::Text(text) => text,
            LLMResponse::Structured(Value::String(s)) => s,
            LLMResponse::Structured(value) => value.to_string(),
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// A shared client plus the per-call timeout agents must respect.
#[derive(Clone)]
pub struct Capability {
    client: Arc<dyn LLMClient>,
    timeout: Duration,
}

impl Capability {
    pub fn new(client: Arc<dyn LLMClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Calls the client, mapping failures and timeouts to `AppError::Capability`.
    ///
    /// `Cancelled` and `Validation` errors raised by the client pass through
    /// unchanged.
    pub async fn invoke(&self, prompt: &str, schema: Option<&Value>) -> Result<LLMResponse> {
        debug!(model = %self.client.model_name(), "Invoking capability");
        match tokio::time::timeout(self.timeout, self.client.invoke(prompt, schema)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(
                e @ (AppError::Capability(_) | AppError::Cancelled(_) | AppError::Validation(_)),
            )) => Err(e),
            Ok(Err(e)) => Err(AppError::Capability(e.to_string())),
            Err(_) => {
                warn!(timeout = ?self.timeout, "Capability call timed out");
                Err(AppError::Capability(format!(
                    "Call timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Calls the client with a response schema and returns the structured result.
    pub async fn invoke_structured(&self, prompt: &str, schema: &Value) -> Result<Value> {
        self.invoke(prompt, Some(schema)).await?.into_structured()
    }
}
