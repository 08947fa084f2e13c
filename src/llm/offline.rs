//! Deterministic offline capability.
//!
//! Answers every call locally by filling the requested response schema. Used
//! by the CLI when no model backend is wired in, and handy for demos.

use super::client::{LLMClient, LLMResponse};
use crate::types::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct OfflineClient {
    model: String,
    calls: AtomicU64,
}

impl Default for OfflineClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineClient {
    pub fn new() -> Self {
        Self {
            model: "offline".to_string(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fill(schema: &Value, field: &str, prompt: &str, seed: u64) -> Value {
        match schema.get("enum").and_then(Value::as_array) {
            Some(options) if !options.is_empty() => {
                let idx = (digest(&(prompt, field, seed)) % options.len() as u64) as usize;
                return options[idx].clone();
            }
            _ => {}
        }

        match schema.get("type").and_then(Value::as_str).unwrap_or("string") {
            "object" => {
                let mut out = Map::new();
                if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                    for (name, sub) in props {
                        out.insert(name.clone(), Self::fill(sub, name, prompt, seed));
                    }
                }
                Value::Object(out)
            }
            "array" => Value::Array(Vec::new()),
            "number" => json!(((digest(&(prompt, field, seed)) % 100) as f64) / 10.0),
            "integer" => json!(digest(&(prompt, field, seed)) % 10),
            "boolean" => json!(digest(&(prompt, field, seed)) % 2 == 0),
            _ => Value::String(describe(field, prompt, seed)),
        }
    }
}

fn digest<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn describe(field: &str, prompt: &str, seed: u64) -> String {
    let topic: String = prompt
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .chars()
        .take(80)
        .collect();
    format!("{} #{:04x}: {}", field.replace('_', " "), seed & 0xffff, topic.trim())
}

#[async_trait]
impl LLMClient for OfflineClient {
    async fn invoke(&self, prompt: &str, schema: Option<&Value>) -> Result<LLMResponse> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let seed = digest(&(prompt, call));
        Ok(match schema {
            Some(schema) => LLMResponse::Structured(Self::fill(schema, "response", prompt, seed)),
            None => LLMResponse::Text(describe("response", prompt, seed)),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fills_schema_fields() {
        let client = OfflineClient::new();
        let schema = json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "overall_winner": {"type": "string", "enum": ["A", "B", "tie"]},
                "criteria_comparison": {"type": "array"}
            }
        });

        let value = client
            .invoke("Compare two hypotheses", Some(&schema))
            .await
            .unwrap()
            .into_structured()
            .unwrap();

        assert!(value["content"].as_str().unwrap().contains("Compare"));
        let winner = value["overall_winner"].as_str().unwrap();
        assert!(["A", "B", "tie"].contains(&winner));
        assert!(value["criteria_comparison"].as_array().unwrap().is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_text_without_schema() {
        let client = OfflineClient::new();
        let response = client.invoke("hello", None).await.unwrap();
        assert!(matches!(response, LLMResponse::Text(_)));
    }
}
