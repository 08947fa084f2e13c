//! Mock capabilities shared by the integration tests.

use async_trait::async_trait;
use jnana::llm::{LLMClient, LLMResponse, OfflineClient};
use jnana::types::{AppError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Judge that always returns the same verdict, optionally failing every
/// match between two specific contents.
pub struct ScriptedJudge {
    verdict: String,
    failing_pair: Option<(String, String)>,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl ScriptedJudge {
    pub fn always(verdict: &str) -> Self {
        Self {
            verdict: verdict.to_string(),
            failing_pair: None,
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fails whenever the prompt contains both contents.
    pub fn failing_between(mut self, a: &str, b: &str) -> Self {
        self.failing_pair = Some((a.to_string(), b.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMClient for ScriptedJudge {
    async fn invoke(&self, prompt: &str, _schema: Option<&Value>) -> Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((a, b)) = &self.failing_pair {
            if prompt.contains(a.as_str()) && prompt.contains(b.as_str()) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(AppError::Capability("judge unavailable for this pair".into()));
            }
        }
        Ok(LLMResponse::Structured(json!({
            "criteria_comparison": [
                {"criterion": "novelty", "winner": self.verdict},
            ],
            "overall_winner": self.verdict,
            "reasoning": "scripted verdict",
        })))
    }

    fn model_name(&self) -> &str {
        "scripted-judge"
    }
}

/// Offline capability that sleeps on every call and records peak concurrency.
pub struct ConcurrencyGauge {
    inner: OfflineClient,
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: OfflineClient::new(),
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMClient for ConcurrencyGauge {
    async fn invoke(&self, prompt: &str, schema: Option<&Value>) -> Result<LLMResponse> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.invoke(prompt, schema).await
    }

    fn model_name(&self) -> &str {
        "gauge"
    }
}
