//! Scripted in-process chat provider shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dual_ai::clients::{ChatCompletion, ChatProvider, ChatRequest, ProviderError, TokenUsage};

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, ProviderError> + Send + Sync>;

pub struct ScriptedProvider {
    name: String,
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(
        name: &str,
        responder: impl Fn(&ChatRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always replies with `text`
    pub fn fixed(name: &str, text: &str) -> Self {
        let text = text.to_string();
        Self::new(name, move |_| Ok(text.clone()))
    }

    /// Always fails with a 503
    pub fn failing(name: &str) -> Self {
        Self::new(name, |_| {
            Err(ProviderError::Http {
                status: 503,
                body: "overloaded".into(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(message) = request.messages.last() {
            self.prompts.lock().unwrap().push(message.content.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = (self.responder)(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply.map(|text| ChatCompletion {
            text,
            model: "scripted-model".to_string(),
            usage: TokenUsage::new(10, 20),
            stop_reason: Some("end_turn".to_string()),
        })
    }
}

pub fn prompt_text(request: &ChatRequest) -> &str {
    request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Validator reply JSON with every dimension at `confidence`
pub fn verdict_json(confidence: f64, status: &str, issues: &[&str]) -> String {
    let issues: Vec<serde_json::Value> = issues
        .iter()
        .map(|d| {
            serde_json::json!({
                "severity": "medium",
                "category": "clarity",
                "description": d,
                "suggestion": "Tighten the wording"
            })
        })
        .collect();
    serde_json::json!({
        "confidence": confidence,
        "status": status,
        "validationDetails": {
            "accuracy": confidence,
            "bias": confidence,
            "clarity": confidence,
            "consistency": confidence,
            "compliance": confidence
        },
        "issues": issues,
        "suggestions": []
    })
    .to_string()
}
