//! A1: content generation with single-shot provider fallback

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clients::{ChatCompletion, ChatProvider, ChatRequest, TokenUsage};
use crate::conditions::matching_modifiers;
use crate::config::GeneratorConfig;
use crate::error::{DualAiError, Result};
use crate::prompts::{PromptRegistry, REVISION_PROMPT_ID};
use crate::utils::extract_json;

/// Upper bound on self-reported generation confidence
pub const MAX_GENERATION_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Assessment,
    Report,
    Coaching,
    Insight,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Assessment,
        ContentType::Report,
        ContentType::Coaching,
        ContentType::Insight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assessment => "assessment",
            Self::Report => "report",
            Self::Coaching => "coaching",
            Self::Insight => "insight",
        }
    }

    pub fn prompt_id(&self) -> &'static str {
        match self {
            Self::Assessment => "generate-assessment-v1",
            Self::Report => "generate-report-v1",
            Self::Coaching => "generate-coaching-v1",
            Self::Insight => "generate-insight-v1",
        }
    }

    /// Top-level keys a well-formed response of this type carries
    pub fn expected_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Assessment => &["summary", "score", "strengths", "gaps", "recommendations"],
            Self::Report => &["title", "summary", "findings", "recommendations"],
            Self::Coaching => &["summary", "goals", "actions", "timeline"],
            Self::Insight => &["headline", "insight", "evidence", "actions"],
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = DualAiError;

    fn from_str(s: &str) -> Result<Self> {
        ContentType::ALL
            .into_iter()
            .find(|ct| ct.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DualAiError::InvalidParams {
                message: format!("unknown content type '{s}'"),
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Reviewer feedback; with `previous_content` this turns the call into a revision
    pub feedback: Vec<String>,
    pub previous_content: Option<String>,
    /// Section being revised
    pub node_type: Option<String>,
    /// Caller-supplied correlation id
    pub request_id: Option<String>,
    pub skip_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub content_type: ContentType,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(content_type: ContentType, context: Value) -> Self {
        Self {
            content_type,
            context,
            options: GenerationOptions::default(),
        }
    }

    pub fn is_revision(&self) -> bool {
        !self.options.feedback.is_empty() && self.options.previous_content.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "body", rename_all = "snake_case")]
pub enum GeneratedContent {
    Structured(Value),
    Text(String),
}

impl GeneratedContent {
    /// Parse model output, preferring embedded JSON over raw text
    pub fn parse(raw: &str) -> Self {
        match extract_json(raw) {
            Some(v) => GeneratedContent::Structured(v),
            None => GeneratedContent::Text(raw.trim().to_string()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, GeneratedContent::Structured(_))
    }

    /// Text form handed to validators and revision prompts
    pub fn as_text(&self) -> String {
        match self {
            GeneratedContent::Structured(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            GeneratedContent::Text(t) => t.clone(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            GeneratedContent::Structured(v) => v.clone(),
            GeneratedContent::Text(t) => Value::String(t.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: GeneratedContent,
    /// Self-estimated, in [0, MAX_GENERATION_CONFIDENCE]
    pub confidence: f64,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub used_fallback: bool,
    pub prompt_id: String,
    pub prompt_checksum: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip)]
    pub raw_text: String,
}

/// Heuristic self-confidence for a completion, clamped to [0, 0.95]
pub fn estimate_confidence(
    content: &GeneratedContent,
    raw_len: usize,
    expected_keys: Option<&[&str]>,
    truncated: bool,
    used_fallback: bool,
) -> f64 {
    let mut confidence: f64 = 0.70;
    if content.is_structured() {
        confidence += 0.10;
    }
    if raw_len >= 500 {
        confidence += 0.05;
    }
    if let (Some(keys), GeneratedContent::Structured(Value::Object(map))) = (expected_keys, content)
        && !keys.is_empty()
        && keys.iter().all(|k| map.contains_key(*k))
    {
        confidence += 0.05;
    }
    if truncated {
        confidence -= 0.10;
    }
    if used_fallback {
        confidence -= 0.05;
    }
    confidence.clamp(0.0, MAX_GENERATION_CONFIDENCE)
}

pub struct GeneratorService {
    primary: Arc<dyn ChatProvider>,
    fallback: Option<Arc<dyn ChatProvider>>,
    prompts: Arc<PromptRegistry>,
    config: GeneratorConfig,
    batch_size: usize,
}

impl GeneratorService {
    pub fn new(
        primary: Arc<dyn ChatProvider>,
        fallback: Option<Arc<dyn ChatProvider>>,
        prompts: Arc<PromptRegistry>,
        config: GeneratorConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            prompts,
            config,
            batch_size: batch_size.max(1),
        }
    }

    /// Render the prompt for `request`; returns (system, user prompt, prompt id, checksum)
    pub fn build_prompt(
        &self,
        request: &GenerationRequest,
    ) -> Result<(String, String, String, String)> {
        let prompt_id = if request.is_revision() {
            REVISION_PROMPT_ID
        } else {
            request.content_type.prompt_id()
        };
        let template = self
            .prompts
            .get(prompt_id)
            .ok_or_else(|| DualAiError::Internal {
                message: format!("prompt '{prompt_id}' is not registered"),
            })?;

        let modifiers = matching_modifiers(&self.config.modifiers, &request.context);
        let modifier_block = if modifiers.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = modifiers
                .iter()
                .map(|m| format!("- {}", m.instruction))
                .collect();
            format!("Additional instructions:\n{}\n\n", lines.join("\n"))
        };
        if !modifiers.is_empty() {
            debug!(
                modifiers = ?modifiers.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
                "Applying prompt modifiers"
            );
        }

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("content_type", request.content_type.to_string());
        vars.insert("context", render_context(&request.context));
        vars.insert("modifiers", modifier_block);
        vars.insert(
            "expected_keys",
            request.content_type.expected_keys().join(", "),
        );
        if request.is_revision() {
            vars.insert(
                "node_type",
                request.options.node_type.clone().unwrap_or_else(|| "content".into()),
            );
            vars.insert(
                "previous_content",
                request.options.previous_content.clone().unwrap_or_default(),
            );
            let feedback: Vec<String> = request
                .options
                .feedback
                .iter()
                .map(|f| format!("- {}", f.trim()))
                .collect();
            vars.insert("feedback", feedback.join("\n"));
        }

        Ok((
            template.system.clone(),
            template.render(&vars),
            template.id.clone(),
            template.lineage.checksum.clone(),
        ))
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let (system, prompt, prompt_id, prompt_checksum) = self.build_prompt(request)?;
        let chat = ChatRequest::new(prompt)
            .with_system(system)
            .with_temperature(request.options.temperature.unwrap_or(self.config.temperature))
            .with_max_tokens(request.options.max_tokens.unwrap_or(self.config.max_tokens));

        let (completion, provider, used_fallback) = match self.primary.complete(&chat).await {
            Ok(c) => (c, self.primary.name().to_string(), false),
            Err(primary_err) => {
                let Some(fallback) = self.fallback.as_ref() else {
                    warn!(
                        provider = self.primary.name(),
                        error = %primary_err,
                        "Generation failed with no fallback configured"
                    );
                    return Err(DualAiError::Generation {
                        message: primary_err.to_string(),
                    });
                };
                warn!(
                    provider = self.primary.name(),
                    fallback = fallback.name(),
                    error = %primary_err,
                    "Primary generation failed, trying fallback"
                );
                match fallback.complete(&chat).await {
                    Ok(c) => (c, fallback.name().to_string(), true),
                    Err(fallback_err) => {
                        return Err(DualAiError::Generation {
                            message: format!(
                                "{}; fallback {} also failed: {}",
                                primary_err,
                                fallback.name(),
                                fallback_err
                            ),
                        });
                    }
                }
            }
        };

        let response = self.to_response(
            request,
            completion,
            provider,
            used_fallback,
            prompt_id,
            prompt_checksum,
        );
        info!(
            content_type = %request.content_type,
            provider = %response.provider,
            model = %response.model,
            confidence = response.confidence,
            tokens = response.usage.total_tokens,
            revision = request.is_revision(),
            "Generated content"
        );
        Ok(response)
    }

    fn to_response(
        &self,
        request: &GenerationRequest,
        completion: ChatCompletion,
        provider: String,
        used_fallback: bool,
        prompt_id: String,
        prompt_checksum: String,
    ) -> GenerationResponse {
        let content = GeneratedContent::parse(&completion.text);
        let expected = if request.is_revision() {
            None
        } else {
            Some(request.content_type.expected_keys())
        };
        let confidence = estimate_confidence(
            &content,
            completion.text.len(),
            expected,
            completion.is_truncated(),
            used_fallback,
        );
        GenerationResponse {
            content,
            confidence,
            provider,
            model: completion.model,
            usage: completion.usage,
            used_fallback,
            prompt_id,
            prompt_checksum,
            generated_at: Utc::now(),
            raw_text: completion.text,
        }
    }

    /// Generate in fixed-size batches; each batch runs concurrently and output
    /// order matches input order
    pub async fn generate_batch(
        &self,
        requests: &[GenerationRequest],
    ) -> Vec<Result<GenerationResponse>> {
        let mut results = Vec::with_capacity(requests.len());
        for (index, chunk) in requests.chunks(self.batch_size).enumerate() {
            debug!(batch = index, size = chunk.len(), "Generating batch");
            results.extend(join_all(chunk.iter().map(|r| self.generate(r))).await);
        }
        results
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

pub(crate) fn render_context(context: &Value) -> String {
    if context.is_null() {
        return "{}".to_string();
    }
    serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_type_round_trips_through_str() {
        for ct in ContentType::ALL {
            assert_eq!(ct.as_str().parse::<ContentType>().unwrap(), ct);
        }
        assert!("memo".parse::<ContentType>().is_err());
        assert_eq!(" Report ".parse::<ContentType>().unwrap(), ContentType::Report);
    }

    #[test]
    fn confidence_never_exceeds_cap() {
        let content = GeneratedContent::Structured(json!({
            "title": "t", "summary": "s", "findings": [], "recommendations": []
        }));
        let c = estimate_confidence(
            &content,
            2_000,
            Some(ContentType::Report.expected_keys()),
            false,
            false,
        );
        assert!(c <= MAX_GENERATION_CONFIDENCE);
        assert!((c - 0.90).abs() < 1e-9);
    }

    #[test]
    fn confidence_penalties() {
        let text = GeneratedContent::Text("short".into());
        let c = estimate_confidence(&text, 5, None, true, true);
        assert!((c - 0.55).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn parse_prefers_json() {
        assert!(GeneratedContent::parse("```json\n{\"a\":1}\n```").is_structured());
        assert_eq!(
            GeneratedContent::parse("  plain words "),
            GeneratedContent::Text("plain words".into())
        );
    }

    #[test]
    fn revision_detection() {
        let mut req = GenerationRequest::new(ContentType::Insight, json!({}));
        assert!(!req.is_revision());
        req.options.feedback = vec!["cite sources".into()];
        assert!(!req.is_revision());
        req.options.previous_content = Some("draft".into());
        assert!(req.is_revision());
    }
}
