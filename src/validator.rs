//! B1: independent validation of generated content
//!
//! The validator never fails: provider errors and unparseable output both
//! collapse into a conservative fallback verdict that asks for manual review.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clients::{ChatProvider, ChatRequest, TokenUsage};
use crate::config::ValidatorConfig;
use crate::generator::{ContentType, render_context};
use crate::prompts::{PromptRegistry, VALIDATION_PROMPT_ID};
use crate::utils::{clamp_percent, extract_json, number_value, weighted_average};

/// Score assigned when the validator cannot produce a verdict
pub const FALLBACK_CONFIDENCE: f64 = 70.0;
/// Below this (and below the approval threshold) content is rejected outright
pub const REJECTION_FLOOR: f64 = 60.0;
pub const FALLBACK_ISSUE: &str = "Automated validation unavailable; manual review required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Approved,
    NeedsRevision,
    Rejected,
}

impl ValidationStatus {
    pub fn from_confidence(confidence: f64, threshold: f64) -> Self {
        if confidence >= threshold {
            ValidationStatus::Approved
        } else if confidence >= REJECTION_FLOOR {
            ValidationStatus::NeedsRevision
        } else {
            ValidationStatus::Rejected
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "approved" | "approve" | "pass" | "passed" | "accepted" => Some(Self::Approved),
            "needs_revision" | "revise" | "revision" | "needs_review" | "needs_changes" => {
                Some(Self::NeedsRevision)
            }
            "rejected" | "reject" | "fail" | "failed" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" | "minor" | "info" => Self::Low,
            "high" | "major" => Self::High,
            "critical" | "blocker" | "severe" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Accuracy,
    Bias,
    Clarity,
    Consistency,
    Compliance,
    Other,
}

impl IssueCategory {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "accuracy" | "factual" => Self::Accuracy,
            "bias" | "fairness" => Self::Bias,
            "clarity" | "readability" => Self::Clarity,
            "consistency" => Self::Consistency,
            "compliance" | "policy" => Self::Compliance,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Bias => "bias",
            Self::Clarity => "clarity",
            Self::Consistency => "consistency",
            Self::Compliance => "compliance",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub category: IssueCategory,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Per-dimension scores, each in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub accuracy: f64,
    pub bias: f64,
    pub clarity: f64,
    pub consistency: f64,
    pub compliance: f64,
}

impl ValidationDetails {
    pub const DIMENSIONS: [&'static str; 5] =
        ["accuracy", "bias", "clarity", "consistency", "compliance"];

    pub fn uniform(score: f64) -> Self {
        let s = clamp_percent(score);
        Self {
            accuracy: s,
            bias: s,
            clarity: s,
            consistency: s,
            compliance: s,
        }
    }

    pub fn values(&self) -> [f64; 5] {
        [
            self.accuracy,
            self.bias,
            self.clarity,
            self.consistency,
            self.compliance,
        ]
    }

    pub fn mean(&self) -> f64 {
        self.values().iter().sum::<f64>() / 5.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Overall score in [0, 100]
    pub confidence: f64,
    pub status: ValidationStatus,
    pub details: ValidationDetails,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    /// True when this is the conservative default, not a model verdict
    pub fallback: bool,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResponse {
    pub fn fallback(node_id: Option<String>, provider: &str, model: &str) -> Self {
        Self {
            node_id,
            confidence: FALLBACK_CONFIDENCE,
            status: ValidationStatus::NeedsRevision,
            details: ValidationDetails::uniform(FALLBACK_CONFIDENCE),
            issues: vec![Issue {
                severity: IssueSeverity::High,
                category: IssueCategory::Other,
                description: FALLBACK_ISSUE.to_string(),
                suggestion: Some("Route this content to a human reviewer".to_string()),
                location: None,
            }],
            suggestions: Vec::new(),
            fallback: true,
            provider: provider.to_string(),
            model: model.to_string(),
            usage: TokenUsage::default(),
            validated_at: Utc::now(),
        }
    }

    /// Overall score on the [0, 1] scale
    pub fn score(&self) -> f64 {
        self.confidence / 100.0
    }

    /// Feedback lines suitable for a revision prompt
    pub fn feedback(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .issues
            .iter()
            .filter(|i| i.description != FALLBACK_ISSUE)
            .map(|i| match &i.suggestion {
                Some(s) if !s.trim().is_empty() => {
                    format!("[{}] {} Suggestion: {}", i.category.as_str(), i.description, s)
                }
                _ => format!("[{}] {}", i.category.as_str(), i.description),
            })
            .collect();
        lines.extend(
            self.suggestions
                .iter()
                .filter(|s| !s.trim().is_empty())
                .cloned(),
        );
        lines
    }

    /// Combine per-node verdicts using node weights
    ///
    /// Confidence and dimensions are weighted means. Status is approved only
    /// when every node is approved and rejected when any node is rejected.
    pub fn aggregate(parts: &[(ValidationResponse, f64)]) -> Option<Self> {
        let (first, _) = parts.first()?;
        let status = if parts.iter().any(|(r, _)| r.status == ValidationStatus::Rejected) {
            ValidationStatus::Rejected
        } else if parts.iter().all(|(r, _)| r.status == ValidationStatus::Approved) {
            ValidationStatus::Approved
        } else {
            ValidationStatus::NeedsRevision
        };

        let mut issues = Vec::new();
        let mut suggestions: Vec<String> = Vec::new();
        let mut usage = TokenUsage::default();
        for (r, _) in parts {
            for issue in &r.issues {
                let mut issue = issue.clone();
                if issue.location.is_none() {
                    issue.location = r.node_id.clone();
                }
                issues.push(issue);
            }
            for s in &r.suggestions {
                if !suggestions.contains(s) {
                    suggestions.push(s.clone());
                }
            }
            usage.add(&r.usage);
        }

        Some(Self {
            node_id: None,
            confidence: clamp_percent(blend(parts, |r| r.confidence)),
            status,
            details: ValidationDetails {
                accuracy: clamp_percent(blend(parts, |r| r.details.accuracy)),
                bias: clamp_percent(blend(parts, |r| r.details.bias)),
                clarity: clamp_percent(blend(parts, |r| r.details.clarity)),
                consistency: clamp_percent(blend(parts, |r| r.details.consistency)),
                compliance: clamp_percent(blend(parts, |r| r.details.compliance)),
            },
            issues,
            suggestions,
            fallback: parts.iter().any(|(r, _)| r.fallback),
            provider: first.provider.clone(),
            model: first.model.clone(),
            usage,
            validated_at: Utc::now(),
        })
    }
}

fn blend(parts: &[(ValidationResponse, f64)], f: impl Fn(&ValidationResponse) -> f64) -> f64 {
    weighted_average(parts.iter().map(|(r, w)| (f(r), *w)))
}

/// Verdict fields recovered from model output, already clamped
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVerdict {
    pub confidence: f64,
    pub status: ValidationStatus,
    pub details: ValidationDetails,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
}

/// Parse a validator reply; `None` means the reply carried no usable verdict
pub fn parse_verdict(text: &str, threshold: f64) -> Option<ParsedVerdict> {
    let root = extract_json(text)?;
    let obj = root.as_object()?;

    let details_obj = ["validationDetails", "validation_details", "details", "scores"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_object));
    let dimension = |name: &str| -> Option<f64> {
        details_obj
            .and_then(|d| d.get(name))
            .and_then(number_value)
            .map(clamp_percent)
    };
    let present: HashMap<&str, f64> = ValidationDetails::DIMENSIONS
        .iter()
        .filter_map(|d| dimension(d).map(|v| (*d, v)))
        .collect();

    let confidence = match ["confidence", "overall", "score"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(number_value))
    {
        Some(c) => clamp_percent(c),
        None if !present.is_empty() => {
            clamp_percent(present.values().sum::<f64>() / present.len() as f64)
        }
        None => return None,
    };

    let dim = |name: &str| present.get(name).copied().unwrap_or(confidence);
    let details = ValidationDetails {
        accuracy: dim("accuracy"),
        bias: dim("bias"),
        clarity: dim("clarity"),
        consistency: dim("consistency"),
        compliance: dim("compliance"),
    };

    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .and_then(ValidationStatus::parse)
        .unwrap_or_else(|| ValidationStatus::from_confidence(confidence, threshold));

    let issues = obj
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_issue).collect())
        .unwrap_or_default();

    let suggestions = obj
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(ParsedVerdict {
        confidence,
        status,
        details,
        issues,
        suggestions,
    })
}

fn parse_issue(value: &Value) -> Option<Issue> {
    if let Some(text) = value.as_str() {
        let text = text.trim();
        return (!text.is_empty()).then(|| Issue {
            severity: IssueSeverity::Medium,
            category: IssueCategory::Other,
            description: text.to_string(),
            suggestion: None,
            location: None,
        });
    }
    let obj = value.as_object()?;
    let description = obj
        .get("description")
        .or_else(|| obj.get("message"))
        .and_then(Value::as_str)?
        .trim()
        .to_string();
    if description.is_empty() {
        return None;
    }
    let text_field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    Some(Issue {
        severity: obj
            .get("severity")
            .and_then(Value::as_str)
            .map(IssueSeverity::parse)
            .unwrap_or(IssueSeverity::Medium),
        category: obj
            .get("category")
            .and_then(Value::as_str)
            .map(IssueCategory::parse)
            .unwrap_or(IssueCategory::Other),
        description,
        suggestion: text_field("suggestion"),
        location: text_field("location"),
    })
}

pub struct ValidatorService {
    provider: Arc<dyn ChatProvider>,
    prompts: Arc<PromptRegistry>,
    config: ValidatorConfig,
    threshold: f64,
}

impl ValidatorService {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        prompts: Arc<PromptRegistry>,
        config: ValidatorConfig,
        threshold: f64,
    ) -> Self {
        Self {
            provider,
            prompts,
            config,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn build_prompt(&self, request: &ValidationRequest) -> Option<(String, String)> {
        let template = self.prompts.get(VALIDATION_PROMPT_ID)?;
        let vars: HashMap<&str, String> = [
            ("content_type", request.content_type.to_string()),
            ("context", render_context(&request.context)),
            ("content", request.content.clone()),
            ("threshold", format!("{:.0}", self.threshold)),
        ]
        .into();
        Some((template.system.clone(), template.render(&vars)))
    }

    /// Validate one piece of content; always yields a verdict
    pub async fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        let provider = self.provider.name();
        let model = self.provider.model();

        let Some((system, prompt)) = self.build_prompt(request) else {
            warn!("Validation prompt missing from registry, using fallback verdict");
            return ValidationResponse::fallback(request.node_id.clone(), provider, model);
        };
        let chat = ChatRequest::new(prompt)
            .with_system(system)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let completion = match self.provider.complete(&chat).await {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    provider,
                    node = ?request.node_id,
                    error = %e,
                    "Validator call failed, using fallback verdict"
                );
                return ValidationResponse::fallback(request.node_id.clone(), provider, model);
            }
        };

        match parse_verdict(&completion.text, self.threshold) {
            Some(verdict) => {
                debug!(
                    node = ?request.node_id,
                    confidence = verdict.confidence,
                    status = %verdict.status,
                    issues = verdict.issues.len(),
                    "Validated content"
                );
                ValidationResponse {
                    node_id: request.node_id.clone(),
                    confidence: verdict.confidence,
                    status: verdict.status,
                    details: verdict.details,
                    issues: verdict.issues,
                    suggestions: verdict.suggestions,
                    fallback: false,
                    provider: provider.to_string(),
                    model: completion.model,
                    usage: completion.usage,
                    validated_at: Utc::now(),
                }
            }
            None => {
                warn!(
                    node = ?request.node_id,
                    reply = %crate::clients::truncate_snippet(&completion.text, 200),
                    "Unparseable validator reply, using fallback verdict"
                );
                let mut fallback =
                    ValidationResponse::fallback(request.node_id.clone(), provider, model);
                fallback.usage = completion.usage;
                fallback
            }
        }
    }

    /// Validate independent nodes concurrently; one failure never affects the others
    pub async fn validate_many(&self, requests: &[ValidationRequest]) -> Vec<ValidationResponse> {
        join_all(requests.iter().map(|r| self.validate(r))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_scores() {
        let verdict = parse_verdict(
            r#"{"confidence": 140, "status": "approved",
                "validationDetails": {"accuracy": -5, "bias": 250, "clarity": "88", "consistency": 90, "compliance": 101}}"#,
            85.0,
        )
        .unwrap();
        assert_eq!(verdict.confidence, 100.0);
        assert_eq!(verdict.details.accuracy, 0.0);
        assert_eq!(verdict.details.bias, 100.0);
        assert_eq!(verdict.details.clarity, 88.0);
        assert_eq!(verdict.details.compliance, 100.0);
    }

    #[test]
    fn missing_fields_are_filled() {
        let verdict = parse_verdict(
            r#"{"validationDetails": {"accuracy": 80, "clarity": 60}}"#,
            85.0,
        )
        .unwrap();
        assert_eq!(verdict.confidence, 70.0);
        assert_eq!(verdict.details.bias, 70.0);
        assert_eq!(verdict.status, ValidationStatus::NeedsRevision);

        let verdict = parse_verdict(r#"{"confidence": 91}"#, 85.0).unwrap();
        assert_eq!(verdict.details, ValidationDetails::uniform(91.0));
        assert_eq!(verdict.status, ValidationStatus::Approved);
    }

    #[test]
    fn no_verdict_in_reply() {
        assert!(parse_verdict("I think it's fine.", 85.0).is_none());
        assert!(parse_verdict(r#"{"issues": []}"#, 85.0).is_none());
    }

    #[test]
    fn issues_tolerate_loose_shapes() {
        let verdict = parse_verdict(
            r#"{"confidence": 50, "issues": [
                "plain string issue",
                {"severity": "CRITICAL", "category": "policy", "description": "Mentions PII", "suggestion": "Redact"},
                {"severity": "weird", "category": "weird", "description": "Odd"},
                {"severity": "low"}
            ]}"#,
            85.0,
        )
        .unwrap();
        assert_eq!(verdict.issues.len(), 3);
        assert_eq!(verdict.issues[1].severity, IssueSeverity::Critical);
        assert_eq!(verdict.issues[1].category, IssueCategory::Compliance);
        assert_eq!(verdict.issues[2].severity, IssueSeverity::Medium);
        assert_eq!(verdict.issues[2].category, IssueCategory::Other);
        assert_eq!(verdict.status, ValidationStatus::Rejected);
    }

    #[test]
    fn fallback_shape() {
        let fb = ValidationResponse::fallback(Some("summary".into()), "openai", "gpt-4o");
        assert_eq!(fb.confidence, FALLBACK_CONFIDENCE);
        assert!(!fb.issues.is_empty());
        assert!(fb.fallback);
        assert!(fb.feedback().is_empty());
    }

    #[test]
    fn aggregate_weights_and_status() {
        let mut a = ValidationResponse::fallback(Some("a".into()), "p", "m");
        a.fallback = false;
        a.issues.clear();
        a.confidence = 90.0;
        a.details = ValidationDetails::uniform(90.0);
        a.status = ValidationStatus::Approved;
        let mut b = a.clone();
        b.node_id = Some("b".into());
        b.confidence = 60.0;
        b.details = ValidationDetails::uniform(60.0);
        b.status = ValidationStatus::NeedsRevision;
        b.issues.push(Issue {
            severity: IssueSeverity::Low,
            category: IssueCategory::Clarity,
            description: "wordy".into(),
            suggestion: None,
            location: None,
        });

        let agg = ValidationResponse::aggregate(&[(a.clone(), 2.0), (b, 1.0)]).unwrap();
        assert!((agg.confidence - 80.0).abs() < 1e-9);
        assert_eq!(agg.status, ValidationStatus::NeedsRevision);
        assert_eq!(agg.issues[0].location.as_deref(), Some("b"));

        let single = ValidationResponse::aggregate(&[(a.clone(), 1.0)]).unwrap();
        assert_eq!(single.status, ValidationStatus::Approved);
        assert_eq!(single.confidence, 90.0);

        assert!(ValidationResponse::aggregate(&[]).is_none());
    }
}
