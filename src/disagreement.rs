//! Divergence between generator optimism and the validator verdict

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::generator::GenerationResponse;
use crate::validator::{ValidationResponse, ValidationStatus};

/// Validator score (0-1) above which an approval is taken at face value
pub const AGREEMENT_SCORE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisagreementSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DisagreementSeverity {
    pub fn from_divergence(divergence: f64) -> Self {
        if divergence > 0.4 {
            Self::Critical
        } else if divergence > 0.25 {
            Self::High
        } else if divergence > 0.1 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Hand to the improvement loop
    Revise,
    /// Needs a human decision
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    /// Arbitrated content; no arbitration is performed, so this stays empty
    pub resolved_content: Option<Value>,
    pub note: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub id: String,
    /// Generator self-confidence, 0-1
    pub generator_confidence: f64,
    /// Validator score, 0-1
    pub validator_confidence: f64,
    pub divergence: f64,
    pub validator_status: ValidationStatus,
    pub severity: DisagreementSeverity,
    pub reason: String,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
}

/// Compare the two roles; `None` means they agree
pub fn detect(
    generation: &GenerationResponse,
    validation: &ValidationResponse,
) -> Option<Disagreement> {
    detect_scores(generation.confidence, validation)
}

pub fn detect_scores(
    generator_confidence: f64,
    validation: &ValidationResponse,
) -> Option<Disagreement> {
    let score = validation.score();
    if validation.status == ValidationStatus::Approved && score > AGREEMENT_SCORE {
        return None;
    }

    let divergence = (generator_confidence - score).abs();
    let mut severity = DisagreementSeverity::from_divergence(divergence);
    if validation.status == ValidationStatus::Rejected {
        severity = severity.max(DisagreementSeverity::High);
    }

    let reason = match validation.status {
        ValidationStatus::Approved => format!(
            "validator approved with a low score ({:.0}%)",
            validation.confidence
        ),
        ValidationStatus::NeedsRevision => format!(
            "validator requested revision at {:.0}% with {} issue(s)",
            validation.confidence,
            validation.issues.len()
        ),
        ValidationStatus::Rejected => format!(
            "validator rejected the content at {:.0}%",
            validation.confidence
        ),
    };

    Some(Disagreement {
        id: uuid::Uuid::new_v4().to_string(),
        generator_confidence,
        validator_confidence: score,
        divergence,
        validator_status: validation.status,
        severity,
        reason,
        resolution: None,
        created_at: Utc::now(),
    })
}

/// Picks how a disagreement is handled; never rewrites content itself
#[derive(Debug, Clone)]
pub struct DisagreementResolver {
    escalation_divergence: f64,
}

impl DisagreementResolver {
    pub fn new(escalation_divergence: f64) -> Self {
        Self {
            escalation_divergence,
        }
    }

    pub fn resolve(&self, disagreement: &mut Disagreement) {
        let escalate = disagreement.divergence > self.escalation_divergence
            || disagreement.severity == DisagreementSeverity::Critical;
        let (strategy, note) = if escalate {
            (
                ResolutionStrategy::Escalate,
                format!(
                    "divergence {:.2} exceeds escalation limit {:.2}; human review required",
                    disagreement.divergence, self.escalation_divergence
                ),
            )
        } else {
            (
                ResolutionStrategy::Revise,
                "routed to iterative improvement".to_string(),
            )
        };
        info!(
            disagreement = %disagreement.id,
            severity = ?disagreement.severity,
            strategy = ?strategy,
            "Disagreement resolved"
        );
        disagreement.resolution = Some(Resolution {
            strategy,
            resolved_content: None,
            note,
            resolved_at: Utc::now(),
        });
    }
}
