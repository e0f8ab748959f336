//! Outcome recording and recurring-issue detection
//!
//! Events and patterns live in bounded LRU stores; nothing is persisted and
//! no model is retrained. Insights are simple counts and bucket averages.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::LearningConfig;
use crate::generator::ContentType;
use crate::utils::clamp_unit;
use crate::validator::{
    FALLBACK_ISSUE, Issue, IssueCategory, IssueSeverity, ValidationResponse, ValidationStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEvent {
    pub id: String,
    pub workflow_id: String,
    pub content_type: ContentType,
    pub input: Value,
    pub output: Value,
    /// Issue descriptions raised by the validator
    pub feedback: Vec<String>,
    pub status: ValidationStatus,
    /// Final validator confidence, 0-100
    pub confidence: f64,
    pub impact_score: f64,
    pub had_disagreement: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePattern {
    pub id: String,
    pub category: IssueCategory,
    /// Lowercased description of the first occurrence
    pub description: String,
    pub occurrences: u32,
    pub max_severity: IssueSeverity,
    pub content_types: Vec<ContentType>,
    pub actionable: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentTypeStats {
    pub content_type: ContentType,
    pub runs: usize,
    pub avg_confidence: f64,
    pub avg_impact: f64,
    pub approval_rate: f64,
    pub disagreement_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    /// Inclusive lower bound, 0-100 in steps of 20
    pub lower: u32,
    pub upper: u32,
    pub runs: usize,
    pub avg_impact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsights {
    pub total_events: usize,
    pub by_content_type: Vec<ContentTypeStats>,
    pub confidence_buckets: Vec<ConfidenceBucket>,
    pub actionable_patterns: Vec<IssuePattern>,
}

/// Heuristic weight of a run's outcome, in [0, 1]
pub fn impact_score(status: ValidationStatus, issues: &[Issue], had_disagreement: bool) -> f64 {
    let mut score = match status {
        ValidationStatus::Approved => 0.2,
        ValidationStatus::NeedsRevision => 0.5,
        ValidationStatus::Rejected => 0.8,
    };
    for issue in issues {
        score += match issue.severity {
            IssueSeverity::Critical => 0.1,
            IssueSeverity::High => 0.05,
            _ => 0.0,
        };
    }
    if had_disagreement {
        score += 0.1;
    }
    clamp_unit(score)
}

fn descriptions_match(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

pub struct LearningRecorder {
    events: Mutex<LruCache<String, LearningEvent>>,
    patterns: Mutex<LruCache<String, IssuePattern>>,
    pattern_threshold: u32,
}

impl LearningRecorder {
    pub fn new(config: &LearningConfig) -> Self {
        Self {
            events: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.max_events).unwrap_or(NonZeroUsize::MIN),
            )),
            patterns: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.max_patterns).unwrap_or(NonZeroUsize::MIN),
            )),
            pattern_threshold: config.pattern_threshold.max(1),
        }
    }

    fn events(&self) -> MutexGuard<'_, LruCache<String, LearningEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn patterns(&self) -> MutexGuard<'_, LruCache<String, IssuePattern>> {
        self.patterns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one workflow outcome and fold its issues into the pattern store
    pub fn record(
        &self,
        workflow_id: &str,
        content_type: ContentType,
        input: &Value,
        output: &Value,
        validation: &ValidationResponse,
        had_disagreement: bool,
    ) -> LearningEvent {
        let event = LearningEvent {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            content_type,
            input: input.clone(),
            output: output.clone(),
            feedback: validation
                .issues
                .iter()
                .map(|i| i.description.clone())
                .collect(),
            status: validation.status,
            confidence: validation.confidence,
            impact_score: impact_score(validation.status, &validation.issues, had_disagreement),
            had_disagreement,
            recorded_at: Utc::now(),
        };

        for issue in &validation.issues {
            self.observe_issue(issue, content_type);
        }
        self.events().put(event.id.clone(), event.clone());
        debug!(
            event = %event.id,
            workflow = %workflow_id,
            impact = event.impact_score,
            "Recorded learning event"
        );
        event
    }

    fn observe_issue(&self, issue: &Issue, content_type: ContentType) {
        if issue.description == FALLBACK_ISSUE {
            return;
        }
        let description = issue.description.trim().to_lowercase();
        let now = Utc::now();
        let mut patterns = self.patterns();

        let existing = patterns
            .iter()
            .find(|(_, p)| {
                p.category == issue.category && descriptions_match(&p.description, &description)
            })
            .map(|(id, _)| id.clone());

        if let Some(id) = existing
            && let Some(pattern) = patterns.get_mut(&id)
        {
            pattern.occurrences += 1;
            pattern.last_seen = now;
            pattern.max_severity = pattern.max_severity.max(issue.severity);
            if !pattern.content_types.contains(&content_type) {
                pattern.content_types.push(content_type);
            }
            let was_actionable = pattern.actionable;
            pattern.actionable = pattern.occurrences >= self.pattern_threshold;
            if pattern.actionable && !was_actionable {
                info!(
                    pattern = %pattern.id,
                    category = pattern.category.as_str(),
                    occurrences = pattern.occurrences,
                    "Issue pattern became actionable"
                );
            }
            return;
        }

        let pattern = IssuePattern {
            id: uuid::Uuid::new_v4().to_string(),
            category: issue.category,
            description,
            occurrences: 1,
            max_severity: issue.severity,
            content_types: vec![content_type],
            actionable: self.pattern_threshold <= 1,
            first_seen: now,
            last_seen: now,
        };
        patterns.put(pattern.id.clone(), pattern);
    }

    pub fn event(&self, id: &str) -> Option<LearningEvent> {
        self.events().peek(id).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.events().len()
    }

    /// All tracked patterns, most frequent first
    pub fn patterns_snapshot(&self) -> Vec<IssuePattern> {
        let mut all: Vec<IssuePattern> = self.patterns().iter().map(|(_, p)| p.clone()).collect();
        all.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        all
    }

    pub fn actionable_patterns(&self) -> Vec<IssuePattern> {
        self.patterns_snapshot()
            .into_iter()
            .filter(|p| p.actionable)
            .collect()
    }

    pub fn insights(&self) -> LearningInsights {
        let events: Vec<LearningEvent> = self.events().iter().map(|(_, e)| e.clone()).collect();

        let mut grouped: HashMap<ContentType, Vec<&LearningEvent>> = HashMap::new();
        for event in &events {
            grouped.entry(event.content_type).or_default().push(event);
        }
        let mut by_content_type: Vec<ContentTypeStats> = grouped
            .into_iter()
            .map(|(content_type, group)| {
                let runs = group.len();
                let n = runs as f64;
                ContentTypeStats {
                    content_type,
                    runs,
                    avg_confidence: group.iter().map(|e| e.confidence).sum::<f64>() / n,
                    avg_impact: group.iter().map(|e| e.impact_score).sum::<f64>() / n,
                    approval_rate: group
                        .iter()
                        .filter(|e| e.status == ValidationStatus::Approved)
                        .count() as f64
                        / n,
                    disagreement_rate: group.iter().filter(|e| e.had_disagreement).count() as f64
                        / n,
                }
            })
            .collect();
        by_content_type.sort_by_key(|s| s.content_type.as_str());

        let confidence_buckets = (0..5u32)
            .map(|b| {
                let lower = b * 20;
                let upper = if b == 4 { 100 } else { lower + 19 };
                let in_bucket: Vec<&LearningEvent> = events
                    .iter()
                    .filter(|e| ((e.confidence / 20.0).floor() as u32).min(4) == b)
                    .collect();
                let runs = in_bucket.len();
                ConfidenceBucket {
                    lower,
                    upper,
                    runs,
                    avg_impact: if runs == 0 {
                        0.0
                    } else {
                        in_bucket.iter().map(|e| e.impact_score).sum::<f64>() / runs as f64
                    },
                }
            })
            .collect();

        LearningInsights {
            total_events: events.len(),
            by_content_type,
            confidence_buckets,
            actionable_patterns: self.actionable_patterns(),
        }
    }
}
