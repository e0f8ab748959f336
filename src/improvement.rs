//! Bounded revise-and-revalidate loop over content nodes
//!
//! Generated content is split into nodes (one per top-level key of a
//! structured response). Nodes under the confidence threshold that carry
//! reviewer feedback are regenerated and re-validated until the weighted
//! overall confidence reaches the threshold, nothing actionable remains, or
//! the iteration cap is hit.

use std::collections::HashMap;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clients::TokenUsage;
use crate::generator::{GeneratedContent, GenerationRequest, GeneratorService};
use crate::utils::{extract_json, weighted_average};
use crate::validator::{
    ValidationRequest, ValidationResponse, ValidationStatus, ValidatorService,
};

pub const BODY_NODE: &str = "body";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: String,
    pub node_type: String,
    pub content: Value,
    /// Latest validator confidence, 0-100
    pub confidence: f64,
    pub status: Option<ValidationStatus>,
    pub feedback: Vec<String>,
    /// Number of times this node has been regenerated
    pub revisions: u32,
}

impl ContentNode {
    pub fn new(node_type: impl Into<String>, content: Value) -> Self {
        let node_type = node_type.into();
        Self {
            id: node_type.clone(),
            node_type,
            content,
            confidence: 0.0,
            status: None,
            feedback: Vec::new(),
            revisions: 0,
        }
    }

    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }

    pub fn apply_validation(&mut self, validation: &ValidationResponse) {
        self.confidence = validation.confidence;
        self.status = Some(validation.status);
        self.feedback = validation.feedback();
    }

    pub fn validation_request(&self, request: &GenerationRequest) -> ValidationRequest {
        ValidationRequest {
            content: self.content_text(),
            content_type: request.content_type,
            context: request.context.clone(),
            node_id: Some(self.id.clone()),
        }
    }
}

/// Split content into independently validated nodes
pub fn split_nodes(content: &GeneratedContent) -> Vec<ContentNode> {
    match content {
        GeneratedContent::Structured(Value::Object(map)) if !map.is_empty() => map
            .iter()
            .map(|(key, value)| ContentNode::new(key.clone(), value.clone()))
            .collect(),
        other => vec![ContentNode::new(BODY_NODE, other.to_value())],
    }
}

/// Rebuild content from nodes, keeping the shape of `original`
pub fn reassemble(nodes: &[ContentNode], original: &GeneratedContent) -> GeneratedContent {
    match original {
        GeneratedContent::Structured(Value::Object(map)) if !map.is_empty() => {
            let mut out = Map::new();
            for node in nodes {
                out.insert(node.node_type.clone(), node.content.clone());
            }
            GeneratedContent::Structured(Value::Object(out))
        }
        GeneratedContent::Text(_) => match nodes.first().map(|n| &n.content) {
            Some(Value::String(s)) => GeneratedContent::Text(s.clone()),
            Some(other) => GeneratedContent::Structured(other.clone()),
            None => original.clone(),
        },
        GeneratedContent::Structured(_) => nodes
            .first()
            .map(|n| GeneratedContent::Structured(n.content.clone()))
            .unwrap_or_else(|| original.clone()),
    }
}

/// Interpret a revision reply for a node that previously held `previous`
///
/// String nodes keep the reply verbatim. Other nodes take any JSON value the
/// reply parses to, then an embedded object or array, then the raw text.
pub fn parse_revision(raw: &str, previous: &Value) -> Value {
    let raw = raw.trim();
    if previous.is_string() {
        return Value::String(raw.to_string());
    }
    serde_json::from_str::<Value>(raw)
        .ok()
        .or_else(|| extract_json(raw))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

pub fn node_weight(weights: &HashMap<String, f64>, node_type: &str) -> f64 {
    weights.get(node_type).copied().unwrap_or(1.0)
}

/// Weighted mean of node confidences (0-100); unlisted node types weigh 1.0
pub fn overall_confidence(nodes: &[ContentNode], weights: &HashMap<String, f64>) -> f64 {
    weighted_average(
        nodes
            .iter()
            .map(|n| (n.confidence, node_weight(weights, &n.node_type))),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ThresholdReached,
    NoActionableFeedback,
    MaxIterations,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub confidence_before: f64,
    pub confidence_after: f64,
    pub revised_nodes: Vec<String>,
    pub failed_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementSummary {
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub initial_confidence: f64,
    pub final_confidence: f64,
    pub history: Vec<IterationRecord>,
}

#[derive(Debug, Clone)]
pub struct ImprovementOutcome {
    pub nodes: Vec<ContentNode>,
    /// Latest verdict per node, parallel to `nodes`
    pub validations: Vec<ValidationResponse>,
    pub summary: ImprovementSummary,
    pub usage: TokenUsage,
}

enum NodeRevision {
    Revised {
        content: Value,
        validation: ValidationResponse,
        usage: TokenUsage,
    },
    Failed(String),
}

pub struct ImprovementLoop<'a> {
    generator: &'a GeneratorService,
    validator: &'a ValidatorService,
    threshold: f64,
    max_iterations: u32,
    weights: &'a HashMap<String, f64>,
}

impl<'a> ImprovementLoop<'a> {
    pub fn new(
        generator: &'a GeneratorService,
        validator: &'a ValidatorService,
        threshold: f64,
        max_iterations: u32,
        weights: &'a HashMap<String, f64>,
    ) -> Self {
        Self {
            generator,
            validator,
            threshold,
            max_iterations,
            weights,
        }
    }

    /// Run the loop; `validations` must be parallel to `nodes`
    pub async fn run(
        &self,
        request: &GenerationRequest,
        mut nodes: Vec<ContentNode>,
        mut validations: Vec<ValidationResponse>,
    ) -> ImprovementOutcome {
        let initial_confidence = overall_confidence(&nodes, self.weights);
        let mut history = Vec::new();
        let mut usage = TokenUsage::default();
        let mut iteration: u32 = 0;

        let stop_reason = loop {
            let before = overall_confidence(&nodes, self.weights);
            if before >= self.threshold {
                break StopReason::ThresholdReached;
            }
            if iteration >= self.max_iterations {
                break StopReason::MaxIterations;
            }
            let targets: Vec<usize> = nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.confidence < self.threshold && !n.feedback.is_empty())
                .map(|(i, _)| i)
                .collect();
            if targets.is_empty() {
                break StopReason::NoActionableFeedback;
            }

            iteration += 1;
            debug!(
                iteration,
                targets = targets.len(),
                confidence = before,
                "Improvement iteration"
            );

            let revisions =
                join_all(targets.iter().map(|&i| self.revise_node(request, &nodes[i]))).await;

            let mut revised_nodes = Vec::new();
            let mut failed_nodes = Vec::new();
            for (&index, revision) in targets.iter().zip(revisions) {
                let node = &mut nodes[index];
                match revision {
                    NodeRevision::Revised {
                        content,
                        validation,
                        usage: node_usage,
                    } => {
                        node.content = content;
                        node.revisions += 1;
                        node.apply_validation(&validation);
                        usage.add(&node_usage);
                        validations[index] = validation;
                        revised_nodes.push(node.id.clone());
                    }
                    NodeRevision::Failed(reason) => {
                        warn!(
                            node = %node.id,
                            iteration,
                            reason = %reason,
                            "Node revision failed, keeping previous content"
                        );
                        failed_nodes.push(node.id.clone());
                    }
                }
            }

            history.push(IterationRecord {
                iteration,
                confidence_before: before,
                confidence_after: overall_confidence(&nodes, self.weights),
                revised_nodes,
                failed_nodes,
            });
        };

        let final_confidence = overall_confidence(&nodes, self.weights);
        info!(
            iterations = iteration,
            stop_reason = ?stop_reason,
            initial_confidence,
            final_confidence,
            "Improvement loop finished"
        );

        ImprovementOutcome {
            nodes,
            validations,
            summary: ImprovementSummary {
                iterations: iteration,
                stop_reason,
                initial_confidence,
                final_confidence,
                history,
            },
            usage,
        }
    }

    async fn revise_node(&self, request: &GenerationRequest, node: &ContentNode) -> NodeRevision {
        let mut revision = request.clone();
        revision.options.feedback = node.feedback.clone();
        revision.options.previous_content = Some(node.content_text());
        revision.options.node_type = Some(node.node_type.clone());

        let generated = match self.generator.generate(&revision).await {
            Ok(g) => g,
            Err(e) => return NodeRevision::Failed(e.to_string()),
        };

        let mut revised = node.clone();
        revised.content = parse_revision(&generated.raw_text, &node.content);
        let validation = self
            .validator
            .validate(&revised.validation_request(request))
            .await;

        let mut usage = generated.usage;
        usage.add(&validation.usage);
        NodeRevision::Revised {
            content: revised.content,
            validation,
            usage,
        }
    }
}
