//! Termination behaviour of the improvement loop

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{ScriptedProvider, verdict_json};
use dual_ai::config::{GeneratorConfig, ValidatorConfig};
use dual_ai::generator::{ContentType, GeneratedContent, GenerationRequest, GeneratorService};
use dual_ai::improvement::{ImprovementLoop, StopReason, split_nodes};
use dual_ai::prompts::PromptRegistry;
use dual_ai::validator::ValidatorService;
use serde_json::json;

struct Harness {
    generator: GeneratorService,
    validator: ValidatorService,
    generator_calls: Arc<ScriptedProvider>,
    validator_calls: Arc<ScriptedProvider>,
}

fn harness(generator: ScriptedProvider, validator: ScriptedProvider) -> Harness {
    let prompts = Arc::new(PromptRegistry::new());
    let generator = generator.shared();
    let validator = validator.shared();
    Harness {
        generator: GeneratorService::new(
            generator.clone(),
            None,
            prompts.clone(),
            GeneratorConfig::default(),
            5,
        ),
        validator: ValidatorService::new(
            validator.clone(),
            prompts,
            ValidatorConfig::default(),
            85.0,
        ),
        generator_calls: generator,
        validator_calls: validator,
    }
}

async fn run_loop(
    h: &Harness,
    content: GeneratedContent,
    max_iterations: u32,
) -> dual_ai::improvement::ImprovementOutcome {
    let request = GenerationRequest::new(ContentType::Coaching, json!({"person": "sam"}));
    let mut nodes = split_nodes(&content);
    let requests: Vec<_> = nodes.iter().map(|n| n.validation_request(&request)).collect();
    let validations = h.validator.validate_many(&requests).await;
    for (node, v) in nodes.iter_mut().zip(&validations) {
        node.apply_validation(v);
    }
    let weights = HashMap::new();
    ImprovementLoop::new(&h.generator, &h.validator, 85.0, max_iterations, &weights)
        .run(&request, nodes, validations)
        .await
}

#[tokio::test]
async fn stops_at_max_iterations_without_improvement() {
    let h = harness(
        ScriptedProvider::fixed("gen", "same draft again"),
        ScriptedProvider::fixed(
            "val",
            &verdict_json(60.0, "needs_revision", &["Goals are vague"]),
        ),
    );
    let outcome = run_loop(&h, GeneratedContent::Text("first draft".into()), 3).await;

    assert_eq!(outcome.summary.stop_reason, StopReason::MaxIterations);
    assert_eq!(outcome.summary.iterations, 3);
    assert_eq!(outcome.summary.history.len(), 3);
    assert_eq!(outcome.summary.final_confidence, 60.0);
    assert_eq!(h.generator_calls.calls(), 3);
    assert_eq!(h.validator_calls.calls(), 4);
    assert_eq!(outcome.nodes[0].revisions, 3);
    assert_eq!(outcome.nodes[0].content, json!("same draft again"));
    assert!(
        h.generator_calls
            .prompts()
            .iter()
            .all(|p| p.contains("Goals are vague"))
    );
}

#[tokio::test]
async fn stops_once_threshold_is_reached() {
    let seen = AtomicUsize::new(0);
    let validator = ScriptedProvider::new("val", move |_| {
        let reply = if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            verdict_json(55.0, "needs_revision", &["Timeline missing"])
        } else {
            verdict_json(93.0, "approved", &[])
        };
        Ok(reply)
    });
    let h = harness(ScriptedProvider::fixed("gen", "improved draft"), validator);
    let outcome = run_loop(&h, GeneratedContent::Text("draft".into()), 3).await;

    assert_eq!(outcome.summary.stop_reason, StopReason::ThresholdReached);
    assert_eq!(outcome.summary.iterations, 1);
    assert_eq!(outcome.summary.initial_confidence, 55.0);
    assert_eq!(outcome.summary.final_confidence, 93.0);
    assert_eq!(outcome.nodes[0].content, json!("improved draft"));
    assert_eq!(outcome.validations[0].confidence, 93.0);
}

#[tokio::test]
async fn nothing_actionable_means_no_iterations() {
    let h = harness(
        ScriptedProvider::fixed("gen", "unused"),
        ScriptedProvider::fixed("val", &verdict_json(50.0, "rejected", &[])),
    );
    let outcome = run_loop(&h, GeneratedContent::Text("draft".into()), 3).await;

    assert_eq!(outcome.summary.stop_reason, StopReason::NoActionableFeedback);
    assert_eq!(outcome.summary.iterations, 0);
    assert_eq!(h.generator_calls.calls(), 0);
}

#[tokio::test]
async fn fallback_verdicts_are_not_actionable() {
    let h = harness(
        ScriptedProvider::fixed("gen", "unused"),
        ScriptedProvider::failing("val"),
    );
    let outcome = run_loop(&h, GeneratedContent::Text("draft".into()), 3).await;
    assert_eq!(outcome.summary.stop_reason, StopReason::NoActionableFeedback);
    assert_eq!(h.generator_calls.calls(), 0);
}

#[tokio::test]
async fn failed_revision_keeps_previous_content() {
    let h = harness(
        ScriptedProvider::failing("gen"),
        ScriptedProvider::fixed(
            "val",
            &verdict_json(60.0, "needs_revision", &["Actions lack owners"]),
        ),
    );
    let content = GeneratedContent::Structured(json!({"summary": "s", "actions": ["a"]}));
    let outcome = run_loop(&h, content, 2).await;

    assert_eq!(outcome.summary.stop_reason, StopReason::MaxIterations);
    assert_eq!(outcome.summary.iterations, 2);
    assert!(outcome.nodes.iter().all(|n| n.revisions == 0));
    assert_eq!(outcome.summary.history[0].failed_nodes.len(), 2);
    let summary = outcome
        .nodes
        .iter()
        .find(|n| n.node_type == "summary")
        .unwrap();
    assert_eq!(summary.content, json!("s"));
}

#[tokio::test]
async fn numeric_section_stays_numeric_after_revision() {
    let seen = AtomicUsize::new(0);
    let validator = ScriptedProvider::new("val", move |_| {
        let reply = if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            verdict_json(60.0, "needs_revision", &["Score is not justified"])
        } else {
            verdict_json(95.0, "approved", &[])
        };
        Ok(reply)
    });
    let h = harness(ScriptedProvider::fixed("gen", "75"), validator);
    let content = GeneratedContent::Structured(json!({"summary": "s", "score": 70}));
    let outcome = run_loop(&h, content.clone(), 3).await;

    assert_eq!(outcome.summary.stop_reason, StopReason::ThresholdReached);
    let rebuilt = dual_ai::improvement::reassemble(&outcome.nodes, &content);
    assert_eq!(
        rebuilt,
        GeneratedContent::Structured(json!({"summary": "75", "score": 75}))
    );
}
