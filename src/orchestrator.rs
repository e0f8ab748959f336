//! End-to-end generate, validate, disagree, improve, learn workflow

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::{WorkflowCache, cache_key};
use crate::clients::{ChatProvider, TokenUsage, create_provider};
use crate::config::{Config, WorkflowConfig};
use crate::disagreement::{self, Disagreement, DisagreementResolver, ResolutionStrategy};
use crate::error::{DualAiError, Result};
use crate::generator::{
    ContentType, GeneratedContent, GenerationRequest, GenerationResponse, GeneratorService,
};
use crate::improvement::{
    ContentNode, ImprovementLoop, ImprovementSummary, node_weight, reassemble, split_nodes,
};
use crate::learning::{LearningInsights, LearningRecorder};
use crate::prompts::PromptRegistry;
use crate::store::{RunStatus, SqliteWorkflowStore, WorkflowRun, WorkflowStore};
use crate::validator::{ValidationResponse, ValidationStatus, ValidatorService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Approved,
    NeedsRevision,
    Rejected,
    /// Not approved and the disagreement was routed to a human
    Escalated,
}

impl WorkflowStatus {
    fn from_outcome(status: ValidationStatus, disagreement: Option<&Disagreement>) -> Self {
        let escalated = disagreement
            .and_then(|d| d.resolution.as_ref())
            .is_some_and(|r| r.strategy == ResolutionStrategy::Escalate);
        match status {
            ValidationStatus::Approved => Self::Approved,
            _ if escalated => Self::Escalated,
            ValidationStatus::NeedsRevision => Self::NeedsRevision,
            ValidationStatus::Rejected => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub trace_id: String,
    pub request_id: String,
    pub content_type: ContentType,
    /// Final content after any improvement
    pub content: GeneratedContent,
    /// First generation, before improvement
    pub generation: GenerationResponse,
    /// Final aggregated verdict
    pub validation: ValidationResponse,
    pub disagreement: Option<Disagreement>,
    pub improvement: Option<ImprovementSummary>,
    pub status: WorkflowStatus,
    /// 0-100
    pub final_confidence: f64,
    pub iterations: u32,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub cached: bool,
    pub learning_event_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

pub struct DualAiService {
    generator: GeneratorService,
    validator: ValidatorService,
    resolver: DisagreementResolver,
    learning: LearningRecorder,
    cache: Option<WorkflowCache>,
    store: Option<Arc<dyn WorkflowStore>>,
    prompts: Arc<PromptRegistry>,
    workflow: WorkflowConfig,
}

impl DualAiService {
    /// Build providers and the bookkeeping store from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let runtime = &config.runtime;
        let primary = create_provider(
            config.generator.primary_provider,
            &config.generator.primary_model,
            runtime,
        )?;
        let fallback = match config.generator.fallback_provider {
            Some(kind) => match create_provider(kind, &config.generator.fallback_model, runtime) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(
                        provider = %kind,
                        error = %e,
                        "Fallback generator unavailable, continuing without it"
                    );
                    None
                }
            },
            None => None,
        };
        let validator =
            create_provider(config.validator.provider, &config.validator.model, runtime)?;

        let store: Option<Arc<dyn WorkflowStore>> = match &config.store.sqlite_path {
            Some(path) => {
                info!(path = %path, "Opening workflow store");
                Some(Arc::new(SqliteWorkflowStore::open(path)?))
            }
            None => None,
        };

        Ok(Self::with_components(config, primary, fallback, validator, store))
    }

    /// Assemble the service from already-built providers
    pub fn with_components(
        config: Config,
        primary: Arc<dyn ChatProvider>,
        fallback: Option<Arc<dyn ChatProvider>>,
        validator: Arc<dyn ChatProvider>,
        store: Option<Arc<dyn WorkflowStore>>,
    ) -> Self {
        let prompts = Arc::new(PromptRegistry::new());
        let workflow = config.workflow;
        let generator = GeneratorService::new(
            primary,
            fallback,
            prompts.clone(),
            config.generator,
            workflow.batch_size,
        );
        let validator = ValidatorService::new(
            validator,
            prompts.clone(),
            config.validator,
            workflow.confidence_threshold,
        );
        let cache = config
            .cache
            .enabled
            .then(|| WorkflowCache::new(&config.cache));

        Self {
            generator,
            validator,
            resolver: DisagreementResolver::new(workflow.escalation_divergence),
            learning: LearningRecorder::new(&config.learning),
            cache,
            store,
            prompts,
            workflow,
        }
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn learning(&self) -> &LearningRecorder {
        &self.learning
    }

    pub fn insights(&self) -> LearningInsights {
        self.learning.insights()
    }

    pub fn store(&self) -> Option<&Arc<dyn WorkflowStore>> {
        self.store.as_ref()
    }

    fn with_store(&self, operation: &str, f: impl FnOnce(&dyn WorkflowStore) -> Result<()>) {
        if let Some(store) = &self.store
            && let Err(e) = f(store.as_ref())
        {
            warn!(operation, error = %e, "Workflow store write failed");
        }
    }

    fn aggregate(
        &self,
        validations: &[ValidationResponse],
        nodes: &[ContentNode],
    ) -> Option<ValidationResponse> {
        let weights = &self.workflow.node_weights;
        let parts: Vec<(ValidationResponse, f64)> = validations
            .iter()
            .zip(nodes)
            .map(|(v, n)| (v.clone(), node_weight(weights, &n.node_type)))
            .collect();
        ValidationResponse::aggregate(&parts)
    }

    pub async fn execute(&self, request: GenerationRequest) -> Result<WorkflowResult> {
        let started = Instant::now();
        let trace_id = uuid::Uuid::new_v4().to_string();
        let request_id = request
            .options
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let key = cache_key(&request);
        if !request.options.skip_cache
            && let Some(cache) = &self.cache
            && let Some(mut hit) = cache.get(&key)
        {
            info!(
                trace_id = %trace_id,
                request_id = %request_id,
                workflow_id = %hit.workflow_id,
                "Serving workflow from cache"
            );
            hit.cached = true;
            hit.trace_id = trace_id;
            hit.request_id = request_id;
            hit.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(hit);
        }

        let workflow_id = uuid::Uuid::new_v4().to_string();
        info!(
            trace_id = %trace_id,
            request_id = %request_id,
            workflow_id = %workflow_id,
            content_type = %request.content_type,
            "Workflow started"
        );
        self.with_store("record_started", |s| {
            s.record_started(&WorkflowRun::started(
                &workflow_id,
                &request_id,
                request.content_type.as_str(),
            ))
        });

        let generation = match self.generator.generate(&request).await {
            Ok(g) => g,
            Err(e) => {
                error!(
                    trace_id = %trace_id,
                    request_id = %request_id,
                    error = %e,
                    "Generation failed"
                );
                self.with_store("record_failed", |s| s.record_failed(&workflow_id, &e.to_string()));
                return Err(DualAiError::workflow(e, trace_id, request_id));
            }
        };
        let mut usage = generation.usage;

        let mut nodes = split_nodes(&generation.content);
        let requests: Vec<_> = nodes.iter().map(|n| n.validation_request(&request)).collect();
        let validations = self.validator.validate_many(&requests).await;
        for (node, validation) in nodes.iter_mut().zip(&validations) {
            node.apply_validation(validation);
            usage.add(&validation.usage);
        }
        let Some(initial) = self.aggregate(&validations, &nodes) else {
            let e = DualAiError::Internal {
                message: "no content nodes to validate".into(),
            };
            self.with_store("record_failed", |s| s.record_failed(&workflow_id, &e.to_string()));
            return Err(DualAiError::workflow(e, trace_id, request_id));
        };
        debug!(
            trace_id = %trace_id,
            nodes = nodes.len(),
            confidence = initial.confidence,
            status = %initial.status,
            "Initial validation aggregated"
        );

        let mut disagreement = disagreement::detect(&generation, &initial);
        if let Some(d) = disagreement.as_mut() {
            self.resolver.resolve(d);
        }

        let (content, validation, improvement) = if self.workflow.improvement_enabled
            && initial.confidence < self.workflow.confidence_threshold
        {
            let outcome = ImprovementLoop::new(
                &self.generator,
                &self.validator,
                self.workflow.confidence_threshold,
                self.workflow.max_iterations,
                &self.workflow.node_weights,
            )
            .run(&request, nodes, validations)
            .await;
            usage.add(&outcome.usage);
            let content = reassemble(&outcome.nodes, &generation.content);
            let validation = self
                .aggregate(&outcome.validations, &outcome.nodes)
                .unwrap_or(initial);
            (content, validation, Some(outcome.summary))
        } else {
            (generation.content.clone(), initial, None)
        };

        let status = WorkflowStatus::from_outcome(validation.status, disagreement.as_ref());
        let iterations = improvement.as_ref().map_or(0, |s| s.iterations);
        let event = self.learning.record(
            &workflow_id,
            request.content_type,
            &request.context,
            &content.to_value(),
            &validation,
            disagreement.is_some(),
        );
        self.with_store("record_completed", |s| {
            s.record_completed(
                &workflow_id,
                RunStatus::from(validation.status),
                validation.confidence,
                iterations,
            )
        });

        let result = WorkflowResult {
            workflow_id,
            trace_id,
            request_id,
            content_type: request.content_type,
            content,
            final_confidence: validation.confidence,
            generation,
            validation,
            disagreement,
            improvement,
            status,
            iterations,
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
            cached: false,
            learning_event_id: Some(event.id),
            completed_at: Utc::now(),
        };
        info!(
            trace_id = %result.trace_id,
            request_id = %result.request_id,
            status = ?result.status,
            confidence = result.final_confidence,
            iterations = result.iterations,
            duration_ms = result.duration_ms,
            "Workflow completed"
        );

        if let Some(cache) = &self.cache {
            cache.put(key, result.clone());
        }
        Ok(result)
    }

    /// Run workflows in chunks of `batch_size`; results keep request order
    pub async fn execute_batch(
        &self,
        requests: Vec<GenerationRequest>,
    ) -> Vec<Result<WorkflowResult>> {
        let batch_size = self.workflow.batch_size.max(1);
        let mut results = Vec::with_capacity(requests.len());
        for (index, chunk) in requests.chunks(batch_size).enumerate() {
            debug!(batch = index, size = chunk.len(), "Executing workflow batch");
            results.extend(join_all(chunk.iter().cloned().map(|r| self.execute(r))).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disagreement::detect_scores;

    #[test]
    fn escalation_only_applies_to_unapproved_outcomes() {
        let mut verdict = ValidationResponse::fallback(None, "p", "m");
        verdict.fallback = false;
        verdict.confidence = 30.0;
        verdict.status = ValidationStatus::Rejected;
        let mut d = detect_scores(0.9, &verdict).unwrap();
        DisagreementResolver::new(0.3).resolve(&mut d);

        assert_eq!(
            WorkflowStatus::from_outcome(ValidationStatus::Rejected, Some(&d)),
            WorkflowStatus::Escalated
        );
        assert_eq!(
            WorkflowStatus::from_outcome(ValidationStatus::Approved, Some(&d)),
            WorkflowStatus::Approved
        );
        assert_eq!(
            WorkflowStatus::from_outcome(ValidationStatus::NeedsRevision, None),
            WorkflowStatus::NeedsRevision
        );
    }
}
