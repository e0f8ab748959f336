//! Versioned prompt registry for the generate/validate/revise roles
//!
//! Every template carries a stable id, a version and a SHA-1 checksum of its
//! text so workflow results can be traced back to the exact prompt used.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::generator::ContentType;

pub const VALIDATION_PROMPT_ID: &str = "validate-content-v1";
pub const REVISION_PROMPT_ID: &str = "revise-content-v1";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").expect("placeholder regex"));

/// Represents a prompt's evolution history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptLineage {
    /// Parent prompt ID if this is a refinement
    pub parent_id: Option<String>,
    /// SHA-1 checksum of the template text
    pub checksum: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub change_rationale: Option<String>,
}

/// Core prompt definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Stable identifier (format: role-name-vN)
    pub id: String,
    pub one_liner: String,
    /// Input variables with descriptions
    pub inputs: HashMap<String, String>,
    pub version: String,
    pub lineage: PromptLineage,
    /// Shared system instruction sent alongside the template
    pub system: String,
    pub template: String,
}

impl PromptTemplate {
    pub fn new(
        id: impl Into<String>,
        one_liner: impl Into<String>,
        system: impl Into<String>,
        template: impl Into<String>,
        inputs: HashMap<String, String>,
        parent_id: Option<String>,
        change_rationale: Option<String>,
    ) -> Self {
        let template = template.into();
        let checksum = sha1_checksum(&template);

        Self {
            id: id.into(),
            one_liner: one_liner.into(),
            inputs,
            version: "1.0.0".to_string(),
            lineage: PromptLineage {
                parent_id,
                checksum,
                created_at: chrono::Utc::now(),
                change_rationale,
            },
            system: system.into(),
            template,
        }
    }

    /// Substitute `{{var}}` placeholders; unknown placeholders render empty
    pub fn render(&self, vars: &HashMap<&str, String>) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &regex::Captures<'_>| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }
}

fn sha1_checksum(content: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Registry of all known prompts with their metadata
#[derive(Debug, Default)]
pub struct PromptRegistry {
    prompts: HashMap<String, Arc<PromptTemplate>>,
}

impl PromptRegistry {
    /// Create new registry with core prompts
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_core_prompts();
        registry
    }

    pub fn register(&mut self, prompt: PromptTemplate) {
        self.prompts.insert(prompt.id.clone(), Arc::new(prompt));
    }

    pub fn get(&self, id: &str) -> Option<Arc<PromptTemplate>> {
        self.prompts.get(id).cloned()
    }

    /// All prompts sorted by id
    pub fn list(&self) -> Vec<Arc<PromptTemplate>> {
        let mut all: Vec<_> = self.prompts.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn register_core_prompts(&mut self) {
        let generation_inputs: HashMap<String, String> = [
            ("context".into(), "Request context as pretty JSON".into()),
            ("expected_keys".into(), "Comma separated top-level keys".into()),
            ("modifiers".into(), "Context-conditional instructions".into()),
        ]
        .into();

        for content_type in ContentType::ALL {
            let (one_liner, task) = match content_type {
                ContentType::Assessment => (
                    "Structured assessment of a subject against the provided evidence",
                    "Write an assessment of the subject described in the context. Score it from 0 to 100 and justify the score with concrete strengths and gaps.",
                ),
                ContentType::Report => (
                    "Analytical report over the supplied data",
                    "Write a concise analytical report. Every finding must be traceable to the supplied data; do not invent figures.",
                ),
                ContentType::Coaching => (
                    "Actionable coaching plan for an individual",
                    "Write a coaching plan with measurable goals, specific actions and a realistic timeline for the person described.",
                ),
                ContentType::Insight => (
                    "Single decision-ready insight",
                    "Derive the single most decision-relevant insight from the context, with supporting evidence and next actions.",
                ),
            };
            let template = format!(
                "{task}\n\nContext:\n{{{{context}}}}\n\n{{{{modifiers}}}}Respond with a single JSON object containing exactly these keys: {{{{expected_keys}}}}.\nDo not wrap the JSON in prose."
            );
            self.register(PromptTemplate::new(
                content_type.prompt_id(),
                one_liner,
                "You are a careful domain expert producing structured, factual content for professional review.",
                template,
                generation_inputs.clone(),
                None,
                None,
            ));
        }

        self.register(PromptTemplate::new(
            VALIDATION_PROMPT_ID,
            "Independent quality review of generated content",
            "You are an independent reviewer. You score content strictly and never rewrite it.",
            "Review the following {{content_type}} content.\n\nContext it was generated from:\n{{context}}\n\nContent:\n{{content}}\n\nScore each dimension from 0 to 100: accuracy, bias (100 = free of bias), clarity, consistency, compliance.\nContent scoring below {{threshold}} overall needs revision.\n\nRespond with JSON only, using this schema:\n{\"confidence\": number, \"status\": \"approved\" | \"needs_revision\" | \"rejected\", \"validationDetails\": {\"accuracy\": number, \"bias\": number, \"clarity\": number, \"consistency\": number, \"compliance\": number}, \"issues\": [{\"severity\": \"low\" | \"medium\" | \"high\" | \"critical\", \"category\": \"accuracy\" | \"bias\" | \"clarity\" | \"consistency\" | \"compliance\" | \"other\", \"description\": string, \"suggestion\": string, \"location\": string}], \"suggestions\": [string]}",
            [
                ("content_type".into(), "Content type label".into()),
                ("context".into(), "Request context as pretty JSON".into()),
                ("content".into(), "Content under review".into()),
                ("threshold".into(), "Approval threshold percentage".into()),
            ]
            .into(),
            None,
            None,
        ));

        self.register(PromptTemplate::new(
            REVISION_PROMPT_ID,
            "Targeted revision from reviewer feedback",
            "You are a careful domain expert revising your own draft. Address every point of feedback and change nothing else.",
            "Revise this {{content_type}} {{node_type}} section.\n\nContext:\n{{context}}\n\nCurrent draft:\n{{previous_content}}\n\nReviewer feedback to address:\n{{feedback}}\n\n{{modifiers}}Return only the revised section in the same format as the draft.",
            [
                ("content_type".into(), "Content type label".into()),
                ("node_type".into(), "Section being revised".into()),
                ("context".into(), "Request context as pretty JSON".into()),
                ("previous_content".into(), "Draft to revise".into()),
                ("feedback".into(), "Bullet list of reviewer feedback".into()),
            ]
            .into(),
            None,
            Some("Revision narrowed to a single section".into()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_core_prompts() {
        let registry = PromptRegistry::new();
        for ct in ContentType::ALL {
            assert!(registry.get(ct.prompt_id()).is_some(), "missing {}", ct);
        }
        assert!(registry.get(VALIDATION_PROMPT_ID).is_some());
        assert!(registry.get(REVISION_PROMPT_ID).is_some());
        assert_eq!(registry.list().len(), ContentType::ALL.len() + 2);
    }

    #[test]
    fn checksum_tracks_template_text() {
        let a = PromptTemplate::new("a", "", "", "hello {{x}}", HashMap::new(), None, None);
        let b = PromptTemplate::new("b", "", "", "hello {{x}}", HashMap::new(), None, None);
        let c = PromptTemplate::new("c", "", "", "hello {{y}}", HashMap::new(), None, None);
        assert_eq!(a.lineage.checksum, b.lineage.checksum);
        assert_ne!(a.lineage.checksum, c.lineage.checksum);
        assert_eq!(a.lineage.checksum.len(), 40);
    }

    #[test]
    fn render_fills_and_blanks_placeholders() {
        let p = PromptTemplate::new(
            "t",
            "",
            "",
            "A={{a}} B={{ b }} C={{c}}",
            HashMap::new(),
            None,
            None,
        );
        let vars: HashMap<&str, String> = [("a", "1".to_string()), ("b", "2".to_string())].into();
        assert_eq!(p.render(&vars), "A=1 B=2 C=");
    }

    #[test]
    fn generation_template_keeps_placeholders() {
        let registry = PromptRegistry::new();
        let p = registry.get(ContentType::Report.prompt_id()).unwrap();
        assert!(p.template.contains("{{context}}"));
        assert!(p.template.contains("{{expected_keys}}"));
    }
}
