//! Response Validator
//!
//! Two stages. The deterministic rule table for the intent's mode runs
//! first; a response that survives it is judged by the generator in the
//! validation role. Either stage can reject, neither can overrule a
//! rejection from the other.

use crate::error::with_deadline;
use crate::generator::{generate_typed, GenerationContext, Generator, Role};
use crate::models::{
    AgentResponse, IntentResult, RetrievalRecord, ValidationMode, ValidationResult,
};
use crate::retrieval::format_context;
use crate::text::fact_tokens;
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod rules;
pub use rules::{rule_set, Grounding, RuleFindings, RuleSet, ToolPolicy};

/// Generator output for the validation role.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    #[serde(alias = "traceability_check")]
    pub traceability_ok: bool,
    #[serde(alias = "consistency_check")]
    pub consistency_ok: bool,
    #[serde(default, alias = "tool_usage_check")]
    pub tool_usage_ok: Option<bool>,
    #[serde(default)]
    pub feedback: String,
}

pub struct ResponseValidator {
    generator: Arc<dyn Generator>,
    role: Role,
    call_timeout: Duration,
    context_max_tokens: usize,
}

impl ResponseValidator {
    pub fn new(generator: Arc<dyn Generator>, call_timeout: Duration, context_max_tokens: usize) -> Self {
        Self {
            generator,
            role: Role::response_validator(),
            call_timeout,
            context_max_tokens,
        }
    }

    /// Validate a candidate; the mode comes from the intent alone.
    pub async fn validate(
        &self,
        intent: &IntentResult,
        response: &AgentResponse,
        retrieval: &RetrievalRecord,
    ) -> Result<ValidationResult> {
        self.validate_in_mode(ValidationMode::from(intent.intent()), intent, response, retrieval)
            .await
    }

    pub async fn validate_in_mode(
        &self,
        mode: ValidationMode,
        intent: &IntentResult,
        response: &AgentResponse,
        retrieval: &RetrievalRecord,
    ) -> Result<ValidationResult> {
        let rules = rule_set(mode);
        let findings = rules.evaluate(intent, response, retrieval, self.context_max_tokens);

        if !findings.is_clean() {
            let result = ValidationResult::from_checks(
                mode,
                findings.traceability_issues.is_empty(),
                findings.consistency_issues.is_empty(),
                findings.tool_usage_ok,
                &findings.issues(),
            );
            info!(
                mode = %mode,
                traceability_ok = result.traceability_ok(),
                consistency_ok = result.consistency_ok(),
                tool_usage_ok = ?result.tool_usage_ok(),
                "Validation rejected by rule table"
            );
            return Ok(result);
        }

        let context = self.build_context(mode, rules, intent, response, retrieval);
        let verdict: JudgeVerdict = with_deadline(
            "generator.validate",
            self.call_timeout,
            generate_typed(self.generator.as_ref(), &self.role, &context),
        )
        .await?;

        if verdict.tool_usage_ok.is_some() && verdict.tool_usage_ok != findings.tool_usage_ok {
            debug!(
                judge = ?verdict.tool_usage_ok,
                observed = ?findings.tool_usage_ok,
                "Judge tool-usage opinion ignored; retrieval record is authoritative"
            );
        }

        let issues = judge_issues(mode, &verdict, response);
        let result = ValidationResult::from_checks(
            mode,
            verdict.traceability_ok,
            verdict.consistency_ok,
            findings.tool_usage_ok,
            &issues,
        );

        if result.is_valid() {
            info!(mode = %mode, "Validation passed");
        } else {
            warn!(mode = %mode, feedback = %result.feedback(), "Validation rejected by judge");
        }

        Ok(result)
    }

    fn build_context(
        &self,
        mode: ValidationMode,
        rules: &RuleSet,
        intent: &IntentResult,
        response: &AgentResponse,
        retrieval: &RetrievalRecord,
    ) -> GenerationContext {
        let sources = if retrieval.was_invoked() {
            format_context(retrieval.snippets(), self.context_max_tokens)
        } else {
            "The retriever was not invoked.".to_string()
        };

        GenerationContext::new()
            .with("mode", mode.as_str())
            .with("rules", rules.summary)
            .with("query", intent.query.as_str())
            .with("voice_text", response.voice_text.as_str())
            .with("display_text", response.display_text.as_str())
            .with("show_in_ui", response.show_in_ui)
            .with("follow_ups", response.follow_ups.clone())
            .with("retrieval_invoked", retrieval.was_invoked())
            .with("sources", sources)
    }
}

/// Feedback for a judge rejection. The judge's own words are used when it
/// gave any; otherwise the failed check is tied to the concrete text under
/// suspicion so the next attempt still has something to act on.
fn judge_issues(mode: ValidationMode, verdict: &JudgeVerdict, response: &AgentResponse) -> Vec<String> {
    if verdict.traceability_ok && verdict.consistency_ok {
        return Vec::new();
    }

    if !verdict.feedback.trim().is_empty() {
        return vec![verdict.feedback.trim().to_string()];
    }

    let mut issues = Vec::new();
    if !verdict.traceability_ok {
        let facts = fact_tokens(&response.voice_text)
            .into_iter()
            .chain(fact_tokens(&response.display_text))
            .map(|f| format!("'{}'", f))
            .collect::<Vec<_>>();
        if facts.is_empty() {
            issues.push(format!(
                "In {} mode the claim '{}' could not be traced to the sources; restate it using only source wording or say the information is unavailable.",
                mode, response.voice_text
            ));
        } else {
            issues.push(format!(
                "In {} mode these figures could not be traced to the sources: {}.",
                mode,
                facts.join(", ")
            ));
        }
    }
    if !verdict.consistency_ok {
        issues.push(format!(
            "voice_text '{}' and display_text do not agree; display_text must elaborate the same topic and facts.",
            response.voice_text
        ));
    }
    issues
}
