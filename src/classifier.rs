//! Intent Classifier
//!
//! Safety gate in front of the generation loop. Classifies a message as:
//! - greet: greeting only
//! - investment_related_question: research / strategy content
//! - general_question: questions about the assistant itself
//! - out_of_scope: everything else, blocked (`allowed = false`)

use crate::error::{with_deadline, AgentError};
use crate::generator::{generate_typed, GenerationContext, Generator, Role};
use crate::models::{IntentCategory, IntentResult};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the generator is asked to return. `allowed` and `query` are read
/// only to detect disagreement; the result derives both itself.
#[derive(Debug, Deserialize)]
struct RawIntent {
    #[serde(default)]
    query: Option<String>,
    intent: IntentCategory,
    #[serde(default)]
    reasoning: String,
    #[serde(alias = "confidence_float")]
    confidence: f32,
    #[serde(default)]
    allowed: Option<bool>,
}

pub struct IntentClassifier {
    generator: Arc<dyn Generator>,
    role: Role,
    call_timeout: Duration,
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn Generator>, call_timeout: Duration) -> Self {
        Self {
            generator,
            role: Role::intent_classifier(),
            call_timeout,
        }
    }

    /// Classify one user message.
    pub async fn classify(&self, query: &str) -> Result<IntentResult> {
        if query.trim().is_empty() {
            return Err(AgentError::GenerationError(
                "cannot classify an empty message".to_string(),
            ));
        }

        let context = GenerationContext::new().with("message", query);

        let raw: RawIntent = with_deadline(
            "generator.classify",
            self.call_timeout,
            generate_typed(self.generator.as_ref(), &self.role, &context),
        )
        .await?;

        if let Some(allowed) = raw.allowed {
            if allowed != raw.intent.is_allowed() {
                warn!(
                    intent = %raw.intent,
                    reported_allowed = allowed,
                    "Generator reported an allowed flag inconsistent with intent; overriding"
                );
            }
        }

        if let Some(echoed) = raw.query.as_deref() {
            if echoed.trim() != query.trim() {
                warn!("Generator rewrote the query; keeping the original message");
            }
        }

        let result = IntentResult::new(query, raw.intent, raw.reasoning, raw.confidence);

        if result.needs_review() {
            warn!(
                intent = %result.intent(),
                confidence = result.confidence(),
                "Low-confidence intent classification flagged for review"
            );
        }

        info!(
            intent = %result.intent(),
            allowed = result.allowed(),
            confidence = result.confidence(),
            "Intent classified"
        );

        Ok(result)
    }
}
