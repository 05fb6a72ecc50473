//! Grounded Responder
//!
//! Retrieves (for investment questions only), then generates the
//! dual-modality answer. Correction on retries is left entirely to the
//! generator, steered by the feedback text.

use crate::config::PipelineSettings;
use crate::error::with_deadline;
use crate::generator::{generate_typed, GenerationContext, Generator, Role};
use crate::models::{AgentResponse, IntentCategory, IntentResult, RetrievalRecord};
use crate::retrieval::{format_context, Retriever};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct GroundedResponder {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    role: Role,
    settings: PipelineSettings,
}

impl GroundedResponder {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            role: Role::grounded_responder(),
            settings,
        }
    }

    /// Only investment questions reach the knowledge base.
    fn needs_retrieval(intent: &IntentResult) -> bool {
        intent.intent() == IntentCategory::InvestmentRelated
    }

    async fn retrieve(&self, intent: &IntentResult) -> RetrievalRecord {
        let query = intent.query.trim().to_string();

        if !Self::needs_retrieval(intent) {
            return RetrievalRecord::not_invoked(query);
        }

        let search = self.retriever.search(&query, self.settings.search_limit);

        match with_deadline("retriever.search", self.settings.call_timeout, search).await {
            Ok(snippets) => {
                debug!(query = %query, snippets = snippets.len(), "Retrieval completed");
                RetrievalRecord::invoked(query, snippets)
            }
            Err(e) => {
                // Surfaces downstream as a traceability failure for investment mode.
                warn!(error = %e, "Retrieval failed; continuing without sources");
                RetrievalRecord::not_invoked(query)
            }
        }
    }

    /// Build the context for one attempt. Exposed so hosts can inspect
    /// exactly what the generator will see.
    pub fn build_context(
        &self,
        intent: &IntentResult,
        retrieval: &RetrievalRecord,
        feedback: Option<&str>,
        attempt: Option<(u32, u32)>,
    ) -> GenerationContext {
        let sources = if retrieval.was_invoked() {
            format_context(retrieval.snippets(), self.settings.context_max_tokens)
        } else {
            "Knowledge base not consulted for this intent.".to_string()
        };

        let mut context = GenerationContext::new()
            .with("query", intent.query.as_str())
            .with("intent", intent.intent().as_str())
            .with("sources", sources);

        if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
            context.insert("feedback", feedback);
        }

        if let Some((attempt, max_attempts)) = attempt.filter(|(a, _)| *a > 1) {
            context.insert(
                "attempt",
                format!(
                    "Attempt {} of {}. The previous answer was rejected; fix every issue listed under FEEDBACK.",
                    attempt, max_attempts
                ),
            );
        }

        context
    }

    /// Produce one candidate response and the retrieval it was grounded on.
    pub async fn respond(
        &self,
        intent: &IntentResult,
        feedback: Option<&str>,
    ) -> Result<(AgentResponse, RetrievalRecord)> {
        self.generate(intent, feedback, None).await
    }

    /// As [`respond`](Self::respond), telling the generator which attempt
    /// of the loop this is.
    pub async fn respond_attempt(
        &self,
        intent: &IntentResult,
        feedback: Option<&str>,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<(AgentResponse, RetrievalRecord)> {
        self.generate(intent, feedback, Some((attempt, max_attempts))).await
    }

    async fn generate(
        &self,
        intent: &IntentResult,
        feedback: Option<&str>,
        attempt: Option<(u32, u32)>,
    ) -> Result<(AgentResponse, RetrievalRecord)> {
        let retrieval = self.retrieve(intent).await;
        let context = self.build_context(intent, &retrieval, feedback, attempt);

        let response: AgentResponse = with_deadline(
            "generator.respond",
            self.settings.call_timeout,
            generate_typed(self.generator.as_ref(), &self.role, &context),
        )
        .await?;

        info!(
            intent = %intent.intent(),
            retrieval_invoked = retrieval.was_invoked(),
            snippets = retrieval.snippets().len(),
            voice_words = response.voice_word_count(),
            retry = feedback.map(|f| !f.is_empty()).unwrap_or(false),
            "Candidate response generated"
        );

        Ok((response, retrieval))
    }
}
