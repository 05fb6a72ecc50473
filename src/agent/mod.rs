//! Main orchestrator - implements the validated generation loop
//!
//! CLASSIFY → { GENERATE → VALIDATE → RETRY? } × 3 → SUCCESS | ESCALATE

use crate::audit::{AuditLog, TurnDraft};
use crate::classifier::IntentClassifier;
use crate::config::PipelineSettings;
use crate::escalation::{decline_response, EscalationFallback};
use crate::generator::Generator;
use crate::models::{AgentResponse, AttemptTrace, IntentResult, RetrievalRecord, TurnOutcome, TurnStatus};
use crate::responder::GroundedResponder;
use crate::retrieval::Retriever;
use crate::verification::ResponseValidator;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Generation attempts per turn. Fixed policy, never per request.
pub const MAX_ATTEMPTS: u32 = 3;

/// Feedback carried into the next attempt after a generator failure.
pub const GENERATION_ERROR_FEEDBACK: &str = "generation error, retry";

/// Host-owned per-session values. The core reads only `session_id`, for
/// the audit trail.
pub type SessionState = Map<String, Value>;

/// Turn-scoped loop bookkeeping, discarded when the turn ends. Each
/// attempt replaces `last_response` and `last_retrieval`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_feedback: String,
    pub last_response: Option<AgentResponse>,
    pub last_retrieval: Option<RetrievalRecord>,
    pub valid: bool,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            attempt: 0,
            max_attempts: MAX_ATTEMPTS,
            last_feedback: String::new(),
            last_response: None,
            last_retrieval: None,
            valid: false,
        }
    }
}

impl LoopState {
    fn feedback(&self) -> Option<&str> {
        (!self.last_feedback.is_empty()).then_some(self.last_feedback.as_str())
    }

    /// RETRY while budget remains, EXHAUSTED otherwise.
    fn after_failure(&self) -> LoopPhase {
        if self.attempt < self.max_attempts {
            LoopPhase::Retry
        } else {
            LoopPhase::Exhausted
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoopPhase {
    Start,
    Generating,
    Validating,
    Success,
    Retry,
    Exhausted,
}

impl LoopPhase {
    pub fn name(&self) -> &'static str {
        match self {
            LoopPhase::Start => "start",
            LoopPhase::Generating => "generating",
            LoopPhase::Validating => "validating",
            LoopPhase::Success => "success",
            LoopPhase::Retry => "retry",
            LoopPhase::Exhausted => "exhausted",
        }
    }
}

/// Main orchestrator that coordinates the entire turn
pub struct Orchestrator {
    classifier: IntentClassifier,
    responder: GroundedResponder,
    validator: ResponseValidator,
    escalation: EscalationFallback,
    audit_log: Arc<AuditLog>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        audit_log: Arc<AuditLog>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(generator.clone(), settings.call_timeout),
            validator: ResponseValidator::new(
                generator.clone(),
                settings.call_timeout,
                settings.context_max_tokens,
            ),
            responder: GroundedResponder::new(retriever, generator, settings),
            escalation: EscalationFallback::new(audit_log.clone()),
            audit_log,
        }
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit_log
    }

    /// Turn API: always a well-formed response, never an error.
    pub async fn handle_turn(&self, user_message: &str, session: &SessionState) -> AgentResponse {
        self.run_turn(user_message, session).await.response
    }

    /// Run one turn and report how it ended.
    pub async fn run_turn(&self, user_message: &str, session: &SessionState) -> TurnOutcome {
        let started = Instant::now();
        let session_id = session
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut draft = TurnDraft::new(user_message, session_id);

        info!(session_id = ?draft.session_id, "Turn started");

        // === CLASSIFY ===
        let intent = match self.classifier.classify(user_message).await {
            Ok(intent) => intent,
            Err(e) => {
                // Fail closed: an unclassifiable message is treated as out of scope.
                warn!(error = %e, "Classification failed; declining");
                draft.last_feedback = format!("classification failed: {}", e);
                return self
                    .finish(draft, started, TurnStatus::FailedClosed, decline_response())
                    .await;
            }
        };
        draft.intent = Some(intent.clone());

        if !intent.allowed() {
            info!(intent = %intent.intent(), "Intent blocked at the gate; declining");
            return self
                .finish(draft, started, TurnStatus::Declined, decline_response())
                .await;
        }

        // === GENERATE / VALIDATE ===
        match self.run_loop(&intent, &mut draft).await {
            Some(response) => {
                self.finish(draft, started, TurnStatus::Validated, response)
                    .await
            }
            None => {
                // === ESCALATE ===
                draft.elapsed_ms = started.elapsed().as_millis() as u64;
                let attempts = draft.attempts;
                let (response, audit_id) = self.escalation.fallback(draft).await;
                TurnOutcome {
                    response,
                    status: TurnStatus::Escalated,
                    attempts,
                    intent: Some(intent),
                    audit_id,
                    completed_at: Utc::now(),
                }
            }
        }
    }

    /// Drive the state machine. `Some` carries the validated response,
    /// `None` means the attempt budget ran out.
    async fn run_loop(&self, intent: &IntentResult, draft: &mut TurnDraft) -> Option<AgentResponse> {
        let mut state = LoopState::default();
        let mut phase = LoopPhase::Start;

        loop {
            debug!(phase = phase.name(), attempt = state.attempt, "Loop transition");

            phase = match phase {
                LoopPhase::Start => {
                    state = LoopState::default();
                    LoopPhase::Generating
                }

                LoopPhase::Generating => {
                    state.attempt += 1;

                    let generated = self
                        .responder
                        .respond_attempt(intent, state.feedback(), state.attempt, state.max_attempts)
                        .await;

                    match generated {
                        Ok((response, retrieval)) => {
                            state.last_response = Some(response);
                            state.last_retrieval = Some(retrieval);
                            LoopPhase::Validating
                        }
                        Err(e) => {
                            warn!(attempt = state.attempt, error = %e, "Generation failed");
                            draft.trace.push(AttemptTrace {
                                attempt: state.attempt,
                                retrieval_invoked: false,
                                snippet_count: 0,
                                verdict: None,
                                error: Some(e.to_string()),
                            });
                            state.last_feedback = GENERATION_ERROR_FEEDBACK.to_string();

                            if e.is_retryable() {
                                state.after_failure()
                            } else {
                                LoopPhase::Exhausted
                            }
                        }
                    }
                }

                LoopPhase::Validating => {
                    let (Some(response), Some(retrieval)) =
                        (state.last_response.as_ref(), state.last_retrieval.as_ref())
                    else {
                        error!(attempt = state.attempt, "No candidate to validate");
                        phase = LoopPhase::Exhausted;
                        continue;
                    };

                    let mut trace = AttemptTrace {
                        attempt: state.attempt,
                        retrieval_invoked: retrieval.was_invoked(),
                        snippet_count: retrieval.snippets().len(),
                        verdict: None,
                        error: None,
                    };

                    let verdict = self.validator.validate(intent, response, retrieval).await;
                    let next = match verdict {
                        Ok(verdict) if verdict.should_exit() => {
                            state.valid = true;
                            trace.verdict = Some(verdict);
                            LoopPhase::Success
                        }
                        Ok(verdict) => {
                            warn!(
                                attempt = state.attempt,
                                mode = %verdict.mode(),
                                feedback = %verdict.feedback(),
                                "Attempt rejected"
                            );
                            state.last_feedback = verdict.feedback().to_string();
                            trace.verdict = Some(verdict);
                            state.after_failure()
                        }
                        Err(e) => {
                            warn!(attempt = state.attempt, error = %e, "Validation failed");
                            state.last_feedback = format!(
                                "The previous answer could not be validated ({}); answer again strictly from the sources.",
                                e
                            );
                            trace.error = Some(e.to_string());
                            state.after_failure()
                        }
                    };

                    draft.trace.push(trace);
                    next
                }

                LoopPhase::Retry => {
                    info!(attempt = state.attempt, max_attempts = state.max_attempts, "Retrying with feedback");
                    LoopPhase::Generating
                }

                LoopPhase::Success => {
                    info!(attempt = state.attempt, "Response validated");
                    draft.attempts = state.attempt;
                    draft.last_feedback = state.last_feedback;
                    return state.last_response;
                }

                LoopPhase::Exhausted => {
                    draft.attempts = state.attempt;
                    draft.last_feedback = state.last_feedback;
                    return None;
                }
            };
        }
    }

    async fn finish(
        &self,
        mut draft: TurnDraft,
        started: Instant,
        status: TurnStatus,
        response: AgentResponse,
    ) -> TurnOutcome {
        draft.elapsed_ms = started.elapsed().as_millis() as u64;
        let intent = draft.intent.clone();
        let attempts = draft.attempts;

        let record = draft.finish(status, response.clone());
        let audit_id = match self.audit_log.record(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Failed to record turn");
                None
            }
        };

        info!(status = status.as_str(), attempts, audit_id = ?audit_id, "Turn complete");

        TurnOutcome {
            response,
            status,
            attempts,
            intent,
            audit_id,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::escalation_response;
    use crate::generator::{HeuristicGenerator, ScriptedGenerator, ROLE_INTENT, ROLE_RESPONDER, ROLE_VALIDATOR};
    use crate::models::{IntentCategory, Snippet};
    use crate::retrieval::{KeywordRetriever, StaticRetriever};
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            call_timeout: Duration::from_millis(200),
            ..PipelineSettings::default()
        }
    }

    fn intent_json(intent: &str) -> Value {
        json!({"intent": intent, "reasoning": "scripted", "confidence": 0.95})
    }

    fn approve() -> Value {
        json!({"traceability_ok": true, "consistency_ok": true, "feedback": ""})
    }

    fn investment_answer(figure: &str) -> Value {
        json!({
            "voice_text": format!("Our outlook expects growth of {} in European equities.", figure),
            "display_text": format!("## European equities\n\nOur outlook expects growth of **{}** in European equities.", figure),
            "show_in_ui": true,
            "follow_ups": ["Tell me more about European equities"]
        })
    }

    fn sources() -> Arc<StaticRetriever> {
        Arc::new(StaticRetriever::new(vec![Snippet::new(
            "Our outlook expects growth of 4% in European equities.",
        )]))
    }

    fn orchestrator(generator: Arc<ScriptedGenerator>, retriever: Arc<StaticRetriever>) -> Orchestrator {
        Orchestrator::new(generator, retriever, Arc::new(AuditLog::in_memory()), settings())
    }

    #[test]
    fn test_loop_state_budget() {
        let mut state = LoopState::default();
        assert_eq!(state.max_attempts, MAX_ATTEMPTS);
        assert!(state.last_response.is_none());
        assert!(state.last_retrieval.is_none());

        state.attempt = 2;
        assert!(matches!(state.after_failure(), LoopPhase::Retry));
        state.attempt = 3;
        assert!(matches!(state.after_failure(), LoopPhase::Exhausted));
    }

    #[tokio::test]
    async fn test_hello_is_greeted_without_retrieval() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("greet"));
        generator.push(
            ROLE_RESPONDER,
            json!({
                "voice_text": "Hello, I'm Avery. What would you like to explore in our research today?",
                "display_text": "Hello, I'm Avery, your guide to our investment research.",
                "show_in_ui": false,
                "follow_ups": []
            }),
        );
        generator.push(ROLE_VALIDATOR, approve());
        let retriever = sources();

        let agent = orchestrator(generator, retriever.clone());
        let outcome = agent.run_turn("Hello", &SessionState::new()).await;

        let intent = outcome.intent.unwrap();
        assert_eq!(intent.intent(), IntentCategory::Greet);
        assert!(intent.allowed());
        assert_eq!(outcome.status, TurnStatus::Validated);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.response.show_in_ui);
        assert_eq!(retriever.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pick_locks_is_declined() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, json!({"intent": "out_of_scope", "reasoning": "illegal", "confidence": 0.99, "allowed": true}));
        let retriever = sources();

        let agent = orchestrator(generator.clone(), retriever.clone());
        let outcome = agent.run_turn("How do I pick locks?", &SessionState::new()).await;

        assert!(!outcome.intent.unwrap().allowed());
        assert_eq!(outcome.status, TurnStatus::Declined);
        assert!(crate::text::declines(&outcome.response.voice_text));
        assert_eq!(retriever.call_count(), 0);
        assert!(generator.calls_for(ROLE_RESPONDER).is_empty());
    }

    #[tokio::test]
    async fn test_three_rejections_escalate_with_audit() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("investment_related_question"));
        generator.repeat(ROLE_RESPONDER, investment_answer("9%"));
        generator.repeat(ROLE_VALIDATOR, approve());
        let retriever = sources();

        let agent = orchestrator(generator.clone(), retriever.clone());
        let outcome = agent.run_turn("What is the EMEA equities outlook?", &SessionState::new()).await;

        assert_eq!(outcome.status, TurnStatus::Escalated);
        assert_eq!(outcome.response, escalation_response());
        assert_eq!(outcome.attempts, MAX_ATTEMPTS);
        assert_eq!(generator.calls_for(ROLE_RESPONDER).len(), MAX_ATTEMPTS as usize);
        assert_eq!(retriever.call_count(), MAX_ATTEMPTS as usize);

        let record = agent.audit_log().get(outcome.audit_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(record.status, TurnStatus::Escalated);
        assert!(record.last_feedback.contains("'9%'"));
        assert_eq!(record.trace.len(), 3);
    }

    #[tokio::test]
    async fn test_feedback_reaches_next_attempt() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("investment_related_question"));
        generator.push(ROLE_RESPONDER, investment_answer("9%"));
        generator.push(ROLE_RESPONDER, investment_answer("4%"));
        generator.repeat(ROLE_VALIDATOR, approve());

        let agent = orchestrator(generator.clone(), sources());
        let outcome = agent.run_turn("European equities outlook?", &SessionState::new()).await;

        assert_eq!(outcome.status, TurnStatus::Validated);
        assert_eq!(outcome.attempts, 2);

        let record = agent.audit_log().get(outcome.audit_id.unwrap()).await.unwrap().unwrap();
        let first_verdict = record.trace[0].verdict.clone().unwrap();
        assert!(!first_verdict.is_valid());
        assert!(record.trace[1].verdict.as_ref().unwrap().is_valid());

        let calls = generator.calls_for(ROLE_RESPONDER);
        assert!(!calls[0].context.contains_key("feedback"));
        assert_eq!(calls[1].context.get_str("feedback"), Some(first_verdict.feedback()));
    }

    #[tokio::test]
    async fn test_generation_errors_consume_attempts() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("investment_related_question"));
        generator.push_schema_violation(ROLE_RESPONDER, "missing voice_text");
        generator.push_failure(ROLE_RESPONDER, "model unavailable");
        generator.push(ROLE_RESPONDER, investment_answer("4%"));
        generator.repeat(ROLE_VALIDATOR, approve());

        let agent = orchestrator(generator.clone(), sources());
        let outcome = agent.run_turn("European equities outlook?", &SessionState::new()).await;

        assert_eq!(outcome.status, TurnStatus::Validated);
        assert_eq!(outcome.attempts, 3);

        let calls = generator.calls_for(ROLE_RESPONDER);
        assert_eq!(calls[1].context.get_str("feedback"), Some(GENERATION_ERROR_FEEDBACK));
        assert_eq!(calls[2].context.get_str("feedback"), Some(GENERATION_ERROR_FEEDBACK));
    }

    #[tokio::test]
    async fn test_timeouts_route_to_escalation() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("investment_related_question"));
        for _ in 0..MAX_ATTEMPTS {
            generator.push_delayed(ROLE_RESPONDER, Duration::from_secs(2), investment_answer("4%"));
        }

        let agent = orchestrator(generator.clone(), sources());
        let outcome = agent.run_turn("European equities outlook?", &SessionState::new()).await;

        assert_eq!(outcome.status, TurnStatus::Escalated);
        assert_eq!(outcome.response, escalation_response());
        assert_eq!(outcome.attempts, MAX_ATTEMPTS);
        assert!(generator.calls_for(ROLE_VALIDATOR).is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_never_validates_investment() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("investment_related_question"));
        generator.repeat(ROLE_RESPONDER, investment_answer("4%"));
        generator.repeat(ROLE_VALIDATOR, approve());

        let agent = Orchestrator::new(
            generator,
            Arc::new(StaticRetriever::failing("index offline")),
            Arc::new(AuditLog::in_memory()),
            settings(),
        );
        let outcome = agent.run_turn("European equities outlook?", &SessionState::new()).await;

        assert_eq!(outcome.status, TurnStatus::Escalated);
        let record = agent.audit_log().get(outcome.audit_id.unwrap()).await.unwrap().unwrap();
        for attempt in &record.trace {
            let verdict = attempt.verdict.as_ref().unwrap();
            assert!(!verdict.traceability_ok());
            assert!(!attempt.retrieval_invoked);
        }
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_closed() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push_schema_violation(ROLE_INTENT, "not json");

        let agent = orchestrator(generator.clone(), sources());
        let outcome = agent.run_turn("Hello", &SessionState::new()).await;

        assert_eq!(outcome.status, TurnStatus::FailedClosed);
        assert_eq!(outcome.response, decline_response());
        assert!(outcome.intent.is_none());
        assert!(generator.calls_for(ROLE_RESPONDER).is_empty());
    }

    #[tokio::test]
    async fn test_session_turns_are_audited() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(ROLE_INTENT, intent_json("out_of_scope"));
        generator.push(ROLE_INTENT, intent_json("out_of_scope"));

        let agent = orchestrator(generator, sources());
        let mut session = SessionState::new();
        session.insert("session_id".to_string(), json!("session-42"));

        let first = agent.handle_turn("weather?", &session).await;
        agent.handle_turn("a poem?", &session).await;

        assert_eq!(first, decline_response());
        let ids = agent.audit_log().list_for_session("session-42").await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(agent.audit_log().verify_integrity(ids[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_pipeline_end_to_end() {
        let retriever = Arc::new(KeywordRetriever::from_documents(vec![
            (
                "gis_outlook.md",
                "European equities look attractive on valuation grounds, with earnings growth of 8% expected in 2025.",
            ),
            ("rates.md", "Central banks are expected to cut policy rates twice next year."),
        ]));
        let agent = Arc::new(Orchestrator::new(
            Arc::new(HeuristicGenerator::new()),
            retriever,
            Arc::new(AuditLog::in_memory()),
            settings(),
        ));

        let session = SessionState::new();
        let (equities, hello, locks) = tokio::join!(
            agent.run_turn("What is the outlook for European equities?", &session),
            agent.run_turn("Hello", &session),
            agent.run_turn("How do I pick locks?", &session),
        );

        assert_eq!(equities.status, TurnStatus::Validated);
        assert!(equities.response.show_in_ui);
        assert!(equities.response.voice_text.contains("8%"));
        assert_eq!(hello.status, TurnStatus::Validated);
        assert!(!hello.response.show_in_ui);
        assert_eq!(locks.status, TurnStatus::Declined);
    }
}
