//! Escalation Fallback and fixed responses
//!
//! Last line of defense: whatever happens, the caller gets a well-formed
//! [`AgentResponse`]. Audit failures here are logged, never raised.

use crate::audit::{AuditLog, TurnDraft};
use crate::models::{AgentResponse, TurnStatus};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

pub const ESCALATION_VOICE: &str =
    "I couldn't verify an answer to that, so I'm passing you to one of our human specialists.";

pub const ESCALATION_DISPLAY: &str = "## We'll connect you with a specialist\n\nI wasn't able to give you a verified answer to this question. One of our human investment specialists can help you further.";

pub const DECLINE_VOICE: &str =
    "I'm sorry, I can only help with banking and investment research questions.";

pub const DECLINE_DISPLAY: &str =
    "I'm sorry, I can only help with banking and investment research questions. Feel free to ask about our strategy, market outlooks or research documents.";

/// The pre-approved response returned when no attempt validated.
pub fn escalation_response() -> AgentResponse {
    AgentResponse {
        voice_text: ESCALATION_VOICE.to_string(),
        display_text: ESCALATION_DISPLAY.to_string(),
        show_in_ui: true,
        follow_ups: Vec::new(),
    }
}

/// Returned for blocked intents and when classification itself fails.
pub fn decline_response() -> AgentResponse {
    AgentResponse {
        voice_text: DECLINE_VOICE.to_string(),
        display_text: DECLINE_DISPLAY.to_string(),
        show_in_ui: false,
        follow_ups: Vec::new(),
    }
}

pub struct EscalationFallback {
    audit_log: Arc<AuditLog>,
}

impl EscalationFallback {
    pub fn new(audit_log: Arc<AuditLog>) -> Self {
        Self { audit_log }
    }

    /// Produce the escalation response and record the exhausted turn.
    /// The audit id is `None` when the write failed.
    pub async fn fallback(&self, draft: TurnDraft) -> (AgentResponse, Option<Uuid>) {
        let response = escalation_response();

        warn!(
            attempts = draft.attempts,
            last_feedback = %draft.last_feedback,
            "Attempts exhausted; escalating to a human specialist"
        );

        let record = draft.finish(TurnStatus::Escalated, response.clone());
        let audit_id = match self.audit_log.record(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Failed to record escalation");
                None
            }
        };

        (response, audit_id)
    }
}
