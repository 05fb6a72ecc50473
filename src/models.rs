//! Core data contracts exchanged between pipeline stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Confidence under which an intent result is flagged for audit.
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Spoken output budget.
pub const MAX_VOICE_WORDS: usize = 30;

pub const MAX_FOLLOW_UPS: usize = 4;

//
// ================= Intent =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IntentCategory {
    #[serde(rename = "greet")]
    Greet,
    #[serde(rename = "investment_related_question")]
    InvestmentRelated,
    #[serde(rename = "general_question")]
    General,
    #[serde(rename = "out_of_scope")]
    OutOfScope,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Greet => "greet",
            IntentCategory::InvestmentRelated => "investment_related_question",
            IntentCategory::General => "general_question",
            IntentCategory::OutOfScope => "out_of_scope",
        }
    }

    /// Only out-of-scope traffic is blocked at the gate.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, IntentCategory::OutOfScope)
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `allowed` is always derived from `intent`; a stored `allowed` value is
/// ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "IntentResultFields")]
pub struct IntentResult {
    pub query: String,
    intent: IntentCategory,
    pub reasoning: String,
    confidence: f32,
    allowed: bool,
}

#[derive(Deserialize)]
struct IntentResultFields {
    query: String,
    intent: IntentCategory,
    #[serde(default)]
    reasoning: String,
    confidence: f32,
}

impl From<IntentResultFields> for IntentResult {
    fn from(fields: IntentResultFields) -> Self {
        IntentResult::new(fields.query, fields.intent, fields.reasoning, fields.confidence)
    }
}

impl IntentResult {
    /// Build a result whose `allowed` flag is derived from the intent.
    pub fn new(
        query: impl Into<String>,
        intent: IntentCategory,
        reasoning: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            query: query.into(),
            intent,
            reasoning: reasoning.into(),
            confidence,
            allowed: intent.is_allowed(),
        }
    }

    pub fn intent(&self) -> IntentCategory {
        self.intent
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Advisory only; never changes routing.
    pub fn needs_review(&self) -> bool {
        self.confidence < LOW_CONFIDENCE_THRESHOLD
    }
}

//
// ================= Retrieval =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub score: Option<f32>,
}

impl Snippet {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
        }
    }

    pub fn scored(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score: Some(score),
        }
    }
}

/// What the retriever returned for one generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RetrievalRecordFields")]
pub struct RetrievalRecord {
    query_used: String,
    snippets: Vec<Snippet>,
    was_invoked: bool,
}

#[derive(Deserialize)]
struct RetrievalRecordFields {
    query_used: String,
    #[serde(default)]
    snippets: Vec<Snippet>,
    was_invoked: bool,
}

impl TryFrom<RetrievalRecordFields> for RetrievalRecord {
    type Error = String;

    fn try_from(fields: RetrievalRecordFields) -> Result<Self, Self::Error> {
        if !fields.was_invoked && !fields.snippets.is_empty() {
            return Err(format!(
                "retrieval record for '{}' carries {} snippets but the retriever was not invoked",
                fields.query_used,
                fields.snippets.len()
            ));
        }
        Ok(Self {
            query_used: fields.query_used,
            snippets: fields.snippets,
            was_invoked: fields.was_invoked,
        })
    }
}

impl RetrievalRecord {
    pub fn not_invoked(query: impl Into<String>) -> Self {
        Self {
            query_used: query.into(),
            snippets: Vec::new(),
            was_invoked: false,
        }
    }

    pub fn invoked(query: impl Into<String>, snippets: Vec<Snippet>) -> Self {
        Self {
            query_used: query.into(),
            snippets,
            was_invoked: true,
        }
    }

    pub fn query_used(&self) -> &str {
        &self.query_used
    }

    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    pub fn was_invoked(&self) -> bool {
        self.was_invoked
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

}

//
// ================= Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentResponse {
    pub voice_text: String,
    pub display_text: String,
    pub show_in_ui: bool,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

impl AgentResponse {
    pub fn voice_word_count(&self) -> usize {
        self.voice_text.split_whitespace().count()
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Greet,
    General,
    Investment,
    OutOfScope,
    Unknown,
}

impl ValidationMode {
    /// Map a raw intent label; anything unrecognised lands on `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "greet" => ValidationMode::Greet,
            "general_question" | "general" => ValidationMode::General,
            "investment_related_question" | "investment" => ValidationMode::Investment,
            "out_of_scope" => ValidationMode::OutOfScope,
            _ => ValidationMode::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Greet => "greet",
            ValidationMode::General => "general",
            ValidationMode::Investment => "investment",
            ValidationMode::OutOfScope => "out_of_scope",
            ValidationMode::Unknown => "unknown",
        }
    }
}

impl From<IntentCategory> for ValidationMode {
    fn from(intent: IntentCategory) -> Self {
        match intent {
            IntentCategory::Greet => ValidationMode::Greet,
            IntentCategory::General => ValidationMode::General,
            IntentCategory::InvestmentRelated => ValidationMode::Investment,
            IntentCategory::OutOfScope => ValidationMode::OutOfScope,
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    is_valid: bool,
    traceability_ok: bool,
    consistency_ok: bool,
    tool_usage_ok: Option<bool>,
    mode: ValidationMode,
    feedback: String,
    should_exit: bool,
}

impl ValidationResult {
    /// Combine the individual checks into a verdict.
    ///
    /// `tool_usage_ok == None` means not applicable and does not block.
    /// An invalid verdict always carries feedback: the issues are joined,
    /// and an empty issue list is replaced by a description of the
    /// failed checks.
    pub fn from_checks(
        mode: ValidationMode,
        traceability_ok: bool,
        consistency_ok: bool,
        tool_usage_ok: Option<bool>,
        issues: &[String],
    ) -> Self {
        let is_valid = traceability_ok && consistency_ok && tool_usage_ok != Some(false);

        let feedback = if is_valid {
            String::new()
        } else if issues.is_empty() {
            let mut failed = Vec::new();
            if !traceability_ok {
                failed.push("traceability");
            }
            if !consistency_ok {
                failed.push("consistency");
            }
            if tool_usage_ok == Some(false) {
                failed.push("tool usage");
            }
            format!("{} mode: failed {} check(s)", mode, failed.join(", "))
        } else {
            issues.join("\n")
        };

        Self {
            is_valid,
            traceability_ok,
            consistency_ok,
            tool_usage_ok,
            mode,
            feedback,
            should_exit: is_valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn traceability_ok(&self) -> bool {
        self.traceability_ok
    }

    pub fn consistency_ok(&self) -> bool {
        self.consistency_ok
    }

    pub fn tool_usage_ok(&self) -> Option<bool> {
        self.tool_usage_ok
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }
}

//
// ================= Turn Outcome =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// A response passed validation.
    Validated,
    /// Attempts ran out; the escalation response was returned.
    Escalated,
    /// Out-of-scope intent; the fixed decline response was returned.
    Declined,
    /// The classifier failed; treated as out-of-scope.
    FailedClosed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Validated => "validated",
            TurnStatus::Escalated => "escalated",
            TurnStatus::Declined => "declined",
            TurnStatus::FailedClosed => "failed_closed",
        }
    }
}

/// Per-attempt trace kept for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptTrace {
    pub attempt: u32,
    pub retrieval_invoked: bool,
    pub snippet_count: usize,
    pub verdict: Option<ValidationResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub response: AgentResponse,
    pub status: TurnStatus,
    pub attempts: u32,
    pub intent: Option<IntentResult>,
    pub audit_id: Option<Uuid>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_tracks_intent() {
        for intent in [
            IntentCategory::Greet,
            IntentCategory::InvestmentRelated,
            IntentCategory::General,
            IntentCategory::OutOfScope,
        ] {
            let result = IntentResult::new("q", intent, "r", 0.9);
            assert_eq!(!result.allowed(), intent == IntentCategory::OutOfScope);
        }
    }

    #[test]
    fn test_confidence_clamped_and_flagged() {
        let high = IntentResult::new("q", IntentCategory::Greet, "r", 1.7);
        assert_eq!(high.confidence(), 1.0);
        assert!(!high.needs_review());

        let low = IntentResult::new("q", IntentCategory::General, "r", 0.42);
        assert!(low.needs_review());
        assert!(low.allowed());
    }

    #[test]
    fn test_intent_wire_labels() {
        let json = serde_json::to_string(&IntentCategory::InvestmentRelated).unwrap();
        assert_eq!(json, "\"investment_related_question\"");

        let parsed: IntentCategory = serde_json::from_str("\"out_of_scope\"").unwrap();
        assert_eq!(parsed, IntentCategory::OutOfScope);
        assert!(serde_json::from_str::<IntentCategory>("\"weather\"").is_err());
    }

    #[test]
    fn test_not_invoked_record_is_empty() {
        let record = RetrievalRecord::not_invoked("hello");
        assert!(!record.was_invoked());
        assert!(record.snippets().is_empty());
    }

    #[test]
    fn test_deserialized_intent_rederives_allowed() {
        let result: IntentResult = serde_json::from_value(serde_json::json!({
            "query": "How do I pick locks?",
            "intent": "out_of_scope",
            "reasoning": "illegal",
            "confidence": 0.99,
            "allowed": true
        }))
        .unwrap();
        assert!(!result.allowed());

        let round_trip: IntentResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        assert_eq!(round_trip, result);
    }

    #[test]
    fn test_uninvoked_record_with_snippets_rejected() {
        let bad = serde_json::from_value::<RetrievalRecord>(serde_json::json!({
            "query_used": "hello",
            "snippets": [{"text": "Rates fall."}],
            "was_invoked": false
        }));
        assert!(bad.is_err());

        let ok: RetrievalRecord = serde_json::from_value(serde_json::json!({
            "query_used": "gis",
            "snippets": [{"text": "Rates fall."}],
            "was_invoked": true
        }))
        .unwrap();
        assert_eq!(ok.snippets().len(), 1);
    }

    #[test]
    fn test_validation_result_invariants() {
        let ok = ValidationResult::from_checks(ValidationMode::General, true, true, None, &[]);
        assert!(ok.is_valid());
        assert!(ok.should_exit());
        assert!(ok.feedback().is_empty());

        let bad = ValidationResult::from_checks(
            ValidationMode::Investment,
            true,
            true,
            Some(false),
            &[],
        );
        assert!(!bad.is_valid());
        assert!(!bad.should_exit());
        assert!(bad.feedback().contains("tool usage"));
    }

    #[test]
    fn test_unknown_label_maps_to_unknown_mode() {
        assert_eq!(ValidationMode::from_label("weather"), ValidationMode::Unknown);
        assert_eq!(
            ValidationMode::from_label("investment_related_question"),
            ValidationMode::Investment
        );
    }
}
