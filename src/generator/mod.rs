//! Generator trait and implementations
//!
//! A generator turns a role (instructions + target schema) and a context
//! map into a structured value. Every pipeline stage talks to the model
//! through this one seam.

use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub mod gemini;
pub mod heuristic;
pub mod roles;

pub use gemini::GeminiGenerator;
pub use heuristic::HeuristicGenerator;
pub use roles::{Role, ROLE_INTENT, ROLE_RESPONDER, ROLE_VALIDATOR};

/// Target shape a generator must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SchemaDescriptor {
    IntentResult,
    AgentResponse,
    ValidationVerdict,
}

impl SchemaDescriptor {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaDescriptor::IntentResult => "IntentResult",
            SchemaDescriptor::AgentResponse => "AgentResponse",
            SchemaDescriptor::ValidationVerdict => "ValidationVerdict",
        }
    }

    /// JSON skeleton shown to the model.
    pub fn shape(&self) -> &'static str {
        match self {
            SchemaDescriptor::IntentResult => {
                r#"{"query": "<original message>", "intent": "greet|investment_related_question|general_question|out_of_scope", "reasoning": "<why>", "confidence": 0.0, "allowed": true}"#
            }
            SchemaDescriptor::AgentResponse => {
                r#"{"voice_text": "<= 30 spoken words", "display_text": "<markdown>", "show_in_ui": false, "follow_ups": ["<statement>"]}"#
            }
            SchemaDescriptor::ValidationVerdict => {
                r#"{"traceability_ok": true, "consistency_ok": true, "tool_usage_ok": true, "feedback": "<specific issues or empty>"}"#
            }
        }
    }
}

/// Named inputs handed to a generator call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationContext {
    entries: BTreeMap<String, Value>,
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Render as prompt sections, one `## KEY` block per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str("## ");
            out.push_str(&key.to_uppercase());
            out.push('\n');
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(
                    &serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
                ),
            }
            out.push_str("\n\n");
        }
        out
    }
}

/// Trait for structured generation (LLM controlled)
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        role: &Role,
        context: &GenerationContext,
        schema: SchemaDescriptor,
    ) -> Result<Value>;
}

/// Generate and parse into `T`. A value that does not fit is a
/// [`AgentError::SchemaViolation`], never coerced.
pub async fn generate_typed<T: DeserializeOwned>(
    generator: &dyn Generator,
    role: &Role,
    context: &GenerationContext,
) -> Result<T> {
    let value = generator.generate(role, context, role.schema).await?;
    serde_json::from_value(value)
        .map_err(|e| AgentError::schema_violation(role.schema.name(), e.to_string()))
}

/// Strip markdown fences a model may wrap around JSON, then parse.
pub fn parse_json_payload(raw: &str, schema: SchemaDescriptor) -> Result<Value> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| {
        AgentError::schema_violation(schema.name(), format!("{} | raw={}", e, raw))
    })
}

//
// ================= Scripted Generator =================
//

#[derive(Debug, Clone)]
enum ScriptStep {
    Value(Value),
    Delayed(Duration, Value),
    SchemaViolation(String),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub role: String,
    pub context: GenerationContext,
}

/// Replays queued outputs per role and records every context it is
/// handed. Keeps the loop deterministic without a model.
#[derive(Default)]
pub struct ScriptedGenerator {
    queues: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    repeats: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, role: &str, step: ScriptStep) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(role.to_string()).or_default().push_back(step);
        }
    }

    pub fn push(&self, role: &str, value: Value) -> &Self {
        self.enqueue(role, ScriptStep::Value(value));
        self
    }

    pub fn push_delayed(&self, role: &str, delay: Duration, value: Value) -> &Self {
        self.enqueue(role, ScriptStep::Delayed(delay, value));
        self
    }

    pub fn push_schema_violation(&self, role: &str, reason: &str) -> &Self {
        self.enqueue(role, ScriptStep::SchemaViolation(reason.to_string()));
        self
    }

    pub fn push_failure(&self, role: &str, reason: &str) -> &Self {
        self.enqueue(role, ScriptStep::Failure(reason.to_string()));
        self
    }

    /// Output used once a role's queue is drained.
    pub fn repeat(&self, role: &str, value: Value) -> &Self {
        if let Ok(mut repeats) = self.repeats.lock() {
            repeats.insert(role.to_string(), value);
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, role: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.role == role)
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        role: &Role,
        context: &GenerationContext,
        schema: SchemaDescriptor,
    ) -> Result<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                role: role.name.to_string(),
                context: context.clone(),
            });
        }

        let next = self
            .queues
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(role.name).and_then(VecDeque::pop_front));

        let step = match next {
            Some(step) => step,
            None => {
                let repeated = self
                    .repeats
                    .lock()
                    .ok()
                    .and_then(|r| r.get(role.name).cloned());
                match repeated {
                    Some(value) => ScriptStep::Value(value),
                    None => {
                        return Err(AgentError::GenerationError(format!(
                            "no scripted output left for role {}",
                            role.name
                        )))
                    }
                }
            }
        };

        match step {
            ScriptStep::Value(value) => Ok(value),
            ScriptStep::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            ScriptStep::SchemaViolation(reason) => {
                Err(AgentError::schema_violation(schema.name(), reason))
            }
            ScriptStep::Failure(reason) => Err(AgentError::GenerationError(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentResponse;
    use serde_json::json;

    #[tokio::test]
    async fn test_generate_typed_rejects_wrong_shape() {
        let generator = ScriptedGenerator::new();
        generator.push(ROLE_RESPONDER, json!({ "voice": "hi" }));

        let role = Role::grounded_responder();
        let result: Result<AgentResponse> =
            generate_typed(&generator, &role, &GenerationContext::new()).await;

        match result {
            Err(AgentError::SchemaViolation { schema, .. }) => assert_eq!(schema, "AgentResponse"),
            other => panic!("expected schema violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_queue_then_repeat() {
        let generator = ScriptedGenerator::new();
        generator
            .push(ROLE_VALIDATOR, json!({ "n": 1 }))
            .repeat(ROLE_VALIDATOR, json!({ "n": 2 }));

        let role = Role::response_validator();
        let ctx = GenerationContext::new().with("attempt", 1);

        let first = generator.generate(&role, &ctx, role.schema).await.unwrap();
        let second = generator.generate(&role, &ctx, role.schema).await.unwrap();
        let third = generator.generate(&role, &ctx, role.schema).await.unwrap();

        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
        assert_eq!(third["n"], 2);
        assert_eq!(generator.calls_for(ROLE_VALIDATOR).len(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_is_generation_error() {
        let generator = ScriptedGenerator::new();
        let role = Role::intent_classifier();
        let result = generator
            .generate(&role, &GenerationContext::new(), role.schema)
            .await;
        assert!(matches!(result, Err(AgentError::GenerationError(_))));
    }

    #[test]
    fn test_parse_json_payload_strips_fences() {
        let raw = "```json\n{\"intent\": \"greet\"}\n```";
        let value = parse_json_payload(raw, SchemaDescriptor::IntentResult).unwrap();
        assert_eq!(value["intent"], "greet");

        let err = parse_json_payload("not json", SchemaDescriptor::IntentResult).unwrap_err();
        assert!(matches!(err, AgentError::SchemaViolation { .. }));
    }

    #[test]
    fn test_context_render_lists_sections() {
        let ctx = GenerationContext::new()
            .with("query", "What is GIS?")
            .with("feedback", "voice_text cites 3% which is absent");
        let rendered = ctx.render();
        assert!(rendered.contains("## QUERY\nWhat is GIS?"));
        assert!(rendered.contains("## FEEDBACK\nvoice_text cites 3% which is absent"));
    }
}
