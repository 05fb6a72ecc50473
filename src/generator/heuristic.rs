//! Offline generator
//!
//! Keyword heuristics standing in for the model in all three roles, so the
//! demo binary and local runs need no API key. Output is deterministic:
//! the responder only ever repeats retrieved text, which keeps it inside
//! the validator's grounding rules.

use super::{GenerationContext, Generator, Role, SchemaDescriptor, ROLE_INTENT, ROLE_RESPONDER, ROLE_VALIDATOR};
use crate::error::AgentError;
use crate::models::{IntentCategory, MAX_VOICE_WORDS};
use crate::text::content_terms;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Static keyword lists, zero allocation
const GREETING_KEYWORDS: &[&str] = &[
    "hello", "hi", "hey", "good morning", "good afternoon", "good evening", "greetings", "howdy",
];

const OUT_OF_SCOPE_KEYWORDS: &[&str] = &[
    // Illegal or harmful
    "pick lock", "pick a lock", "lockpick", "hack", "steal", "weapon", "launder",
    // Off-topic
    "weather", "recipe", "cook", "football", "movie", "song", "poem", "joke",
];

const INVESTMENT_KEYWORDS: &[&str] = &[
    // Research and strategy
    "invest", "strategy", "outlook", "research", "report", "document", "gis", "cio",
    // Markets and assets
    "market", "equit", "bond", "fixed income", "stock", "portfolio", "asset", "fund",
    "rate", "inflation", "yield", "currency", "commodit", "economy", "econom", "gdp",
    // Regions and rankings
    "emea", "apac", "americas", "region", "ranking", "index", "sector",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "who are you", "your name", "what can you do", "what do you do", "help me", "thank",
    "how are you", "are you a", "capabilities",
];

const GREETING_RESPONSE: (&str, &str) = (
    "Hello, I'm Avery, your investment research assistant. What would you like to explore today?",
    "Hello, I'm Avery. I can help you explore our investment research and strategy documents.",
);

const GENERAL_RESPONSE: (&str, &str) = (
    "I'm Avery, an assistant for our investment research library. Ask me about strategy, outlooks or regional views.",
    "I'm Avery. I answer questions using our investment research library, including strategy documents, market outlooks and regional views.",
);

const DECLINE_RESPONSE: (&str, &str) = (
    "I'm sorry, I can only help with banking and investment research questions.",
    "I'm sorry, I can only help with banking and investment research questions. Please ask about our strategy or market research.",
);

const NO_INFORMATION_RESPONSE: (&str, &str) = (
    "I don't have information on that in our research library right now.",
    "I don't have information on that in our research library. Try asking about another topic from our research.",
);

fn contains_any(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| contains_word(text, kw)).count()
}

/// Keyword match on word boundaries at the start, so "hi" does not fire
/// on "this". Stems such as "equit" still match longer words.
fn contains_word(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(idx, _)| {
        idx == 0
            || !text[..idx]
                .chars()
                .next_back()
                .map(char::is_alphanumeric)
                .unwrap_or(false)
    })
}

fn only_greeting(text: &str) -> bool {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let stripped = stripped.trim();
    !stripped.is_empty()
        && GREETING_KEYWORDS
            .iter()
            .any(|g| stripped == *g || stripped.strip_prefix(g).map(|rest| rest.trim() == "there" || rest.trim() == "avery").unwrap_or(false))
}

/// Classify by keyword scores. Blocked terms win over everything else.
pub fn classify_message(message: &str) -> (IntentCategory, &'static str, f32) {
    let text = message.trim().to_lowercase();

    if contains_any(&text, OUT_OF_SCOPE_KEYWORDS) > 0 {
        return (IntentCategory::OutOfScope, "matches a blocked or off-topic subject", 0.9);
    }
    if only_greeting(&text) {
        return (IntentCategory::Greet, "message is only a greeting", 0.95);
    }

    let investment = contains_any(&text, INVESTMENT_KEYWORDS);
    let general = contains_any(&text, GENERAL_KEYWORDS);

    if investment > 0 && investment >= general {
        let confidence = if investment >= 2 { 0.9 } else { 0.75 };
        (IntentCategory::InvestmentRelated, "mentions investment research subjects", confidence)
    } else if general > 0 {
        (IntentCategory::General, "asks about the assistant", 0.85)
    } else if contains_any(&text, GREETING_KEYWORDS) > 0 {
        (IntentCategory::General, "greeting with conversational content", 0.6)
    } else {
        (IntentCategory::OutOfScope, "no banking or investment subject recognised", 0.55)
    }
}

/// Pull passage bodies back out of a rendered source block.
fn source_passages(sources: &str) -> Vec<String> {
    if !sources.starts_with("Relevant information") {
        return Vec::new();
    }
    sources
        .split("\n\n")
        .skip(1)
        .filter_map(|part| part.split_once('\n').map(|(_, body)| body.trim().to_string()))
        .filter(|body| !body.is_empty())
        .collect()
}

/// First sentence of a passage, made speakable and cut to the word budget.
fn speakable(passage: &str) -> String {
    let body = match passage.rfind(" (") {
        Some(idx) if passage.ends_with(')') => &passage[..idx],
        _ => passage,
    };
    let sentence = body
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(body);
    let cleaned: String = sentence
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '`' | '|' | '_'))
        .collect();

    cleaned
        .split_whitespace()
        .skip_while(|w| *w == "-" || *w == "+")
        .take(MAX_VOICE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn respond(context: &GenerationContext) -> Value {
    let intent = context.get_str("intent").unwrap_or_default();
    let retrying = context.contains_key("feedback");

    let fixed = |(voice, display): (&str, &str)| {
        json!({"voice_text": voice, "display_text": display, "show_in_ui": false, "follow_ups": []})
    };

    match intent {
        "greet" => fixed(GREETING_RESPONSE),
        "general_question" => fixed(GENERAL_RESPONSE),
        "investment_related_question" => {
            let passages = source_passages(context.get_str("sources").unwrap_or_default());
            let Some(first) = passages.first() else {
                return fixed(NO_INFORMATION_RESPONSE);
            };

            let display = format!("## From our research\n\n{}", passages.join("\n\n"));
            // A retry drops follow-ups and keeps only the quoted sentence.
            let follow_ups: Vec<String> = if retrying {
                Vec::new()
            } else {
                content_terms(first)
                    .into_iter()
                    .take(2)
                    .map(|term| format!("Tell me more about {}", term))
                    .collect()
            };

            json!({
                "voice_text": speakable(first),
                "display_text": display,
                "show_in_ui": true,
                "follow_ups": follow_ups,
            })
        }
        _ => fixed(DECLINE_RESPONSE),
    }
}

/// Lenient judge: checks the spoken answer shares vocabulary with the
/// sources in investment mode. The rule table has already run.
fn judge(context: &GenerationContext) -> Value {
    let mode = context.get_str("mode").unwrap_or_default();
    let voice = context.get_str("voice_text").unwrap_or_default();
    let sources = context.get_str("sources").unwrap_or_default();

    if mode == "investment" && sources.starts_with("Relevant information") {
        let voice_terms = content_terms(voice);
        if !voice_terms.is_empty() && voice_terms.is_disjoint(&content_terms(sources)) {
            return json!({
                "traceability_ok": false,
                "consistency_ok": true,
                "feedback": format!("voice_text '{}' shares no wording with the sources; restate what the sources say.", voice),
            });
        }
    }

    json!({"traceability_ok": true, "consistency_ok": true, "feedback": ""})
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicGenerator;

impl HeuristicGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Generator for HeuristicGenerator {
    async fn generate(
        &self,
        role: &Role,
        context: &GenerationContext,
        _schema: SchemaDescriptor,
    ) -> Result<Value> {
        match role.name {
            ROLE_INTENT => {
                let message = context.get_str("message").unwrap_or_default();
                let (intent, reasoning, confidence) = classify_message(message);
                Ok(json!({
                    "query": message,
                    "intent": intent,
                    "reasoning": reasoning,
                    "confidence": confidence,
                    "allowed": intent.is_allowed(),
                }))
            }
            ROLE_RESPONDER => Ok(respond(context)),
            ROLE_VALIDATOR => Ok(judge(context)),
            other => Err(AgentError::GenerationError(format!(
                "heuristic generator has no behaviour for role '{}'",
                other
            ))),
        }
    }
}
