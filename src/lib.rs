//! Grounded Banking Agent
//!
//! A banking research assistant that only answers what it can trace back to
//! its knowledge base:
//! - Gates every message through an intent classifier (out-of-scope is declined)
//! - Retrieves sources for investment questions only
//! - Generates a spoken and a displayed answer in one pass
//! - Validates grounding, consistency and tool usage before anything is emitted
//! - Escalates to a human specialist when no answer validates
//! - Records every turn in an append-only, hash-checked audit trail
//!
//! VALIDATED LOOP:
//! CLASSIFY → { GENERATE → VALIDATE → RETRY? } × 3 → SUCCESS | ESCALATE

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod escalation;
pub mod gemini;
pub mod generator;
pub mod models;
pub mod responder;
pub mod retrieval;
pub mod text;
pub mod verification;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{Orchestrator, SessionState, MAX_ATTEMPTS};
pub use classifier::IntentClassifier;
pub use responder::GroundedResponder;
pub use verification::ResponseValidator;
