//! Gemini-backed generator
//!
//! The role's instructions become the system instruction; the rendered
//! context becomes the user turn.

use super::{parse_json_payload, GenerationContext, Generator, Role, SchemaDescriptor};
use crate::gemini::GeminiClient;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

pub struct GeminiGenerator {
    client: GeminiClient,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key, model)?,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        role: &Role,
        context: &GenerationContext,
        schema: SchemaDescriptor,
    ) -> Result<Value> {
        let prompt = context.render();
        let raw = self.client.generate_json(&role.system_prompt(), &prompt).await?;

        debug!(
            role = role.name,
            model = self.client.model(),
            response_chars = raw.len(),
            "Gemini generation received"
        );

        parse_json_payload(&raw, schema)
    }
}
