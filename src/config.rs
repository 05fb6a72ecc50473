//! Environment-driven configuration
//!
//! Loaded once at startup. A missing credential is fatal here so that
//! no turn ever runs against a half-configured generator.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_CONTEXT_MAX_TOKENS: usize = 2000;
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieverSource {
    /// Remote search service.
    Http { base_url: String },
    /// Text files indexed in memory.
    KnowledgeDir(PathBuf),
    /// No knowledge base; every search returns nothing.
    Empty,
}

/// Tunables shared by the pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub call_timeout: Duration,
    pub search_limit: usize,
    pub context_max_tokens: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            search_limit: DEFAULT_SEARCH_LIMIT,
            context_max_tokens: DEFAULT_CONTEXT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub pipeline: PipelineSettings,
    pub retriever: RetrieverSource,
    pub database_url: Option<String>,
    pub port: u16,
}

impl AgentConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AgentConfig::from_env`] but over an arbitrary lookup,
    /// which keeps tests away from process-global state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let gemini_api_key = get("GEMINI_API_KEY")
            .filter(|k| k != "your_gemini_api_key_here")
            .ok_or_else(|| {
                AgentError::Configuration(
                    "GEMINI_API_KEY is not set; see .env.example".to_string(),
                )
            })?;

        let gemini_model = get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let call_timeout_secs = parse_or(get("AGENT_CALL_TIMEOUT_SECS"), "AGENT_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?;
        if call_timeout_secs == 0 {
            return Err(AgentError::Configuration(
                "AGENT_CALL_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let pipeline = PipelineSettings {
            call_timeout: Duration::from_secs(call_timeout_secs),
            search_limit: parse_or(get("RETRIEVER_SEARCH_LIMIT"), "RETRIEVER_SEARCH_LIMIT", DEFAULT_SEARCH_LIMIT)?,
            context_max_tokens: parse_or(
                get("RETRIEVER_CONTEXT_MAX_TOKENS"),
                "RETRIEVER_CONTEXT_MAX_TOKENS",
                DEFAULT_CONTEXT_MAX_TOKENS,
            )?,
        };

        let retriever = if let Some(base_url) = get("RETRIEVER_BASE_URL") {
            RetrieverSource::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
            }
        } else if let Some(dir) = get("KNOWLEDGE_DIR") {
            RetrieverSource::KnowledgeDir(PathBuf::from(dir))
        } else {
            RetrieverSource::Empty
        };

        let database_url = get("POSTGRES_URL").or_else(|| get("DATABASE_URL"));

        let port = parse_or(
            get("PORT").or_else(|| get("API_PORT")),
            "PORT",
            DEFAULT_PORT,
        )?;

        Ok(Self {
            gemini_api_key,
            gemini_model,
            pipeline,
            retriever,
            database_url,
            port,
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value.parse().map_err(|_| {
            AgentError::Configuration(format!("{} has an invalid value: {}", key, value))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let err = AgentConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_placeholder_key_rejected() {
        let result = AgentConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "your_gemini_api_key_here")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert_eq!(config.gemini_model, DEFAULT_MODEL);
        assert_eq!(config.pipeline.search_limit, 5);
        assert_eq!(config.pipeline.call_timeout, Duration::from_secs(30));
        assert_eq!(config.retriever, RetrieverSource::Empty);
        assert_eq!(config.port, 8080);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_retriever_selection_prefers_http() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("RETRIEVER_BASE_URL", "http://search.local/"),
            ("KNOWLEDGE_DIR", "/tmp/docs"),
        ]))
        .unwrap();

        assert_eq!(
            config.retriever,
            RetrieverSource::Http {
                base_url: "http://search.local".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result = AgentConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("RETRIEVER_SEARCH_LIMIT", "many"),
        ]));
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }
}
