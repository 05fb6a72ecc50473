//! Retriever trait and implementations
//!
//! A retriever maps a query to ranked snippets. An empty result is a valid
//! answer meaning "no matches", not an error.

use crate::config::RetrieverSource;
use crate::models::Snippet;
use crate::text::content_terms;
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub mod http;
pub use http::HttpRetriever;

/// Rendered into the generation context when nothing was found.
pub const NO_RESULTS_CONTEXT: &str = "No relevant information found in the knowledge base.";

/// Rough characters-per-token estimate for the context budget.
const CHARS_PER_TOKEN: usize = 4;

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>>;
}

/// Build the retriever a deployment is configured for.
pub fn from_source(source: &RetrieverSource, timeout: Duration) -> Result<Arc<dyn Retriever>> {
    let retriever: Arc<dyn Retriever> = match source {
        RetrieverSource::Http { base_url } => {
            info!(base_url = %base_url, "Retriever: http");
            Arc::new(HttpRetriever::new(base_url, timeout)?)
        }
        RetrieverSource::KnowledgeDir(dir) => Arc::new(KeywordRetriever::from_dir(dir)?),
        RetrieverSource::Empty => {
            info!("Retriever: none configured, every search is empty");
            Arc::new(StaticRetriever::empty())
        }
    };
    Ok(retriever)
}

/// The snippets that fit the character budget derived from `max_tokens`,
/// paired with their 1-based source number. A snippet that would overflow
/// the budget is skipped. When not even the first fits, it is cut down to
/// the budget so a non-empty result never renders as "nothing found".
pub fn within_budget(snippets: &[Snippet], max_tokens: usize) -> Vec<(usize, String)> {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut kept = Vec::new();
    let mut used = 0usize;

    for (idx, snippet) in snippets.iter().enumerate() {
        let text = snippet.text.trim();
        let len = text.chars().count();
        if used + len <= max_chars {
            kept.push((idx + 1, text.to_string()));
            used += len;
        } else {
            debug!(source = idx + 1, chars = len, "Snippet skipped, context budget exceeded");
        }
    }

    if kept.is_empty() {
        if let Some(first) = snippets.first() {
            let cut: String = first.text.trim().chars().take(max_chars).collect();
            kept.push((1, cut));
        }
    }

    kept
}

/// Snippet text the generator actually sees, joined for grounding checks.
pub fn grounding_text(snippets: &[Snippet], max_tokens: usize) -> String {
    within_budget(snippets, max_tokens)
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render snippets as numbered sources within the context budget.
pub fn format_context(snippets: &[Snippet], max_tokens: usize) -> String {
    if snippets.is_empty() {
        return NO_RESULTS_CONTEXT.to_string();
    }

    let mut parts = vec!["Relevant information from knowledge base:".to_string()];
    parts.extend(
        within_budget(snippets, max_tokens)
            .into_iter()
            .map(|(number, text)| format!("[Source {}]\n{}", number, text)),
    );
    parts.join("\n\n")
}

//
// ================= Keyword Retriever =================
//

#[derive(Debug, Clone)]
struct Chunk {
    source: String,
    text: String,
    terms: BTreeSet<String>,
}

/// In-memory retriever ranking paragraph chunks by query-term overlap.
#[derive(Debug, Clone, Default)]
pub struct KeywordRetriever {
    chunks: Vec<Chunk>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `(source, body)` pairs; bodies are split on blank lines.
    pub fn from_documents<I, S, T>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let mut retriever = Self::new();
        for (source, body) in documents {
            retriever.add_document(source, body.as_ref());
        }
        retriever
    }

    /// Index every `.txt` / `.md` file directly under `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut retriever = Self::new();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let body = std::fs::read_to_string(&path)?;
            let source = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("document")
                .to_string();
            retriever.add_document(source, &body);
        }

        info!(
            dir = %dir.display(),
            chunks = retriever.len(),
            "Knowledge directory indexed"
        );
        Ok(retriever)
    }

    pub fn add_document(&mut self, source: impl Into<String>, body: &str) {
        let source = source.into();
        for paragraph in body.split("\n\n") {
            let text = paragraph.trim();
            if text.is_empty() {
                continue;
            }
            self.chunks.push(Chunk {
                source: source.clone(),
                text: text.to_string(),
                terms: content_terms(text),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>> {
        let query_terms = content_terms(query);
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &Chunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let hits = query_terms.intersection(&chunk.terms).count();
                (hits > 0).then(|| (hits as f32 / query_terms.len() as f32, chunk))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let results: Vec<Snippet> = scored
            .into_iter()
            .take(limit)
            .map(|(score, chunk)| Snippet::scored(format!("{} ({})", chunk.text, chunk.source), score))
            .collect();

        debug!(query = %query, results = results.len(), "Keyword search completed");
        Ok(results)
    }
}

//
// ================= Static Retriever =================
//

/// Returns a fixed snippet list (or a fixed failure) and records every
/// query it receives.
#[derive(Default)]
pub struct StaticRetriever {
    snippets: Vec<Snippet>,
    failure: Option<String>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.queries().len()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = &self.failure {
            return Err(crate::error::AgentError::RetrievalFailure(reason.clone()));
        }

        Ok(self.snippets.iter().take(limit).cloned().collect())
    }
}
