//! HTTP-backed retriever calling an external search service
//!
//! POST `{base_url}/search` with `{ "query": ..., "limit": ... }`. The
//! service may answer with a bare array or `{ "results": [...] }`; each
//! hit carries `text` (or `content`) and an optional `score`.

use super::Retriever;
use crate::error::AgentError;
use crate::models::Snippet;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct HttpRetriever {
    client: Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchPayload {
    Hits(Vec<Hit>),
    Wrapped { results: Vec<Hit> },
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(alias = "content")]
    text: String,
    #[serde(default)]
    score: Option<f32>,
}

fn into_snippets(payload: SearchPayload, limit: usize) -> Vec<Snippet> {
    let hits = match payload {
        SearchPayload::Hits(hits) => hits,
        SearchPayload::Wrapped { results } => results,
    };

    hits.into_iter()
        .filter(|h| !h.text.trim().is_empty())
        .take(limit)
        .map(|h| Snippet {
            text: h.text,
            score: h.score,
        })
        .collect()
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(|e| AgentError::RetrievalFailure(format!("search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RetrievalFailure(format!(
                "search service returned {}: {}",
                status, body
            )));
        }

        let payload: SearchPayload = response
            .json()
            .await
            .map_err(|e| AgentError::RetrievalFailure(format!("invalid search response: {}", e)))?;

        let snippets = into_snippets(payload, limit);
        debug!(query = %query, results = snippets.len(), "Remote search completed");
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shapes() {
        let bare: SearchPayload =
            serde_json::from_str(r#"[{"text":"a","score":0.9},{"content":"b"}]"#).unwrap();
        let snippets = into_snippets(bare, 5);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].score, Some(0.9));
        assert_eq!(snippets[1].text, "b");

        let wrapped: SearchPayload =
            serde_json::from_str(r#"{"results":[{"text":"a"},{"text":"  "},{"text":"c"}]}"#).unwrap();
        let snippets = into_snippets(wrapped, 1);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].text, "a");
    }
}
