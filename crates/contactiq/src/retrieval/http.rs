use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{EvidenceRetriever, RetrievalResult};
use crate::types::AssistantMode;

/// Retriever backed by a JSON-over-HTTP search service.
///
/// POSTs `{"query", "mode"}` and expects a [`RetrievalResult`] body.
pub struct HttpRetriever {
    client: Client,
    url: String,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(request_timeout)
            .build()
            .context("failed to build retriever HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EvidenceRetriever for HttpRetriever {
    async fn retrieve(&self, query: &str, mode: AssistantMode) -> Result<RetrievalResult> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "mode": mode.as_str() }))
            .send()
            .await
            .map_err(|e| anyhow!("Retriever request to {} failed: {}", self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Ok(RetrievalResult::failed(format!(
                "retriever returned HTTP {}: {}",
                status, preview
            )));
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read retriever body from {}", self.url))?;
        let result: RetrievalResult = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse retriever JSON ({}). Body: {}", e, preview)
        })?;

        tracing::debug!(
            chunks = result.evidence_chunks.len(),
            citations = result.citations.len(),
            "Evidence retrieved"
        );
        Ok(result)
    }
}
