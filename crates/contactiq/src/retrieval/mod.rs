//! Evidence retrieval boundary.
//!
//! The pipeline treats retrieval as opaque: it hands over the query and mode
//! and gets back numbered evidence chunks with their citation metadata.

pub mod http;

pub use http::HttpRetriever;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{AssistantMode, Citation};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    #[serde(default)]
    pub evidence_chunks: Vec<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl RetrievalResult {
    /// Successful search that found nothing. Also used when retrieval is skipped.
    pub fn empty_success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn has_evidence(&self) -> bool {
        self.success && !self.evidence_chunks.is_empty()
    }
}

#[async_trait]
pub trait EvidenceRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, mode: AssistantMode) -> anyhow::Result<RetrievalResult>;
}
