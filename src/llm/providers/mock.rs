// src/llm/providers/mock.rs
//! Deterministic adapter for local runs (`AI_TEST_MODE=mock`) and tests.

use async_trait::async_trait;

use crate::llm::error::ProviderError;
use crate::llm::provider::{EnrichmentRequest, ProviderAdapter, RawResponse};
use crate::llm::rotator::Credential;

#[derive(Debug, Clone)]
pub struct MockAdapter {
    fixed: String,
}

impl MockAdapter {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new(
            serde_json::json!({
                "factual_score": 42,
                "analytical_score": 38,
                "upsc_relevance": 55,
                "category": "current_affairs",
                "key_facts": ["Mock analysis (AI_TEST_MODE=mock)"],
                "key_vocabulary": [],
                "syllabus_tags": ["GS2 - Governance"],
                "exam_angles": {"prelims_facts": [], "mains_angles": [], "essay_themes": []},
                "revision_priority": "medium",
                "summary": "Neutral summary (mock)."
            })
            .to_string(),
        )
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        _credential: &Credential,
        request: &EnrichmentRequest,
    ) -> Result<RawResponse, ProviderError> {
        Ok(RawResponse {
            text: self.fixed.clone(),
            model: "mock".to_string(),
            tokens_used: (request.content.len() / 4) as u64,
        })
    }
}
