// src/llm/providers/gemini.rs
//! Google Generative Language API adapter (`generateContent`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::error::ProviderError;
use crate::llm::provider::{EnrichmentRequest, ProviderAdapter, RawResponse};
use crate::llm::providers::truncate_body;
use crate::llm::rotator::Credential;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiAdapter {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiAdapter {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Req<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

/// Concatenate the text parts of the first candidate.
pub(crate) fn parse_envelope(body: &str, fallback_model: &str) -> Result<RawResponse, ProviderError> {
    let resp: Resp =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(RawResponse {
        text,
        model: resp
            .model_version
            .unwrap_or_else(|| fallback_model.to_string()),
        tokens_used: resp
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or(0),
    })
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        credential: &Credential,
        request: &EnrichmentRequest,
    ) -> Result<RawResponse, ProviderError> {
        let user = request.user_prompt();
        let req = Req {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: request.system_prompt(),
                }],
            },
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: &user }],
            }],
            generation_config: GenerationConfig {
                temperature: request.params.temperature,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: request.params.max_tokens,
                response_mime_type: "application/json",
            },
        };

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", credential.secret())
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        parse_envelope(&body, &self.model)
    }
}
