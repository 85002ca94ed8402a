// src/llm/providers/openai_compat.rs
//! Chat Completions adapter. Groq, OpenRouter, DeepSeek and Cerebras all speak
//! this wire format; only base URL and model differ.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::error::ProviderError;
use crate::llm::provider::{EnrichmentRequest, ProviderAdapter, RawResponse};
use crate::llm::providers::truncate_body;
use crate::llm::rotator::Credential;

pub const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const GROQ_DEFAULT_MODEL: &str = "openai/gpt-oss-120b";

pub struct OpenAiCompatAdapter {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl OpenAiCompatAdapter {
    pub fn new(http: reqwest::Client, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// Pull the first choice's text and the token count out of a response body.
pub(crate) fn parse_envelope(body: &str, fallback_model: &str) -> Result<RawResponse, ProviderError> {
    let resp: Resp =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(RawResponse {
        text,
        model: resp.model.unwrap_or_else(|| fallback_model.to_string()),
        tokens_used: resp.usage.map(|u| u.total_tokens).unwrap_or(0),
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
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
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: request.system_prompt(),
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            top_p: 0.8,
            stream: false,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(credential.secret())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_choice_text_and_usage() {
        let body = r#"{
            "model": "openai/gpt-oss-120b",
            "choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let raw = parse_envelope(body, "fallback").unwrap();
        assert_eq!(raw.text, "{\"a\":1}");
        assert_eq!(raw.model, "openai/gpt-oss-120b");
        assert_eq!(raw.tokens_used, 15);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_envelope(r#"{"choices": []}"#, "m").unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
        let err = parse_envelope("<html>bad gateway</html>", "m").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn missing_model_and_usage_fall_back() {
        let raw = parse_envelope(
            r#"{"choices": [{"message": {"content": "x"}}]}"#,
            "llama-3.3-70b",
        )
        .unwrap();
        assert_eq!(raw.model, "llama-3.3-70b");
        assert_eq!(raw.tokens_used, 0);
    }
}
