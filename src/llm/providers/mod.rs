// src/llm/providers/mod.rs
//! Concrete provider adapters.

pub mod gemini;
pub mod mock;
pub mod openai_compat;

use std::time::Duration;

pub use gemini::{GeminiAdapter, GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL};
pub use mock::MockAdapter;
pub use openai_compat::{OpenAiCompatAdapter, GROQ_CHAT_URL, GROQ_DEFAULT_MODEL};

const USER_AGENT: &str = "upsc-news-enricher/0.1";

/// Shared HTTP client settings for all adapters. The orchestrator enforces
/// the per-call deadline; this only bounds connection setup.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .build()
}

/// Keep provider error bodies short enough for logs and health records.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX).collect();
    out.push('…');
    out
}
