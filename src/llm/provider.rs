// src/llm/provider.rs
//! Provider abstraction: the request the core builds and the uniform call
//! interface every backend family implements.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::error::ProviderError;
use crate::llm::rotator::{Credential, ProviderFamily};

/// The closed set of jobs the surrounding pipeline asks the core for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ContentExtraction,
    #[serde(alias = "upsc_analysis")]
    RelevanceAnalysis,
    Categorization,
    Summarization,
    QuestionGeneration,
    AnswerEvaluation,
    Deduplication,
}

impl TaskKind {
    pub const ALL: [TaskKind; 7] = [
        TaskKind::ContentExtraction,
        TaskKind::RelevanceAnalysis,
        TaskKind::Categorization,
        TaskKind::Summarization,
        TaskKind::QuestionGeneration,
        TaskKind::AnswerEvaluation,
        TaskKind::Deduplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ContentExtraction => "content_extraction",
            TaskKind::RelevanceAnalysis => "relevance_analysis",
            TaskKind::Categorization => "categorization",
            TaskKind::Summarization => "summarization",
            TaskKind::QuestionGeneration => "question_generation",
            TaskKind::AnswerEvaluation => "answer_evaluation",
            TaskKind::Deduplication => "deduplication",
        }
    }

    /// What the model should focus on. The output record is the same for
    /// every task; only the emphasis differs.
    fn focus(&self) -> &'static str {
        match self {
            TaskKind::ContentExtraction => {
                "Extract the distinct news items and the concrete facts they contain \
                 (dates, numbers, names, policies). Put each fact in key_facts."
            }
            TaskKind::RelevanceAnalysis => {
                "Judge how closely this content aligns with the UPSC Civil Services syllabus \
                 (GS1 history/geography/culture, GS2 polity/governance, GS3 economy/environment/\
                 technology/security, GS4 ethics). Score conservatively."
            }
            TaskKind::Categorization => {
                "Choose the single best category and map the content to GS paper topics \
                 in syllabus_tags."
            }
            TaskKind::Summarization => {
                "Write a tight two-sentence summary focused on exam utility and list the \
                 key points as key_facts."
            }
            TaskKind::QuestionGeneration => {
                "Derive prelims-style facts and mains-style question angles; put them in \
                 exam_angles."
            }
            TaskKind::AnswerEvaluation => {
                "Evaluate the content as a mains answer: what facts it uses, what angles it \
                 covers, and what is missing. Use the summary for the verdict."
            }
            TaskKind::Deduplication => {
                "Identify the core event of this content so near-duplicates can be merged; \
                 the summary must name the event plainly."
            }
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const MAX_TOKENS_LIMIT: u32 = 8192;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Generation knobs passed through to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub custom_instructions: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            custom_instructions: None,
        }
    }
}

impl GenerationParams {
    /// Clamp to the ranges providers accept: 1..=8192 tokens, 0.0..=1.0 temperature.
    pub fn sanitized(mut self) -> Self {
        self.max_tokens = self.max_tokens.clamp(1, MAX_TOKENS_LIMIT);
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 1.0)
        } else {
            DEFAULT_TEMPERATURE
        };
        self.custom_instructions = self
            .custom_instructions
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }
}

/// Input to `enrich`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub content: String,
    pub task: TaskKind,
    #[serde(default)]
    pub params: GenerationParams,
}

impl EnrichmentRequest {
    pub fn new(content: impl Into<String>, task: TaskKind, params: GenerationParams) -> Self {
        Self {
            content: content.into(),
            task,
            params: params.sanitized(),
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    pub fn user_prompt(&self) -> String {
        let mut prompt = format!(
            "TASK: {task}\n{focus}\n\nCONTENT:\n{content}\n\n{schema}",
            task = self.task,
            focus = self.task.focus(),
            content = self.content,
            schema = OUTPUT_CONTRACT,
        );
        if let Some(extra) = &self.params.custom_instructions {
            prompt.push_str("\n\nADDITIONAL INSTRUCTIONS:\n");
            prompt.push_str(extra);
        }
        prompt
    }
}

const SYSTEM_PROMPT: &str = "You are an expert UPSC Civil Services content analyst. \
Answer with a single JSON object that follows the requested schema exactly. No prose, no markdown.";

const OUTPUT_CONTRACT: &str = r#"Return ONLY this JSON object:
{
  "factual_score": <integer 1-100, concrete facts for prelims>,
  "analytical_score": <integer 1-100, depth of policy analysis for mains>,
  "upsc_relevance": <integer 1-100, syllabus alignment>,
  "category": "current_affairs|polity_governance|economy_development|environment_ecology|history_culture|science_technology",
  "key_facts": ["..."],
  "key_vocabulary": ["..."],
  "syllabus_tags": ["GS2 - Governance", "..."],
  "exam_angles": {"prelims_facts": ["..."], "mains_angles": ["..."], "essay_themes": ["..."]},
  "revision_priority": "high|medium|low",
  "processing_status": "preliminary|quality|premium",
  "summary": "two sentences"
}
Scoring is strict: most articles score 20-40, only exceptional content exceeds 60."#;

/// What an adapter hands back: the model's text plus accounting data. The
/// text is not trusted; the schema normalizer decides what it is worth.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub text: String,
    pub model: String,
    pub tokens_used: u64,
}

/// One backend family's "send completion request" function.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Model identifier reported in provenance.
    fn model(&self) -> &str;

    /// Issue one completion with the given key. Must not retry internally;
    /// rotation and retry belong to the orchestrator.
    async fn complete(
        &self,
        credential: &Credential,
        request: &EnrichmentRequest,
    ) -> Result<RawResponse, ProviderError>;
}

/// Registration data for one family.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyPricing {
    pub family: ProviderFamily,
    pub cost_per_million_tokens: f64,
}

impl FamilyPricing {
    pub fn estimate(&self, tokens: u64) -> f64 {
        tokens as f64 * self.cost_per_million_tokens / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_clamped() {
        let p = GenerationParams {
            max_tokens: 0,
            temperature: 3.5,
            custom_instructions: Some("   ".into()),
        }
        .sanitized();
        assert_eq!(p.max_tokens, 1);
        assert_eq!(p.temperature, 1.0);
        assert!(p.custom_instructions.is_none());

        let p = GenerationParams {
            max_tokens: 100_000,
            temperature: f32::NAN,
            custom_instructions: None,
        }
        .sanitized();
        assert_eq!(p.max_tokens, MAX_TOKENS_LIMIT);
        assert_eq!(p.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn prompt_carries_task_content_and_extra_instructions() {
        let req = EnrichmentRequest::new(
            "Budget allocation increased for rural health scheme",
            TaskKind::RelevanceAnalysis,
            GenerationParams {
                custom_instructions: Some("Focus on GS2.".into()),
                ..Default::default()
            },
        );
        let prompt = req.user_prompt();
        assert!(prompt.starts_with("TASK: relevance_analysis"));
        assert!(prompt.contains("rural health scheme"));
        assert!(prompt.contains("\"upsc_relevance\""));
        assert!(prompt.ends_with("Focus on GS2."));
    }

    #[test]
    fn task_kind_serde_accepts_legacy_name() {
        let t: TaskKind = serde_json::from_str("\"upsc_analysis\"").unwrap();
        assert_eq!(t, TaskKind::RelevanceAnalysis);
        for t in TaskKind::ALL {
            let s = serde_json::to_string(&t).unwrap();
            assert_eq!(s, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn pricing_estimate() {
        let p = FamilyPricing {
            family: ProviderFamily::new("groq"),
            cost_per_million_tokens: 0.6,
        };
        assert!((p.estimate(2_000) - 0.0012).abs() < 1e-12);
    }
}
