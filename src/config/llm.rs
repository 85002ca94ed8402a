// src/config/llm.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::health::{
    default_disable_patterns, DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD,
};
use crate::llm::providers::{
    GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL, GROQ_CHAT_URL, GROQ_DEFAULT_MODEL,
};
use crate::llm::{HealthPolicy, OrchestratorSettings, TaskKind};
use crate::pipeline::prefilter::{
    default_keywords, RelevancePrefilter, DEFAULT_MAX_CONTENT_CHARS, DEFAULT_RELEVANCE_THRESHOLD,
};
use crate::pipeline::{PipelineSettings, DEFAULT_CONCURRENCY};

const ENV_PATH: &str = "LLM_CONFIG_PATH";
/// Numbered variables probed after the bare prefix: PREFIX_1 … PREFIX_50.
pub const MAX_NUMBERED_KEYS: usize = 50;
/// Cooldowns beyond a month are treated as a month.
const MAX_COOLDOWN_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub disable_patterns: Vec<String>,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS as u64,
            disable_patterns: default_disable_patterns(),
        }
    }
}

impl HealthSection {
    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: self.failure_threshold.max(1),
            cooldown: chrono::Duration::seconds(self.cooldown_secs.min(MAX_COOLDOWN_SECS) as i64),
            disable_patterns: self.disable_patterns.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub request_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub max_attempts_per_family: Option<usize>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            retry_delay_ms: 1000,
            max_attempts_per_family: None,
        }
    }
}

impl OrchestratorSection {
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_attempts_per_family: self.max_attempts_per_family,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub concurrency: usize,
    pub relevance_threshold: f32,
    pub max_content_chars: usize,
    pub keywords: Vec<String>,
    pub task: TaskKind,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            keywords: default_keywords(),
            task: TaskKind::RelevanceAnalysis,
        }
    }
}

impl PipelineSection {
    pub fn prefilter(&self) -> RelevancePrefilter {
        RelevancePrefilter::new(self.relevance_threshold, self.keywords.clone())
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            concurrency: self.concurrency.max(1),
            max_content_chars: self.max_content_chars.max(1),
            task: self.task,
            ..PipelineSettings::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    #[serde(alias = "openai")]
    OpenaiCompatible,
    Gemini,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub name: String,
    pub kind: FamilyKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Prefix of the env vars holding this family's keys.
    #[serde(default)]
    pub keys_env: Option<String>,
    /// Literal keys; mostly for local setups and tests.
    #[serde(default, skip_serializing)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub cost_per_million_tokens: f64,
}

impl FamilyConfig {
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.kind) {
            (Some(u), _) if !u.trim().is_empty() => u.trim(),
            (_, FamilyKind::OpenaiCompatible) => GROQ_CHAT_URL,
            (_, FamilyKind::Gemini) => GEMINI_BASE_URL,
        }
    }

    pub fn model(&self) -> &str {
        match (&self.model, self.kind) {
            (Some(m), _) if !m.trim().is_empty() => m.trim(),
            (_, FamilyKind::OpenaiCompatible) => GROQ_DEFAULT_MODEL,
            (_, FamilyKind::Gemini) => GEMINI_DEFAULT_MODEL,
        }
    }

    /// Literal keys first, then whatever `keys_env` yields; trimmed, blanks
    /// and repeats dropped, order kept.
    pub fn resolve_keys(&self) -> Vec<String> {
        let from_env = self
            .keys_env
            .as_deref()
            .map(collect_env_keys)
            .unwrap_or_default();
        dedupe_keys(self.keys.iter().cloned().chain(from_env))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub health: HealthSection,
    pub orchestrator: OrchestratorSection,
    pub pipeline: PipelineSection,
    /// Fallback priority is the order of this list.
    pub families: Vec<FamilyConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            health: HealthSection::default(),
            orchestrator: OrchestratorSection::default(),
            pipeline: PipelineSection::default(),
            families: default_families(),
        }
    }
}

pub fn default_families() -> Vec<FamilyConfig> {
    vec![
        FamilyConfig {
            name: "groq".into(),
            kind: FamilyKind::OpenaiCompatible,
            base_url: Some(GROQ_CHAT_URL.into()),
            model: Some(GROQ_DEFAULT_MODEL.into()),
            keys_env: Some("GROQ_API_KEY".into()),
            keys: Vec::new(),
            cost_per_million_tokens: 0.0,
        },
        FamilyConfig {
            name: "gemini".into(),
            kind: FamilyKind::Gemini,
            base_url: Some(GEMINI_BASE_URL.into()),
            model: Some(GEMINI_DEFAULT_MODEL.into()),
            keys_env: Some("GEMINI_API_KEY".into()),
            keys: Vec::new(),
            cost_per_million_tokens: 0.0,
        },
    ]
}

impl LlmConfig {
    /// Load from an explicit path. TOML or JSON, chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading llm config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&content, &ext).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $LLM_CONFIG_PATH
    /// 2) config/llm.toml
    /// 3) config/llm.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/llm.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/llm.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        let cfg: LlmConfig = match hint_ext {
            "toml" => toml::from_str(s)?,
            "json" => serde_json::from_str(s)?,
            _ => match toml::from_str(s) {
                Ok(c) => c,
                Err(_) => serde_json::from_str(s)
                    .map_err(|_| anyhow!("unsupported llm config format"))?,
            },
        };
        Ok(cfg.sanitized())
    }

    fn sanitized(mut self) -> Self {
        for f in &mut self.families {
            f.name = f.name.trim().to_lowercase();
            if !f.cost_per_million_tokens.is_finite() || f.cost_per_million_tokens < 0.0 {
                f.cost_per_million_tokens = 0.0;
            }
        }
        self.families.retain(|f| !f.name.is_empty());
        if !self.pipeline.relevance_threshold.is_finite() {
            self.pipeline.relevance_threshold = DEFAULT_RELEVANCE_THRESHOLD;
        }
        self
    }
}

/// Read `PREFIX`, then `PREFIX_1` … `PREFIX_50`.
pub fn collect_env_keys(prefix: &str) -> Vec<String> {
    let names = std::iter::once(prefix.to_string())
        .chain((1..=MAX_NUMBERED_KEYS).map(|i| format!("{prefix}_{i}")));
    dedupe_keys(names.filter_map(|n| std::env::var(n).ok()))
}

fn dedupe_keys(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for k in items {
        let k = k.trim();
        if !k.is_empty() && !out.iter().any(|e| e == k) {
            out.push(k.to_string());
        }
    }
    out
}
