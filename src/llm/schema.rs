// src/llm/schema.rs
//! Schema normalizer and validator.
//!
//! Every provider's text answer is forced into one `EnrichmentResult` shape
//! here, and only here: the `valid` flag is private to this module, so no
//! other code path can build a result. A result is valid only if
//! - all three scores are > 0 (0 means "the model did not score this"),
//! - the category is a non-empty string,
//! - `key_facts`, `key_vocabulary` and `syllabus_tags` are present as lists,
//! - the summary is a non-empty string,
//! - the scores are not the known degraded placeholder (30/25/35).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::provider::RawResponse;
use crate::llm::rotator::ProviderFamily;

/// Scores a degraded upstream emits instead of a real analysis.
const PLACEHOLDER_SCORES: (u8, u8, u8) = (30, 25, 35);

const PREMIUM_MIN: u16 = 140;
const QUALITY_MIN: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Preliminary,
    Quality,
    Premium,
}

impl ProcessingStatus {
    /// Tier from the combined factual + analytical score.
    pub fn from_scores(factual: u8, analytical: u8) -> Self {
        let combined = factual as u16 + analytical as u16;
        if combined >= PREMIUM_MIN {
            ProcessingStatus::Premium
        } else if combined >= QUALITY_MIN {
            ProcessingStatus::Quality
        } else {
            ProcessingStatus::Preliminary
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExamAngles {
    pub prelims_facts: Vec<String>,
    pub mains_angles: Vec<String>,
    pub essay_themes: Vec<String>,
}

/// Who answered and at what cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub family: ProviderFamily,
    pub model: String,
    pub credential_ordinal: usize,
    pub latency_ms: u64,
    pub tokens_used: u64,
    pub estimated_cost_usd: f64,
}

/// The one output record of the core. Field layout is identical whichever
/// family answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentResult {
    pub factual_score: u8,
    pub analytical_score: u8,
    pub upsc_relevance: u8,
    pub category: String,
    pub key_facts: Vec<String>,
    pub key_vocabulary: Vec<String>,
    pub syllabus_tags: Vec<String>,
    pub exam_angles: ExamAngles,
    pub revision_priority: RevisionPriority,
    pub processing_status: ProcessingStatus,
    pub summary: String,
    pub provenance: Provenance,
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<String>,
}

impl EnrichmentResult {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Reasons the result was rejected; empty when valid.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }
}

/// Map a raw provider answer onto `EnrichmentResult` and validate it.
pub fn normalize(raw: &RawResponse, provenance: Provenance) -> EnrichmentResult {
    let mut issues = Vec::new();
    let empty = Map::new();

    let obj = match extract_json_object(&raw.text) {
        Some(Value::Object(map)) => map,
        _ => {
            issues.push("payload is not a JSON object".to_string());
            empty
        }
    };

    let factual_score = score(&obj, &["factual_score", "factual"], &mut issues);
    let analytical_score = score(&obj, &["analytical_score", "analytical"], &mut issues);
    let upsc_relevance = score(
        &obj,
        &["upsc_relevance", "relevance", "relevance_score"],
        &mut issues,
    );

    let category = text(&obj, &["category"])
        .map(|c| normalize_category(&c))
        .unwrap_or_default();
    if category.is_empty() {
        issues.push("category empty".to_string());
    }

    let key_facts = required_list(&obj, &["key_facts", "facts"], &mut issues);
    let key_vocabulary = required_list(&obj, &["key_vocabulary", "vocabulary"], &mut issues);
    let syllabus_tags = required_list(&obj, &["syllabus_tags", "tags"], &mut issues);

    let exam_angles = match field(&obj, &["exam_angles"]) {
        Some(Value::Object(angles)) => ExamAngles {
            prelims_facts: list(angles.get("prelims_facts")).unwrap_or_default(),
            mains_angles: list(angles.get("mains_angles")).unwrap_or_default(),
            essay_themes: list(angles.get("essay_themes")).unwrap_or_default(),
        },
        _ => ExamAngles::default(),
    };

    let revision_priority = match text(&obj, &["revision_priority", "priority"])
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("high") => RevisionPriority::High,
        Some("medium") => RevisionPriority::Medium,
        _ => RevisionPriority::Low,
    };

    let summary = text(&obj, &["summary", "brief_summary"]).unwrap_or_default();
    if summary.is_empty() {
        issues.push("summary empty".to_string());
    }

    if (factual_score, analytical_score, upsc_relevance) == PLACEHOLDER_SCORES {
        issues.push("placeholder scores 30/25/35".to_string());
    }

    EnrichmentResult {
        factual_score,
        analytical_score,
        upsc_relevance,
        category,
        key_facts,
        key_vocabulary,
        syllabus_tags,
        exam_angles,
        revision_priority,
        processing_status: ProcessingStatus::from_scores(factual_score, analytical_score),
        summary,
        provenance,
        valid: issues.is_empty(),
        issues,
    }
}

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("fence regex"));

/// Find the JSON object in a model answer: bare, fenced, or wrapped in prose.
fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    if let Some(inner) = FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.as_str()) {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

/// Score in 0..=100; numbers given as strings or floats are accepted.
fn score(obj: &Map<String, Value>, names: &[&str], issues: &mut Vec<String>) -> u8 {
    let raw = match field(obj, names) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let value = match raw {
        Some(v) if v.is_finite() => v.round().clamp(0.0, 100.0) as u8,
        _ => {
            issues.push(format!("{} missing", names[0]));
            return 0;
        }
    };
    if value == 0 {
        issues.push(format!("{} must be > 0", names[0]));
    }
    value
}

fn text(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(obj, names) {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn list(value: Option<&Value>) -> Option<Vec<String>> {
    let Value::Array(items) = value? else {
        return None;
    };
    Some(
        items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Present and a list; may be empty.
fn required_list(
    obj: &Map<String, Value>,
    names: &[&str],
    issues: &mut Vec<String>,
) -> Vec<String> {
    match list(field(obj, names)) {
        Some(v) => v,
        None => {
            issues.push(format!("{} missing or not a list", names[0]));
            Vec::new()
        }
    }
}

fn normalize_category(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '&')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
