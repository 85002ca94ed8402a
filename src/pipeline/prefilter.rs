// src/pipeline/prefilter.rs
//! Cheap, synchronous steps that run before any LLM call: content cleanup,
//! batch de-duplication and the relevance pre-filter.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::pipeline::ArticleRecord;

pub const DEFAULT_RELEVANCE_THRESHOLD: f32 = 40.0;
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 6000;
/// Normalized Levenshtein similarity at which two titles count as the same story.
pub const TITLE_SIMILARITY: f64 = 0.95;

const HEURISTIC_BASE: f32 = 30.0;
const HEURISTIC_PER_KEYWORD: f32 = 8.0;
const HEURISTIC_CAP: f32 = 85.0;

pub fn default_keywords() -> Vec<String> {
    [
        "upsc",
        "civil service",
        "government",
        "policy",
        "administration",
        "current affairs",
        "india",
        "national",
        "international",
        "economy",
        "parliament",
        "ministry",
        "scheme",
        "reform",
        "budget",
        "constitution",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Decode entities, strip tags, straighten quotes, collapse whitespace and cap
/// the length so prompts stay bounded.
pub fn prepare_content(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();
    out = RE_TAGS.replace_all(&out, " ").to_string();
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    out = RE_WS.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// Where a pre-filter score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Upstream,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrefilterVerdict {
    pub score: f32,
    pub source: ScoreSource,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct RelevancePrefilter {
    threshold: f32,
    keywords: Vec<String>,
}

impl Default for RelevancePrefilter {
    fn default() -> Self {
        Self::new(DEFAULT_RELEVANCE_THRESHOLD, default_keywords())
    }
}

impl RelevancePrefilter {
    pub fn new(threshold: f32, keywords: Vec<String>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            threshold: threshold.clamp(0.0, 100.0),
            keywords,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score from matched keywords: 30 + 8 per keyword, capped at 85.
    pub fn keyword_score(&self, text: &str) -> f32 {
        let lower = text.to_lowercase();
        let matches = self
            .keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .count();
        (HEURISTIC_BASE + HEURISTIC_PER_KEYWORD * matches as f32).min(HEURISTIC_CAP)
    }

    /// Upstream score when one is attached, keyword heuristic otherwise.
    /// Articles without content never pass.
    pub fn evaluate(&self, article: &ArticleRecord) -> PrefilterVerdict {
        let (score, source) = match article.relevance_score {
            Some(s) if s.is_finite() => (s, ScoreSource::Upstream),
            _ => {
                let text = format!("{} {}", article.title, article.content);
                (self.keyword_score(&text), ScoreSource::Heuristic)
            }
        };
        let passed = !article.content.trim().is_empty() && score >= self.threshold;
        PrefilterVerdict {
            score,
            source,
            passed,
        }
    }
}

/// Drop repeated stories: same URL (case-insensitive) or near-identical title.
/// Keeps the first occurrence; returns `(survivors, duplicates)`.
pub fn dedupe(articles: Vec<ArticleRecord>) -> (Vec<ArticleRecord>, Vec<ArticleRecord>) {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut kept_titles: Vec<String> = Vec::new();
    let mut keep = Vec::with_capacity(articles.len());
    let mut dropped = Vec::new();

    for article in articles {
        let url_key = article
            .url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_lowercase())
            .filter(|u| !u.is_empty());
        if let Some(u) = &url_key {
            if seen_urls.contains(u) {
                dropped.push(article);
                continue;
            }
        }

        let title_key = article.title.trim().to_lowercase();
        if !title_key.is_empty()
            && kept_titles
                .iter()
                .any(|t| strsim::normalized_levenshtein(t, &title_key) >= TITLE_SIMILARITY)
        {
            dropped.push(article);
            continue;
        }

        if let Some(u) = url_key {
            seen_urls.insert(u);
        }
        if !title_key.is_empty() {
            kept_titles.push(title_key);
        }
        keep.push(article);
    }

    (keep, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(title: &str, url: Option<&str>, content: &str) -> ArticleRecord {
        let mut a = ArticleRecord::new(title, content);
        a.url = url.map(str::to_string);
        a
    }

    #[test]
    fn prepare_strips_markup_and_caps_length() {
        let s = "  <p>Budget&nbsp;&nbsp;2025</p>\n\n<b>“raised”</b>  ";
        assert_eq!(prepare_content(s, 6000), r#"Budget 2025 "raised""#);
        assert_eq!(prepare_content("abcdef", 3), "abc");
    }

    #[test]
    fn keyword_heuristic_matches_documented_curve() {
        let f = RelevancePrefilter::default();
        assert_eq!(f.keyword_score("cricket score"), 30.0);
        assert_eq!(
            f.keyword_score("Budget allocation increased for rural health scheme"),
            46.0
        );
        let many = default_keywords().join(" ");
        assert_eq!(f.keyword_score(&many), 85.0);
    }

    #[test]
    fn upstream_score_wins_over_heuristic() {
        let f = RelevancePrefilter::new(55.0, default_keywords());
        let mut a = art("Cricket", None, "Match report");
        a.relevance_score = Some(70.0);
        let v = f.evaluate(&a);
        assert!(v.passed);
        assert_eq!(v.source, ScoreSource::Upstream);

        a.relevance_score = Some(54.9);
        assert!(!f.evaluate(&a).passed);
    }

    #[test]
    fn empty_content_never_passes() {
        let f = RelevancePrefilter::new(0.0, vec![]);
        let mut a = art("Parliament passes budget", None, "   ");
        a.relevance_score = Some(99.0);
        assert!(!f.evaluate(&a).passed);
    }

    #[test]
    fn dedupe_by_url_and_similar_title() {
        let arts = vec![
            art("RBI keeps repo rate unchanged", Some("https://x.in/a"), "c"),
            art("Different story", Some("HTTPS://X.IN/a/"), "c"),
            art("RBI keeps repo rate unchanged.", Some("https://y.in/b"), "c"),
            art("Monsoon session of Parliament begins", None, "c"),
        ];
        let (kept, dropped) = dedupe(arts);
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0].title, "Different story");
        let titles: Vec<_> = kept.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "RBI keeps repo rate unchanged",
                "Monsoon session of Parliament begins"
            ]
        );
    }
}
