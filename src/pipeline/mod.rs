// src/pipeline/mod.rs
//! Batch coordinator: pre-filter, enrich and classify a batch of articles.
//!
//! Articles are independent; up to `concurrency` of them are enriched at once.
//! Within one article the steps run strictly in order: clean content,
//! pre-filter, enrich, attach annotation. A batch counts as failed only when
//! nothing was accepted and at least one article reached enrichment.

pub mod prefilter;

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::llm::{EnrichmentResult, FallbackOrchestrator, GenerationParams, TaskKind};
use crate::pipeline::prefilter::{
    dedupe, prepare_content, RelevancePrefilter, DEFAULT_MAX_CONTENT_CHARS,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Rejection code for articles scored under the relevance threshold.
pub const REJECT_BELOW_THRESHOLD: &str = "below_relevance_threshold";
/// Rejection code for articles whose enrichment task panicked or was aborted.
pub const REJECT_TASK_ABORTED: &str = "task_aborted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    #[default]
    Pending,
    Accepted,
    RejectedPrefilter,
    RejectedEnrichment,
    Duplicate,
}

/// One article moving through the pipeline. Inputs come from the caller;
/// status, annotations and rejection are filled in here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub content: String,
    /// Upstream relevance score; the keyword heuristic is used when absent.
    #[serde(default)]
    pub relevance_score: Option<f32>,
    #[serde(default, skip_deserializing)]
    pub status: ArticleStatus,
    /// Keyed `"{family}_analysis"`.
    #[serde(default, skip_deserializing)]
    pub annotations: BTreeMap<String, EnrichmentResult>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

impl ArticleRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            source: None,
            content: content.into(),
            relevance_score: None,
            status: ArticleStatus::Pending,
            annotations: BTreeMap::new(),
            rejection: None,
        }
    }

    fn short_title(&self) -> String {
        self.title.chars().take(60).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub accepted: usize,
    pub rejected_prefilter: usize,
    pub rejected_enrichment: usize,
    pub duplicates: usize,
    /// Enrichment failures by reason code.
    pub failures: BTreeMap<String, usize>,
    pub articles: Vec<ArticleRecord>,
}

impl BatchReport {
    pub fn rejected(&self) -> usize {
        self.rejected_prefilter + self.rejected_enrichment
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no article accepted; {} rejected during enrichment", .report.rejected_enrichment)]
    NothingAccepted { report: Box<BatchReport> },
}

impl BatchError {
    pub fn report(&self) -> &BatchReport {
        match self {
            BatchError::NothingAccepted { report } => report,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub max_content_chars: usize,
    pub task: TaskKind,
    pub params: GenerationParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            task: TaskKind::RelevanceAnalysis,
            params: GenerationParams::default(),
        }
    }
}

struct Shared {
    orchestrator: Arc<FallbackOrchestrator>,
    settings: PipelineSettings,
}

pub struct PipelineCoordinator {
    shared: Arc<Shared>,
    prefilter: RelevancePrefilter,
}

impl PipelineCoordinator {
    pub fn new(
        orchestrator: Arc<FallbackOrchestrator>,
        prefilter: RelevancePrefilter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                settings,
            }),
            prefilter,
        }
    }

    pub fn orchestrator(&self) -> &Arc<FallbackOrchestrator> {
        &self.shared.orchestrator
    }

    pub fn prefilter(&self) -> &RelevancePrefilter {
        &self.prefilter
    }

    pub async fn run_batch(
        &self,
        articles: Vec<ArticleRecord>,
    ) -> Result<BatchReport, BatchError> {
        let mut report = BatchReport {
            total: articles.len(),
            ..BatchReport::default()
        };

        let (articles, duplicates) = dedupe(articles);
        report.duplicates = duplicates.len();

        let max_chars = self.shared.settings.max_content_chars;
        let permits = Arc::new(Semaphore::new(self.shared.settings.concurrency.max(1)));
        let mut set = JoinSet::new();
        let mut finished: Vec<(usize, ArticleRecord)> = Vec::with_capacity(articles.len());
        // Copies of spawned articles, returned as rejected if their task never finishes.
        let mut in_flight: BTreeMap<usize, ArticleRecord> = BTreeMap::new();

        for (idx, mut article) in articles.into_iter().enumerate() {
            article.content = prepare_content(&article.content, max_chars);
            let verdict = self.prefilter.evaluate(&article);
            if !verdict.passed {
                debug!(
                    title = %article.short_title(),
                    score = verdict.score,
                    threshold = self.prefilter.threshold(),
                    source = ?verdict.source,
                    "article below relevance threshold"
                );
                article.status = ArticleStatus::RejectedPrefilter;
                article.rejection = Some(REJECT_BELOW_THRESHOLD.to_string());
                finished.push((idx, article));
                continue;
            }

            in_flight.insert(idx, article.clone());
            let shared = self.shared.clone();
            let permits = permits.clone();
            set.spawn(async move {
                // The semaphore is never closed, so acquisition cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                (idx, shared.enrich_article(article).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => {
                    in_flight.remove(&done.0);
                    finished.push(done);
                }
                Err(e) => warn!(error = %e, "article task aborted"),
            }
        }
        for (idx, mut article) in in_flight {
            warn!(title = %article.short_title(), "article lost its enrichment task");
            article.status = ArticleStatus::RejectedEnrichment;
            article.rejection = Some(REJECT_TASK_ABORTED.to_string());
            finished.push((idx, article));
        }

        finished.sort_by_key(|(idx, _)| *idx);
        for (_, article) in finished {
            match article.status {
                ArticleStatus::Accepted => report.accepted += 1,
                ArticleStatus::RejectedPrefilter => report.rejected_prefilter += 1,
                ArticleStatus::RejectedEnrichment => {
                    report.rejected_enrichment += 1;
                    let code = article.rejection.clone().unwrap_or_default();
                    *report.failures.entry(code).or_default() += 1;
                }
                ArticleStatus::Pending | ArticleStatus::Duplicate => {}
            }
            report.articles.push(article);
        }
        for mut dup in duplicates {
            dup.status = ArticleStatus::Duplicate;
            report.articles.push(dup);
        }

        for (outcome, n) in [
            ("accepted", report.accepted),
            ("rejected_prefilter", report.rejected_prefilter),
            ("rejected_enrichment", report.rejected_enrichment),
            ("duplicate", report.duplicates),
        ] {
            if n > 0 {
                counter!("pipeline_articles_total", "outcome" => outcome).increment(n as u64);
            }
        }

        info!(
            total = report.total,
            accepted = report.accepted,
            rejected_prefilter = report.rejected_prefilter,
            rejected_enrichment = report.rejected_enrichment,
            duplicates = report.duplicates,
            "batch processed"
        );

        if report.accepted == 0 && report.rejected_enrichment > 0 {
            counter!("pipeline_batch_failures_total").increment(1);
            warn!(
                rejected_enrichment = report.rejected_enrichment,
                "batch failed: no article accepted"
            );
            return Err(BatchError::NothingAccepted {
                report: Box::new(report),
            });
        }
        Ok(report)
    }
}

impl Shared {
    async fn enrich_article(&self, mut article: ArticleRecord) -> ArticleRecord {
        let outcome = self
            .orchestrator
            .enrich(
                &article.content,
                self.settings.task,
                self.settings.params.clone(),
            )
            .await;

        match outcome {
            Ok(result) => {
                let key = format!("{}_analysis", result.provenance.family);
                debug!(
                    title = %article.short_title(),
                    family = %result.provenance.family,
                    relevance = result.upsc_relevance,
                    "article accepted"
                );
                article.annotations.insert(key, result);
                article.status = ArticleStatus::Accepted;
            }
            Err(failure) => {
                warn!(
                    title = %article.short_title(),
                    reason = failure.reason_code(),
                    error = %failure,
                    "article enrichment failed"
                );
                article.status = ArticleStatus::RejectedEnrichment;
                article.rejection = Some(failure.reason_code().to_string());
            }
        }
        article
    }
}
