// src/bootstrap.rs
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::{FamilyConfig, FamilyKind, LlmConfig};
use crate::llm::providers::{http_client, GeminiAdapter, MockAdapter, OpenAiCompatAdapter};
use crate::llm::{
    FallbackOrchestrator, GenerationParams, ProviderAdapter, ProviderRegistry, TaskKind,
};
use crate::pipeline::PipelineCoordinator;

pub const ENV_TEST_MODE: &str = "AI_TEST_MODE";

/// True when `AI_TEST_MODE=mock`.
pub fn mock_mode_from_env() -> bool {
    std::env::var(ENV_TEST_MODE)
        .map(|v| v.trim().eq_ignore_ascii_case("mock"))
        .unwrap_or(false)
}

/// Everything the service needs, built once from config.
pub struct EnrichmentRuntime {
    pub cfg: LlmConfig,
    mock: bool,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<FallbackOrchestrator>,
    coordinator: Arc<PipelineCoordinator>,
}

impl EnrichmentRuntime {
    /// Load config with the usual fallbacks and honour `AI_TEST_MODE`.
    pub fn load_default() -> anyhow::Result<Self> {
        let cfg = LlmConfig::load_default().context("loading llm config")?;
        Self::from_config(cfg, mock_mode_from_env())
    }

    pub fn from_config(cfg: LlmConfig, mock: bool) -> anyhow::Result<Self> {
        let http = http_client().context("building HTTP client")?;

        let mut builder = ProviderRegistry::builder(cfg.health.policy());
        for family in &cfg.families {
            let mut keys = family.resolve_keys();
            if mock && keys.is_empty() {
                // Mock runs need a key to rotate over, never a real one.
                keys.push(format!("mock-{}", family.name));
            }
            // Safe diagnostics: only family, kind and key count.
            info!(
                family = %family.name,
                kind = ?family.kind,
                keys = keys.len(),
                mock,
                "llm family configured"
            );
            if keys.is_empty() {
                warn!(family = %family.name, "no keys configured for family");
            }
            builder = builder.family_priced(
                &family.name,
                keys,
                build_adapter(family, &http, mock),
                family.cost_per_million_tokens,
            );
        }
        let registry = Arc::new(builder.build());

        let orchestrator = Arc::new(FallbackOrchestrator::new(
            registry.clone(),
            cfg.orchestrator.settings(),
        ));
        let coordinator = Arc::new(PipelineCoordinator::new(
            orchestrator.clone(),
            cfg.pipeline.prefilter(),
            cfg.pipeline.settings(),
        ));

        Ok(Self {
            cfg,
            mock,
            registry,
            orchestrator,
            coordinator,
        })
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<FallbackOrchestrator> {
        &self.orchestrator
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    /// One sample article through `enrich`; logs the outcome, never fails.
    pub async fn quick_probe(&self) {
        if self.registry.families().next().is_none() {
            warn!("llm quick_probe skipped: no provider families configured");
            return;
        }
        let sample = "The Union Cabinet approved amendments to the Disaster Management Act, \
                      giving the National Disaster Management Authority statutory power to \
                      prepare national and state disaster plans.";
        match self
            .orchestrator
            .enrich(sample, TaskKind::RelevanceAnalysis, GenerationParams::default())
            .await
        {
            Ok(r) => info!(
                family = %r.provenance.family,
                model = %r.provenance.model,
                latency_ms = r.provenance.latency_ms,
                relevance = r.upsc_relevance,
                "llm quick_probe ok"
            ),
            Err(e) => warn!(reason = e.reason_code(), error = %e, "llm quick_probe failed"),
        }
    }
}

fn build_adapter(
    family: &FamilyConfig,
    http: &reqwest::Client,
    mock: bool,
) -> Arc<dyn ProviderAdapter> {
    if mock {
        return Arc::new(MockAdapter::default());
    }
    match family.kind {
        FamilyKind::OpenaiCompatible => Arc::new(OpenAiCompatAdapter::new(
            http.clone(),
            family.base_url(),
            family.model(),
        )),
        FamilyKind::Gemini => Arc::new(GeminiAdapter::new(
            http.clone(),
            family.base_url(),
            family.model(),
        )),
    }
}
