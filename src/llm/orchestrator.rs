// src/llm/orchestrator.rs
//! Provider registry and the fallback orchestrator behind `enrich`.
//!
//! Families are tried strictly in priority order. Within a family every
//! currently healthy key gets at most one attempt; the first answer that comes
//! back is normalized and either returned (valid) or reported as a validation
//! failure without touching further families.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tracing::{debug, info, warn};

use crate::llm::error::{EnrichmentFailure, ProviderError};
use crate::llm::health::{HealthPolicy, HealthReport, KeyHealthTracker};
use crate::llm::provider::{
    EnrichmentRequest, FamilyPricing, GenerationParams, ProviderAdapter, TaskKind,
};
use crate::llm::rotator::{Credential, KeyRotator, ProviderFamily, ProviderPool};
use crate::llm::schema::{normalize, EnrichmentResult, Provenance};

/// One provider family: its key pool, its adapter and its price.
pub struct FamilyEntry {
    pool: ProviderPool,
    adapter: Arc<dyn ProviderAdapter>,
    pricing: FamilyPricing,
}

impl FamilyEntry {
    pub fn family(&self) -> &ProviderFamily {
        self.pool.family()
    }

    pub fn pool(&self) -> &ProviderPool {
        &self.pool
    }
}

/// Owns every piece of mutable rotation/health state. Built once at startup
/// and shared by handle; tests build one per case.
pub struct ProviderRegistry {
    tracker: Arc<KeyHealthTracker>,
    rotator: KeyRotator,
    families: Vec<FamilyEntry>,
}

impl ProviderRegistry {
    pub fn builder(policy: HealthPolicy) -> RegistryBuilder {
        RegistryBuilder {
            policy,
            families: Vec::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<KeyHealthTracker> {
        &self.tracker
    }

    pub fn rotator(&self) -> &KeyRotator {
        &self.rotator
    }

    /// Families in priority order.
    pub fn families(&self) -> impl Iterator<Item = &ProviderFamily> {
        self.families.iter().map(|f| f.family())
    }

    pub fn entry(&self, family: &ProviderFamily) -> Option<&FamilyEntry> {
        self.families.iter().find(|f| f.family() == family)
    }

    pub fn pool(&self, family: &ProviderFamily) -> Option<&ProviderPool> {
        self.entry(family).map(|f| f.pool())
    }

    pub fn credential(&self, family: &ProviderFamily, ordinal: usize) -> Option<&Credential> {
        self.pool(family)?.credentials().get(ordinal)
    }

    pub fn health_report(&self) -> HealthReport {
        self.tracker.report()
    }
}

pub struct RegistryBuilder {
    policy: HealthPolicy,
    families: Vec<FamilyEntry>,
}

impl RegistryBuilder {
    pub fn family<I, S>(self, name: &str, secrets: I, adapter: Arc<dyn ProviderAdapter>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.family_priced(name, secrets, adapter, 0.0)
    }

    pub fn family_priced<I, S>(
        mut self,
        name: &str,
        secrets: I,
        adapter: Arc<dyn ProviderAdapter>,
        cost_per_million_tokens: f64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let family = ProviderFamily::new(name);
        if self.families.iter().any(|f| f.family() == &family) {
            warn!(%family, "duplicate provider family ignored");
            return self;
        }
        self.families.push(FamilyEntry {
            pool: ProviderPool::new(family.clone(), secrets),
            adapter,
            pricing: FamilyPricing {
                family,
                cost_per_million_tokens: cost_per_million_tokens.max(0.0),
            },
        });
        self
    }

    pub fn build(self) -> ProviderRegistry {
        let tracker = Arc::new(KeyHealthTracker::new(self.policy));
        for f in &self.families {
            tracker.register_pool(&f.pool);
            info!(
                family = %f.family(),
                keys = f.pool.len(),
                model = f.adapter.model(),
                "provider family registered"
            );
        }
        ProviderRegistry {
            rotator: KeyRotator::new(tracker.clone()),
            tracker,
            families: self.families,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Upper bound for a single provider call.
    pub request_timeout: Duration,
    /// Pause before retrying with the next key of the same family.
    pub retry_delay: Duration,
    /// Optional cap on attempts per family, below the healthy-key count.
    pub max_attempts_per_family: Option<usize>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_millis(1000),
            max_attempts_per_family: None,
        }
    }
}

enum FamilyOutcome {
    Answered(EnrichmentResult),
    Exhausted,
}

#[derive(Default)]
struct AttemptLog {
    attempts: u32,
    last_error: Option<String>,
}

pub struct FallbackOrchestrator {
    registry: Arc<ProviderRegistry>,
    order: Vec<ProviderFamily>,
    settings: OrchestratorSettings,
}

impl FallbackOrchestrator {
    /// Use the registry's own family order as fallback priority.
    pub fn new(registry: Arc<ProviderRegistry>, settings: OrchestratorSettings) -> Self {
        let order = registry.families().cloned().collect();
        Self {
            registry,
            order,
            settings,
        }
    }

    /// Explicit priority; families unknown to the registry are skipped.
    pub fn with_order(
        registry: Arc<ProviderRegistry>,
        order: Vec<ProviderFamily>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            order,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn order(&self) -> &[ProviderFamily] {
        &self.order
    }

    pub async fn enrich(
        &self,
        content: &str,
        task: TaskKind,
        params: GenerationParams,
    ) -> Result<EnrichmentResult, EnrichmentFailure> {
        let request = EnrichmentRequest::new(content, task, params);
        self.enrich_request(&request).await
    }

    pub async fn enrich_request(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResult, EnrichmentFailure> {
        let outcome = self.run(request).await;
        let label = match &outcome {
            Ok(_) => "valid",
            Err(e) => e.reason_code(),
        };
        counter!("enrich_outcomes_total", "outcome" => label).increment(1);
        outcome
    }

    async fn run(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResult, EnrichmentFailure> {
        let mut log = AttemptLog::default();

        for family in &self.order {
            let Some(entry) = self.registry.entry(family) else {
                debug!(%family, "family not registered, skipping");
                continue;
            };

            match self.try_family(entry, request, &mut log).await {
                FamilyOutcome::Answered(result) if result.is_valid() => {
                    return Ok(result);
                }
                FamilyOutcome::Answered(result) => {
                    warn!(
                        %family,
                        task = %request.task,
                        issues = ?result.issues(),
                        "provider answer failed validation"
                    );
                    return Err(EnrichmentFailure::ValidationFailed {
                        family: family.to_string(),
                        issues: result.issues().to_vec(),
                    });
                }
                FamilyOutcome::Exhausted => {
                    info!(%family, task = %request.task, "family exhausted, falling back");
                }
            }
        }

        if log.attempts == 0 {
            warn!(task = %request.task, "no credentials available in any family");
            Err(EnrichmentFailure::NoCredentialsAvailable)
        } else {
            warn!(
                task = %request.task,
                attempts = log.attempts,
                last_error = log.last_error.as_deref().unwrap_or(""),
                "all provider families exhausted"
            );
            Err(EnrichmentFailure::AllProvidersExhausted {
                attempts: log.attempts,
                last_error: log.last_error,
            })
        }
    }

    async fn try_family(
        &self,
        entry: &FamilyEntry,
        request: &EnrichmentRequest,
        log: &mut AttemptLog,
    ) -> FamilyOutcome {
        let family = entry.family();
        let tracker = self.registry.tracker();

        let healthy = tracker.healthy_in(entry.pool.credentials()).len();
        let mut budget = healthy.max(1);
        if let Some(cap) = self.settings.max_attempts_per_family {
            budget = budget.min(cap.max(1));
        }

        let mut tried: Vec<usize> = Vec::with_capacity(budget);
        for attempt in 0..budget {
            let Some(cred) = self.registry.rotator().next_excluding(&entry.pool, &tried) else {
                break;
            };
            tried.push(cred.ordinal());
            if attempt > 0 && !self.settings.retry_delay.is_zero() {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
            log.attempts += 1;

            let started = Instant::now();
            let call = tokio::time::timeout(
                self.settings.request_timeout,
                entry.adapter.complete(&cred, request),
            )
            .await;
            let latency_ms = started.elapsed().as_millis() as u64;
            histogram!("llm_request_duration_ms", "family" => family.to_string())
                .record(latency_ms as f64);

            let err = match call {
                Ok(Ok(raw)) => {
                    tracker.record_success(&cred);
                    counter!(
                        "llm_requests_total",
                        "family" => family.to_string(),
                        "outcome" => "success"
                    )
                    .increment(1);
                    debug!(
                        %family,
                        ordinal = cred.ordinal(),
                        key = cred.fingerprint(),
                        attempt = attempt + 1,
                        latency_ms,
                        tokens = raw.tokens_used,
                        "provider call succeeded"
                    );
                    let provenance = Provenance {
                        family: family.clone(),
                        model: raw.model.clone(),
                        credential_ordinal: cred.ordinal(),
                        latency_ms,
                        tokens_used: raw.tokens_used,
                        estimated_cost_usd: entry.pricing.estimate(raw.tokens_used),
                    };
                    return FamilyOutcome::Answered(normalize(&raw, provenance));
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(self.settings.request_timeout.as_secs()),
            };

            let text = err.to_string();
            tracker.record_failure(&cred, &text);
            let outcome = if matches!(err, ProviderError::Timeout(_)) {
                "timeout"
            } else {
                "error"
            };
            counter!(
                "llm_requests_total",
                "family" => family.to_string(),
                "outcome" => outcome
            )
            .increment(1);
            warn!(
                %family,
                ordinal = cred.ordinal(),
                key = cred.fingerprint(),
                attempt = attempt + 1,
                transient = err.is_transient(),
                error = %text,
                "provider call failed"
            );
            log.last_error = Some(format!("{family}: {text}"));
        }

        gauge!("llm_healthy_keys", "family" => family.to_string())
            .set(tracker.healthy_count(family) as f64);
        FamilyOutcome::Exhausted
    }
}
