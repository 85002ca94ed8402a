use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe the series we emit.
    /// Fails if a recorder is already installed for this process.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!(
        "llm_requests_total",
        "Provider calls by family and outcome (success, error, timeout)."
    );
    describe_histogram!(
        "llm_request_duration_ms",
        Unit::Milliseconds,
        "Wall time of a single provider call."
    );
    describe_counter!(
        "llm_key_disabled_total",
        "Keys permanently deactivated after a billing/account error."
    );
    describe_counter!(
        "llm_key_recovered_total",
        "Keys returned to rotation after their cooldown."
    );
    describe_gauge!("llm_healthy_keys", "Healthy keys per family.");
    describe_counter!("enrich_outcomes_total", "Enrich calls by outcome or reason code.");
    describe_counter!("pipeline_articles_total", "Articles by final batch status.");
    describe_counter!(
        "pipeline_batch_failures_total",
        "Batches in which no article was accepted."
    );
}
