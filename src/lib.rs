// src/lib.rs
// Public library surface for integration tests (and reuse from other services).

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod pipeline;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::bootstrap::EnrichmentRuntime;
pub use crate::llm::{EnrichmentFailure, EnrichmentResult, FallbackOrchestrator, TaskKind};
pub use crate::pipeline::{ArticleRecord, BatchError, BatchReport, PipelineCoordinator};

use tracing::info;

/// Call this from the Shuttle entrypoint (after tracing init) to send one sample
/// article through the configured providers. It won't panic on failure; it just
/// logs the result.
pub async fn run_llm_quick_probe(runtime: &EnrichmentRuntime) {
    runtime.quick_probe().await;
    info!("llm quick probe finished");
}
