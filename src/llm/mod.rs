// src/llm/mod.rs
//! Centralized LLM access core: key health, rotation, provider adapters,
//! fallback across provider families, and schema validation.

pub mod error;
pub mod health;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod rotator;
pub mod schema;

// Re-export convenient types.
pub use crate::llm::error::{EnrichmentFailure, ProviderError};
pub use crate::llm::health::{HealthPolicy, HealthReport, KeyHealthRecord, KeyHealthTracker};
pub use crate::llm::orchestrator::{FallbackOrchestrator, OrchestratorSettings, ProviderRegistry};
pub use crate::llm::provider::{
    EnrichmentRequest, GenerationParams, ProviderAdapter, RawResponse, TaskKind,
};
pub use crate::llm::rotator::{Credential, KeyRotator, ProviderFamily, ProviderPool};
pub use crate::llm::schema::{EnrichmentResult, ProcessingStatus, Provenance, RevisionPriority};
