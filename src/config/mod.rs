// src/config/mod.rs
pub mod llm;

pub use llm::{FamilyConfig, FamilyKind, LlmConfig};
