use std::sync::Arc;

use serde::Deserialize;
use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::bootstrap::EnrichmentRuntime;
use crate::llm::{
    EnrichmentFailure, EnrichmentRequest, GenerationParams, HealthReport, KeyHealthRecord,
    ProviderFamily, TaskKind,
};
use crate::pipeline::{ArticleRecord, BatchError};

#[derive(Clone)]
pub struct AppState {
    runtime: Arc<EnrichmentRuntime>,
}

pub fn router(runtime: Arc<EnrichmentRuntime>) -> Router {
    let state = AppState { runtime };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/providers/health", get(providers_health))
        .route("/enrich", post(enrich))
        .route("/pipeline/batch", post(pipeline_batch))
        .route("/admin/keys/reset", post(admin_reset_key))
        .route("/admin/keys/deactivate", post(admin_deactivate_key))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn providers_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.runtime.registry().health_report())
}

#[derive(Deserialize)]
struct EnrichReq {
    content: String,
    #[serde(default = "default_task")]
    task: TaskKind,
    #[serde(default)]
    params: GenerationParams,
}

fn default_task() -> TaskKind {
    TaskKind::RelevanceAnalysis
}

fn failure_status(f: &EnrichmentFailure) -> StatusCode {
    match f {
        EnrichmentFailure::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EnrichmentFailure::NoCredentialsAvailable
        | EnrichmentFailure::AllProvidersExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn enrich(State(state): State<AppState>, Json(body): Json<EnrichReq>) -> Response {
    let req = EnrichmentRequest::new(body.content, body.task, body.params);
    match state.runtime.orchestrator().enrich_request(&req).await {
        Ok(result) => Json(result).into_response(),
        Err(f) => (failure_status(&f), Json(f)).into_response(),
    }
}

async fn pipeline_batch(
    State(state): State<AppState>,
    Json(articles): Json<Vec<ArticleRecord>>,
) -> Response {
    match state.runtime.coordinator().run_batch(articles).await {
        Ok(report) => Json(report).into_response(),
        Err(BatchError::NothingAccepted { report }) => {
            (StatusCode::BAD_GATEWAY, Json(*report)).into_response()
        }
    }
}

#[derive(Deserialize)]
struct KeyRef {
    family: String,
    ordinal: usize,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(serde::Serialize)]
struct KeyAdminResp {
    family: ProviderFamily,
    ordinal: usize,
    fingerprint: String,
    record: Option<KeyHealthRecord>,
}

fn key_admin(state: &AppState, key: &KeyRef, deactivate: bool) -> Response {
    let registry = state.runtime.registry();
    let family = ProviderFamily::new(key.family.as_str());
    let Some(cred) = registry.credential(&family, key.ordinal) else {
        return (
            StatusCode::NOT_FOUND,
            format!("no key {} in family '{}'", key.ordinal, family),
        )
            .into_response();
    };

    let tracker = registry.tracker();
    if deactivate {
        let reason = key.reason.as_deref().unwrap_or("manually deactivated");
        tracker.deactivate(cred, reason);
    } else {
        tracker.reset(cred);
    }
    info!(
        %family,
        ordinal = key.ordinal,
        key = cred.fingerprint(),
        action = if deactivate { "deactivate" } else { "reset" },
        "key admin action"
    );

    Json(KeyAdminResp {
        family: family.clone(),
        ordinal: key.ordinal,
        fingerprint: cred.fingerprint().to_string(),
        record: tracker.record(cred),
    })
    .into_response()
}

async fn admin_reset_key(State(state): State<AppState>, Json(key): Json<KeyRef>) -> Response {
    key_admin(&state, &key, false)
}

async fn admin_deactivate_key(
    State(state): State<AppState>,
    Json(key): Json<KeyRef>,
) -> Response {
    key_admin(&state, &key, true)
}
