// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /providers/health (no secrets in body)
// - POST /enrich (200 with mock providers, 503 without keys)
// - POST /pipeline/batch (200 and 502)
// - POST /admin/keys/deactivate + /admin/keys/reset

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use http::{Request, StatusCode};
use shuttle_axum::axum::{
    body::{self, Body},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use upsc_news_enricher::api;
use upsc_news_enricher::config::LlmConfig;
use upsc_news_enricher::EnrichmentRuntime;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn config(with_keys: bool) -> LlmConfig {
    let mut cfg = LlmConfig::default();
    cfg.orchestrator.retry_delay_ms = 0;
    for f in &mut cfg.families {
        f.keys_env = None;
        if with_keys {
            f.keys = vec![format!("{}-secret-a", f.name), format!("{}-secret-b", f.name)];
        }
    }
    cfg
}

/// Router over a mock-mode runtime (deterministic adapters, no network).
fn mock_router() -> Router {
    let rt = EnrichmentRuntime::from_config(config(true), true).expect("mock runtime");
    api::router(Arc::new(rt))
}

/// Live adapters but no keys at all: every enrich ends in no_credentials_available.
fn keyless_router() -> Router {
    let rt = EnrichmentRuntime::from_config(config(false), false).expect("keyless runtime");
    api::router(Arc::new(rt))
}

async fn send(app: Router, method: &str, uri: &str, payload: Option<Json>) -> (StatusCode, String) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match payload {
        Some(p) => {
            req = req.header("content-type", "application/json");
            Body::from(p.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, String::from_utf8(bytes).expect("utf8"))
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (status, body) = send(mock_router(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "ok");
}

#[tokio::test]
async fn providers_health_lists_families_without_secrets() {
    let (status, body) = send(mock_router(), "GET", "/providers/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("secret"), "health report leaked a key: {body}");

    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["total_keys"], 4);
    assert_eq!(v["families"][0]["family"], "groq");
    assert_eq!(v["families"][1]["family"], "gemini");
    assert_eq!(
        v["families"][0]["keys"][0]["fingerprint"]
            .as_str()
            .unwrap()
            .len(),
        12
    );
}

#[tokio::test]
async fn enrich_returns_normalized_result() {
    let payload = json!({
        "content": "Budget allocation increased for rural health scheme",
        "task": "upsc_analysis"
    });
    let (status, body) = send(mock_router(), "POST", "/enrich", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");

    let v: Json = serde_json::from_str(&body).unwrap();
    for key in [
        "factual_score",
        "analytical_score",
        "upsc_relevance",
        "category",
        "key_facts",
        "syllabus_tags",
        "summary",
        "provenance",
    ] {
        assert!(v.get(key).is_some(), "missing field {key}");
    }
    assert_eq!(v["valid"], true);
    assert_eq!(v["provenance"]["family"], "groq");
}

#[tokio::test]
async fn enrich_without_keys_is_503_with_reason() {
    let payload = json!({"content": "Parliament passes the budget", "task": "summarization"});
    let (status, body) = send(keyless_router(), "POST", "/enrich", Some(payload)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["reason"], "no_credentials_available");
}

#[tokio::test]
async fn batch_endpoint_reports_counts() {
    let payload = json!([
        {"title": "Cabinet approves rural health scheme", "content": "The government budget expands a national scheme.", "relevance_score": 70},
        {"title": "Celebrity gossip", "content": "Red carpet looks of the week."}
    ]);
    let (status, body) = send(mock_router(), "POST", "/pipeline/batch", Some(payload)).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["accepted"], 1);
    assert_eq!(v["rejected_prefilter"], 1);
    assert!(v["articles"][0]["annotations"]["groq_analysis"].is_object());
}

#[tokio::test]
async fn batch_with_nothing_accepted_is_502_with_report() {
    let payload = json!([
        {"title": "Cabinet approves rural health scheme", "content": "The government budget expands a national scheme.", "relevance_score": 70}
    ]);
    let (status, body) = send(keyless_router(), "POST", "/pipeline/batch", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["rejected_enrichment"], 1);
    assert_eq!(v["articles"][0]["status"], "rejected_enrichment");
}

#[tokio::test]
async fn admin_deactivate_then_reset_roundtrip() {
    let app = mock_router();

    let (status, body) = send(
        app.clone(),
        "POST",
        "/admin/keys/deactivate",
        Some(json!({"family": "Groq", "ordinal": 1, "reason": "leaked"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["record"]["is_active"], false);
    assert_eq!(v["record"]["disabled_reason"], "leaked");

    let (_, health) = send(app.clone(), "GET", "/providers/health", None).await;
    let h: Json = serde_json::from_str(&health).unwrap();
    assert_eq!(h["disabled_keys"], 1);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/admin/keys/reset",
        Some(json!({"family": "groq", "ordinal": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["record"]["is_active"], true);

    let (status, _) = send(
        app,
        "POST",
        "/admin/keys/reset",
        Some(json!({"family": "groq", "ordinal": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
