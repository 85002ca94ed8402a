//! UPSC News Enricher: binary entrypoint
//! Boots the Axum HTTP server: loads config, builds the provider registry and
//! the pipeline, and mounts the operator routes plus `/metrics`.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use upsc_news_enricher::{metrics::Metrics, router, run_llm_quick_probe, EnrichmentRuntime};

/// Compact text logs by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("upsc_news_enricher=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: Shuttle may already have installed a subscriber.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialized: {e}");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let runtime = Arc::new(EnrichmentRuntime::load_default()?);
    let metrics = Metrics::init()?;

    if std::env::var("LLM_STARTUP_PROBE").is_ok_and(|v| v == "1") {
        run_llm_quick_probe(&runtime).await;
    }

    let app = router(runtime).merge(metrics.router());
    Ok(app.into())
}
