use anyhow::Context;
use axum::http::HeaderValue;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payment_router::{app, config::Config, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer);
    }
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin {:?}", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(origins))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    if config.app.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting payment router");

    let state = AppState::new(&config).await?;

    let app = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.app.cors_allowed_origins)?);

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("invalid HOST/PORT")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
