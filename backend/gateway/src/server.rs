//! HTTP server: routes, layers and the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::handler::Handler;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use lessonkit_pipeline::Pipeline;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::error::method_not_allowed;
use crate::routes;

pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
}

impl GatewayState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

fn post_only<H, T>(handler: H) -> MethodRouter<GatewayState>
where
    H: Handler<T, GatewayState>,
    T: 'static,
{
    post(handler).fallback(method_not_allowed)
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health))
        .route("/v1/llm/detect", post_only(routes::detect))
        .route("/v1/llm/parse", post_only(routes::parse))
        .route("/v1/llm/parse/confirm", post_only(routes::confirm_parse))
        .route("/v1/llm/hint", post_only(routes::hint))
        .route("/v1/llm/normalize", post_only(routes::normalize))
        .route("/v1/llm/check", post_only(routes::check))
        .route("/v1/llm/analogue", post_only(routes::analogue))
        .route("/v1/llm/prompt", post_only(routes::update_prompt))
        .route("/v2/llm/parse", post_only(routes::parse_v2))
        .route("/v2/llm/hint", post_only(routes::hint_v2))
        .route("/v2/llm/ocr", post_only(routes::ocr))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl-C.
#[instrument(skip(state))]
pub async fn start_server(addr: SocketAddr, state: GatewayState) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Gateway HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
