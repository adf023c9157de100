//! geargate-api — the tokenized job-submission API.
//!
//! Every route authenticates with a token carried in the URL path, turns
//! the request into a [`Job`](geargate_core::Job), submits it to a
//! [`Dispatcher`] and waits for the job to answer.
//!
//! # API Routes
//!
//! | Method | Path | Job |
//! |---|---|---|
//! | PUT | `/token/:token/container` | create-container |
//! | GET | `/token/:token/container/log` | container-log (streamed) |
//! | PUT | `/token/:token/container/log` | rejected as an unknown container action |
//! | PUT | `/token/:token/container/:action` | container-started / container-stopped |
//! | PUT | `/token/:token/repository` | create-repository |
//! | PUT | `/token/:token/keys` | put-keys |
//! | GET | `/token/:token/content` | get-content (streamed) |
//! | GET | `/token/:token/content/` | get-content with empty sub-path (streamed) |
//! | GET | `/token/:token/content/*` | get-content with sub-path (streamed) |
//! | PUT | `/token/:token/build-image` | build-image |

pub mod adapter;
pub mod handlers;
pub mod response;

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::response::Response;
use axum::routing::{get, put};
use geargate_core::{GatewayConfig, TokenCodec};
use geargate_dispatch::Dispatcher;
use http::StatusCode;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

pub use adapter::{JobRequest, JobRequestError, RequestError, job_handler};

/// Per-route settings that job constructors read.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Clone source for new repositories.
    pub clone_source: String,
    /// Largest accepted keys body, in bytes (inclusive).
    pub keys_body_limit: usize,
    /// Largest accepted create-container body, in bytes (inclusive).
    pub container_body_limit: usize,
}

impl RouteConfig {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            clone_source: config.clone_source.clone(),
            keys_body_limit: config.keys_body_limit,
            container_body_limit: config.container_body_limit,
        }
    }
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub codec: Arc<TokenCodec>,
    pub routes: Arc<RouteConfig>,
    pub expose_panics: bool,
}

impl GatewayState {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: &GatewayConfig) -> Self {
        Self {
            dispatcher,
            codec: Arc::new(TokenCodec::new(
                config.token_key_bytes(),
                config.allow_test_tokens,
            )),
            routes: Arc::new(RouteConfig::from_config(config)),
            expose_panics: config.expose_panics,
        }
    }
}

/// Build the API router.
pub fn build_router(state: GatewayState) -> Router {
    let expose_panics = state.expose_panics;

    Router::new()
        .route(
            "/token/{token}/container",
            put(job_handler("create-container", handlers::put_container)),
        )
        .route(
            "/token/{token}/container/log",
            get(job_handler("container-log", handlers::get_container_log)).put(job_handler(
                "container-action",
                handlers::put_container_action,
            )),
        )
        .route(
            "/token/{token}/container/{action}",
            put(job_handler("container-action", handlers::put_container_action)),
        )
        .route(
            "/token/{token}/repository",
            put(job_handler("create-repository", handlers::put_repository)),
        )
        .route(
            "/token/{token}/keys",
            put(job_handler("put-keys", handlers::put_keys)),
        )
        .route(
            "/token/{token}/content",
            get(job_handler("get-content", handlers::get_content)),
        )
        .route(
            "/token/{token}/content/",
            get(job_handler("get-content", handlers::get_content)),
        )
        .route(
            "/token/{token}/content/{*path}",
            get(job_handler("get-content", handlers::get_content)),
        )
        .route(
            "/token/{token}/build-image",
            put(job_handler("build-image", handlers::put_build_image)),
        )
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            panic_response(panic, expose_panics)
        }))
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>, expose: bool) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %message, "request handler panicked");

    let body = if expose {
        format!("Internal Server Error: {message}")
    } else {
        "Internal Server Error".to_string()
    };
    response::error_response(StatusCode::INTERNAL_SERVER_ERROR, &body)
}
