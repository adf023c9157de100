//! The job handler adapter.
//!
//! [`job_handler`] wraps a per-route job constructor into an axum handler
//! that runs the same steps for every route:
//!
//! 1. parse the `:token` segment and derive the request id
//! 2. require a user
//! 3. build the job (the constructor owns body parsing and validation)
//! 4. submit it to the dispatcher
//! 5. wait for the job to answer
//!
//! After a job is submitted the adapter only reads what the job wrote; the
//! sink itself travels with the job.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use geargate_core::sink::{ResponseSink, SinkReceiver, response_channel};
use geargate_core::{
    IdentifierError, Job, RequestId, Token, TokenCodec, TokenError, ValidationError,
};
use geargate_dispatch::{Completion, DispatchError, Outcome};
use http::StatusCode;
use http_body_util::LengthLimitError;
use thiserror::Error;
use tracing::{Instrument, debug, info_span, warn};

use crate::response::{empty_response, error_response, into_response};
use crate::{GatewayState, RouteConfig};

/// Everything a job constructor receives.
pub struct JobRequest {
    pub request_id: RequestId,
    pub token: Token,
    /// The framework sink. Streaming jobs convert it with `into_raw`.
    pub sink: ResponseSink,
    /// Path parameters, including `token`.
    pub params: HashMap<String, String>,
    pub body: Body,
    pub routes: Arc<RouteConfig>,
}

impl JobRequest {
    /// A path parameter, empty when absent.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or_default()
    }
}

/// Why a constructor did not produce a job.
#[derive(Debug, Error)]
pub enum JobRequestError {
    #[error("{0}")]
    Identifier(#[from] IdentifierError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Body(String),

    #[error("request body must not exceed {0} bytes")]
    BodyTooLarge(usize),

    #[error("{0}")]
    Invalid(&'static str),

    /// The constructor already wrote the full response through the sink.
    #[error("request handled")]
    Handled,
}

impl From<serde_json::Error> for JobRequestError {
    fn from(e: serde_json::Error) -> Self {
        JobRequestError::Body(e.to_string())
    }
}

/// A request rejected before any job was built.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RequestError {
    pub status: StatusCode,
    pub message: String,
    #[source]
    pub source: TokenError,
}

/// Parse the token segment (or the query in test mode) and derive the
/// request id for `operation`.
pub fn extract_token(
    codec: &TokenCodec,
    segment: &str,
    query: &HashMap<String, String>,
    operation: &str,
) -> Result<(Token, RequestId), RequestError> {
    let token = if codec.is_test_segment(segment) {
        codec.parse_query(query).map_err(|e| RequestError {
            status: StatusCode::FORBIDDEN,
            message: format!("Invalid test query: {e}"),
            source: e,
        })?
    } else {
        codec.parse_segment(segment).map_err(|e| RequestError {
            status: StatusCode::FORBIDDEN,
            message: "Invalid authorization token".to_string(),
            source: e,
        })?
    };

    let id = token.request_id(operation).map_err(|e| RequestError {
        status: StatusCode::BAD_REQUEST,
        message: format!("Token is missing data: {e}"),
        source: e,
    })?;

    Ok((token, id))
}

/// Name the operation a request performs: the route plus every path
/// parameter other than the token, in key order.
pub fn operation_name(route: &str, params: &HashMap<String, String>) -> String {
    let mut extra: Vec<_> = params
        .iter()
        .filter(|(name, _)| name.as_str() != "token")
        .collect();
    extra.sort();
    let mut operation = route.to_string();
    for (name, value) in extra {
        operation.push(':');
        operation.push_str(name);
        operation.push('=');
        operation.push_str(value);
    }
    operation
}

/// Read a request body, failing once more than `limit` bytes arrive.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, JobRequestError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        if inner.is::<LengthLimitError>() {
            JobRequestError::BodyTooLarge(limit)
        } else {
            JobRequestError::Body(format!("failed to read request body: {inner}"))
        }
    })
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Wrap a job constructor into an axum handler.
pub fn job_handler<F, Fut>(
    route: &'static str,
    constructor: F,
) -> impl Fn(
    State<GatewayState>,
    Path<HashMap<String, String>>,
    Query<HashMap<String, String>>,
    Body,
) -> HandlerFuture
+ Clone
+ Send
+ Sync
+ 'static
where
    F: Fn(JobRequest) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Job, JobRequestError>> + Send + 'static,
{
    move |State(state): State<GatewayState>,
          Path(params): Path<HashMap<String, String>>,
          Query(query): Query<HashMap<String, String>>,
          body: Body|
          -> HandlerFuture {
        let constructor = constructor.clone();
        Box::pin(run_job(state, route, params, query, body, constructor))
    }
}

async fn run_job<F, Fut>(
    state: GatewayState,
    route: &'static str,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Body,
    constructor: F,
) -> Response
where
    F: Fn(JobRequest) -> Fut,
    Fut: Future<Output = Result<Job, JobRequestError>>,
{
    let segment = params.get("token").map(String::as_str).unwrap_or_default();
    let operation = operation_name(route, &params);
    let (token, request_id) = match extract_token(&state.codec, segment, &query, &operation) {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!(route, status = %e.status, error = %e.source, "token rejected");
            return error_response(e.status, &e.message);
        }
    };

    if token.user().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "All requests must be associated with a user",
        );
    }

    let span = info_span!("job", route, request_id = %request_id, user = %token.user());
    async move {
        let (sink, mut receiver) = response_channel();
        let request = JobRequest {
            request_id,
            token,
            sink,
            params,
            body,
            routes: Arc::clone(&state.routes),
        };

        let job = match constructor(request).await {
            Ok(job) => job,
            Err(JobRequestError::Handled) => {
                return receiver
                    .try_take()
                    .map(into_response)
                    .unwrap_or_else(|| empty_response(StatusCode::OK));
            }
            Err(e) => {
                debug!(error = %e, "invalid request");
                return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}"));
            }
        };

        let kind = job.kind();
        match state.dispatcher.dispatch(job) {
            Ok(completion) => {
                debug!(%kind, "job accepted");
                await_response(receiver, completion).await
            }
            Err(DispatchError::RanToCompletion) => {
                debug!(%kind, outcome = %DispatchError::RanToCompletion, "duplicate request");
                empty_response(StatusCode::NO_CONTENT)
            }
            Err(e) => {
                warn!(%kind, error = %e, "job submission failed");
                error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
            }
        }
    }
    .instrument(span)
    .await
}

/// Wait for the job's response.
///
/// Resolves as soon as the job commits a response, which for streaming
/// jobs is when the head is sent. If the job completes without writing
/// (a duplicate that joined an in-flight job holds a sink nobody writes
/// to) the client gets an empty 200; if it failed without writing, a 500.
async fn await_response(mut receiver: SinkReceiver, completion: Completion) -> Response {
    tokio::select! {
        Some(committed) = receiver.committed() => into_response(committed),
        outcome = completion.wait() => match receiver.try_take() {
            Some(committed) => into_response(committed),
            None if outcome == Outcome::Failed => {
                warn!("job failed without writing a response");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The job failed before producing a response",
                )
            }
            None => empty_response(StatusCode::OK),
        },
    }
}
