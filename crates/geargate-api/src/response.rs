//! Conversions from job sink output to axum responses.

use axum::body::Body;
use axum::response::Response;
use geargate_core::sink::{SinkBody, SinkResponse};
use http::StatusCode;

/// Turn a committed sink response into an HTTP response.
pub fn into_response(committed: SinkResponse) -> Response {
    let body = match committed.body {
        SinkBody::Full(bytes) => Body::from(bytes),
        SinkBody::Stream(stream) => Body::from_stream(stream),
    };
    let mut response = Response::new(body);
    *response.status_mut() = committed.status;
    *response.headers_mut() = committed.headers;
    response
}

/// The gateway's structured error response.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    into_response(SinkResponse::error(status, message))
}

/// A bodiless response.
pub fn empty_response(status: StatusCode) -> Response {
    into_response(SinkResponse::empty(status))
}
