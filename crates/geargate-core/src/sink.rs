//! Response sinks.
//!
//! A job answers its HTTP request through a sink. The gateway creates a
//! [`ResponseSink`] / [`SinkReceiver`] pair per request, hands the sink to
//! the job and keeps only the receiver. Writing consumes the sink, so a
//! response can be committed at most once.
//!
//! Streaming jobs convert the sink with [`ResponseSink::into_raw`]. The
//! [`RawResponseSink`] commits its status and headers on the first body
//! write and then forwards chunks to the client as they are produced.

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Buffered chunks between a streaming job and the client.
const STREAM_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("client is no longer receiving the response")]
    Closed,
}

/// A committed response: head plus body.
pub struct SinkResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: SinkBody,
}

/// Body of a committed response.
pub enum SinkBody {
    Full(Bytes),
    Stream(BodyStream),
}

impl SinkResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: SinkBody::Full(body.into()),
        }
    }

    /// An empty response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, Bytes::new())
    }

    /// A JSON response. Falls back to a 500 if `value` cannot be serialized.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, body).with_content_type("application/json"),
            Err(e) => Self::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    }

    /// The structured error envelope used for every gateway error.
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "success": false, "error": message });
        Self::new(status, body.to_string()).with_content_type("application/json")
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }
}

impl fmt::Debug for SinkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            SinkBody::Full(bytes) => format!("{} bytes", bytes.len()),
            SinkBody::Stream(_) => "stream".to_string(),
        };
        f.debug_struct("SinkResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

/// Create a sink and the receiver the gateway waits on.
pub fn response_channel() -> (ResponseSink, SinkReceiver) {
    let (tx, rx) = oneshot::channel();
    (ResponseSink { tx }, SinkReceiver { rx: Some(rx) })
}

// ── Framework sink ─────────────────────────────────────────────

/// Single-use writer for a structured response.
pub struct ResponseSink {
    tx: oneshot::Sender<SinkResponse>,
}

impl ResponseSink {
    /// Commit a response.
    pub fn send(self, response: SinkResponse) -> Result<(), SinkError> {
        self.tx.send(response).map_err(|_| SinkError::Closed)
    }

    pub fn json<T: Serialize>(self, status: StatusCode, value: &T) -> Result<(), SinkError> {
        self.send(SinkResponse::json(status, value))
    }

    pub fn error(self, status: StatusCode, message: &str) -> Result<(), SinkError> {
        self.send(SinkResponse::error(status, message))
    }

    pub fn text(self, status: StatusCode, body: impl Into<Bytes>) -> Result<(), SinkError> {
        self.send(SinkResponse::new(status, body).with_content_type("text/plain; charset=utf-8"))
    }

    /// Whether the client side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Switch to byte-stream output.
    pub fn into_raw(self) -> RawResponseSink {
        RawResponseSink {
            head: Some(self.tx),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// ── Raw sink ───────────────────────────────────────────────────

/// Streaming writer over the raw HTTP response.
///
/// Status and headers may be changed until the first [`write`](Self::write);
/// after that they are on the wire. Dropping an unwritten sink commits an
/// empty body with the current status.
pub struct RawResponseSink {
    head: Option<oneshot::Sender<SinkResponse>>,
    status: StatusCode,
    headers: HeaderMap,
    body: Option<mpsc::Sender<Bytes>>,
}

impl RawResponseSink {
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// True once the head has been sent.
    pub fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    /// Write a body chunk, committing the head first if needed.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), SinkError> {
        if let Some(head) = self.head.take() {
            let (tx, rx) = mpsc::channel(STREAM_BUFFER);
            let response = SinkResponse {
                status: self.status,
                headers: std::mem::take(&mut self.headers),
                body: SinkBody::Stream(BodyStream { rx }),
            };
            head.send(response).map_err(|_| SinkError::Closed)?;
            self.body = Some(tx);
        }
        let tx = self.body.as_ref().ok_or(SinkError::Closed)?;
        tx.send(chunk.into()).await.map_err(|_| SinkError::Closed)
    }

    /// End the response. Equivalent to dropping the sink.
    pub fn finish(self) {}

    fn commit_empty(&mut self) {
        if let Some(head) = self.head.take() {
            let response = SinkResponse {
                status: self.status,
                headers: std::mem::take(&mut self.headers),
                body: SinkBody::Full(Bytes::new()),
            };
            let _ = head.send(response);
        }
    }
}

impl Drop for RawResponseSink {
    fn drop(&mut self) {
        self.commit_empty();
    }
}

impl fmt::Debug for RawResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponseSink")
            .field("status", &self.status)
            .field("committed", &self.is_committed())
            .finish()
    }
}

/// Body chunks produced by a [`RawResponseSink`].
pub struct BodyStream {
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for BodyStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

// ── Receiver ───────────────────────────────────────────────────

/// The gateway's half of a response channel.
pub struct SinkReceiver {
    rx: Option<oneshot::Receiver<SinkResponse>>,
}

impl SinkReceiver {
    /// Wait for the job to commit a response.
    ///
    /// Returns `None` if the sink was dropped without a write. Once this
    /// returns, later calls return `None` immediately.
    pub async fn committed(&mut self) -> Option<SinkResponse> {
        let rx = self.rx.as_mut()?;
        let result = rx.await.ok();
        self.rx = None;
        result
    }

    /// Take a response that has already been committed, without waiting.
    pub fn try_take(&mut self) -> Option<SinkResponse> {
        let response = self.rx.as_mut()?.try_recv().ok();
        if response.is_some() {
            self.rx = None;
        }
        response
    }
}

impl fmt::Debug for SinkReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkReceiver")
            .field("pending", &self.rx.is_some())
            .finish()
    }
}
