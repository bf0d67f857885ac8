//! Per-request access logging.
//!
//! [`RequestLogger`] wraps a service and emits exactly one line per request
//! in the form `<remote> - <method> <uri> - <status>[ <elapsed>s]`. The
//! elapsed time runs from request start until the first byte of the
//! response (an explicit non-200 status, or the first body data frame) and
//! is left out when nothing was ever written.
//!
//! The line is written by a drop guard, so it is produced once whether the
//! response body finishes streaming, the client goes away, or the wrapped
//! service fails before producing a response.

use crate::http::RemoteAddr;
use crate::metrics_defs::REQUEST_DURATION;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Buf, Bytes, Frame, SizeHint};
use hyper::header::USER_AGENT;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Receives every finished [`RequestLogEntry`].
pub type LogEmitter = Arc<dyn Fn(&RequestLogEntry) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub method: Method,
    pub uri: String,
    pub user_agent: String,
    pub remote_addr: String,
    pub status: StatusCode,
    pub start: Instant,
    pub first_byte_at: Option<Instant>,
}

impl RequestLogEntry {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let remote_addr = req
            .extensions()
            .get::<RemoteAddr>()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());

        RequestLogEntry {
            method: req.method().clone(),
            uri: req.uri().to_string(),
            user_agent,
            remote_addr,
            status: StatusCode::OK,
            start: Instant::now(),
            first_byte_at: None,
        }
    }

    /// Time from request start to the first byte written, if anything was
    /// written strictly after the start.
    pub fn elapsed(&self) -> Option<Duration> {
        self.first_byte_at
            .and_then(|at| at.checked_duration_since(self.start))
            .filter(|elapsed| !elapsed.is_zero())
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status = status;
        self.first_byte_at = Some(Instant::now());
    }

    fn write_body(&mut self) {
        if self.first_byte_at.is_none() {
            self.first_byte_at = Some(Instant::now());
        }
    }
}

impl fmt::Display for RequestLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} {} - {}",
            self.remote_addr,
            self.method,
            self.uri,
            self.status.as_u16()
        )?;
        if let Some(elapsed) = self.elapsed() {
            write!(f, " {:.3}s", elapsed.as_secs_f64())?;
        }
        Ok(())
    }
}

fn log_with_tracing(entry: &RequestLogEntry) {
    tracing::info!(
        target: "request",
        user_agent = %entry.user_agent,
        "{entry}"
    );
}

struct LogGuard {
    entry: RequestLogEntry,
    emit: LogEmitter,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        (self.emit)(&self.entry);
        crate::histogram!(REQUEST_DURATION, "status" => self.entry.status.as_str().to_owned())
            .record(self.entry.start.elapsed().as_secs_f64());
    }
}

/// Response body that records the first data frame and holds the log guard
/// until the body is exhausted or dropped.
struct LoggingBody<B> {
    inner: B,
    guard: Option<LogGuard>,
}

impl<B> Body for LoggingBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                let wrote_data = frame.data_ref().is_some_and(|data| data.has_remaining());
                if let (true, Some(guard)) = (wrote_data, this.guard.as_mut()) {
                    guard.entry.write_body();
                }
            }
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => {
                this.guard.take();
            }
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Wraps a service so that every request it handles is logged once.
#[derive(Clone)]
pub struct RequestLogger<S> {
    inner: S,
    emit: LogEmitter,
}

impl<S> RequestLogger<S> {
    /// Logs through `tracing` at info level under the `request` target.
    pub fn new(inner: S) -> Self {
        Self::with_emitter(inner, Arc::new(log_with_tracing))
    }

    pub fn with_emitter(inner: S, emit: LogEmitter) -> Self {
        Self { inner, emit }
    }
}

impl<S, B, E> Service<Request<B>> for RequestLogger<S>
where
    S: Service<Request<B>, Response = Response<BoxBody<Bytes, E>>, Error = E>,
    S::Future: Send + 'static,
    E: Send + Sync + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let mut guard = LogGuard {
            entry: RequestLogEntry::from_request(&req),
            emit: self.emit.clone(),
        };
        let response = self.inner.call(req);

        Box::pin(async move {
            // An error here drops the guard and logs with the default status.
            let (parts, body) = response.await?.into_parts();

            if parts.status != StatusCode::OK {
                guard.entry.write_status(parts.status);
            }

            let body = LoggingBody {
                inner: body,
                guard: Some(guard),
            };
            Ok(Response::from_parts(parts, body.boxed()))
        })
    }
}
