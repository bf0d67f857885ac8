use crate::influxdb::ClientError;
use crate::update::Update;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("{sink}: {message}")]
    Rejected { sink: String, message: String },

    #[error("could not create write client: {0}")]
    Client(#[from] ClientError),
}

/// Request-scoped context handed to every sink.
///
/// Cancellation follows the HTTP request: once the request is abandoned
/// the token is cancelled. Sinks that enqueue and return immediately are
/// free to ignore it.
#[derive(Clone, Debug, Default)]
pub struct UpdateContext {
    cancel: CancellationToken,
}

impl UpdateContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A destination for updates.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Record one update.
    ///
    /// Whether the write is durable once this returns is up to the sink.
    async fn update(&self, ctx: &UpdateContext, update: &Update) -> Result<(), SinkError>;

    /// Flush anything buffered and release resources.
    async fn close(&self) {}
}

/// Accepts and discards every update.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl Sink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn update(&self, _ctx: &UpdateContext, update: &Update) -> Result<(), SinkError> {
        tracing::trace!(tag_id = %update.id, "discarding update");
        Ok(())
    }
}
