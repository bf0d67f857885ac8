//! Batched, non-blocking point writes.
//!
//! [`WriteApi::write_point`] only enqueues. A background task collects
//! points and sends them in batches, either when a batch is full or when
//! the flush interval elapses. A failed batch is logged and dropped: the
//! caller that enqueued the points never learns about it.

use super::client::Client;
use super::line_protocol::Point;
use crate::metrics_defs::{INFLUXDB_FLUSH_DURATION, INFLUXDB_POINTS_DROPPED, INFLUXDB_POINTS_WRITTEN};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Clone, Debug, PartialEq)]
pub struct WriteOptions {
    /// Points per request
    pub batch_size: usize,
    /// Upper bound on how long a point waits in the buffer
    pub flush_interval: Duration,
    /// Points that may be queued before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            batch_size: 5_000,
            flush_interval: Duration::from_secs(1),
            queue_capacity: 10_000,
        }
    }
}

#[derive(Debug)]
enum Command {
    Write(Point),
    // The worker replies once everything queued before this command is sent.
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Handle to the background writer for one org and bucket.
pub struct WriteApi {
    tx: mpsc::Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriteApi {
    /// Starts the background writer. Must be called from within a tokio runtime.
    pub fn spawn(client: Client, org: String, bucket: String, options: WriteOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let worker = Worker {
            client,
            org,
            bucket,
            batch_size: options.batch_size.max(1),
            buffer: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(rx, options.flush_interval));

        WriteApi {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues a point without waiting. Drops it when the queue is full or
    /// the writer is closed.
    pub fn write_point(&self, point: Point) {
        let reason = match self.tx.try_send(Command::Write(point)) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "queue_full",
            Err(TrySendError::Closed(_)) => "closed",
        };
        tracing::warn!(reason, "dropping influxdb point");
        shared::counter!(INFLUXDB_POINTS_DROPPED, "reason" => reason).increment(1);
    }

    /// Waits until every point enqueued so far has been sent (or dropped).
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flushes pending points and stops the background writer.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Close(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!("influxdb writer task failed: {e}");
        }
    }
}

struct Worker {
    client: Client,
    org: String,
    bucket: String,
    batch_size: usize,
    buffer: Vec<Point>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, flush_interval: Duration) {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Write(point)) => {
                        self.buffer.push(point);
                        if self.buffer.len() >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.flush().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Close(ack)) => {
                        self.flush().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush().await,
            }
        }

        tracing::debug!("influxdb writer stopped");
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let points = std::mem::take(&mut self.buffer);
        let body = points
            .iter()
            .map(Point::to_string)
            .collect::<Vec<_>>()
            .join("\n");

        let start = Instant::now();
        let result = self
            .client
            .write_line_protocol(&self.org, &self.bucket, body)
            .await;
        shared::histogram!(INFLUXDB_FLUSH_DURATION).record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tracing::debug!(points = points.len(), "wrote batch to influxdb");
                shared::counter!(INFLUXDB_POINTS_WRITTEN).increment(points.len() as u64);
            }
            Err(e) => {
                tracing::error!(points = points.len(), error = %e, "influxdb write failed, dropping batch");
                shared::counter!(INFLUXDB_POINTS_DROPPED, "reason" => "write_failed")
                    .increment(points.len() as u64);
            }
        }
    }
}
