//! InfluxDB 2.x sink.
//!
//! Each update becomes three points (`temperature`, `humidity` and
//! `battery_voltage`), each with a single `value` field, tagged with the
//! tag's id (`tag_number`) and name (`tag_name`), and sharing one
//! timestamp. Points are handed to a batched writer; delivery failures are
//! logged by the writer and never reported back through [`Sink::update`].

mod client;
mod config;
mod line_protocol;
mod writer;

pub use client::{Client, ClientError};
pub use config::{
    Config, ConfigError, ConfigFile, DEFAULT_BUCKET, DEFAULT_ORG, SetupRetry, token_file_path,
};
pub use line_protocol::Point;
pub use writer::{WriteApi, WriteOptions};

use crate::sink::{Sink, SinkError, UpdateContext};
use crate::update::Update;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

pub struct InfluxSink {
    config: Config,
    options: WriteOptions,
    // Created on first use, shared by every request afterwards.
    write_api: OnceCell<WriteApi>,
}

impl InfluxSink {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            options: WriteOptions::default(),
            write_api: OnceCell::new(),
        }
    }

    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    async fn write_api(&self) -> Result<&WriteApi, ClientError> {
        self.write_api
            .get_or_try_init(|| async {
                let client = Client::new(&self.config.url, Some(self.config.token.clone()))?;
                tracing::info!(
                    url = %self.config.url,
                    org = %self.config.org,
                    bucket = %self.config.bucket,
                    "starting influxdb writer"
                );
                Ok::<_, ClientError>(WriteApi::spawn(
                    client,
                    self.config.org.clone(),
                    self.config.bucket.clone(),
                    self.options.clone(),
                ))
            })
            .await
    }
}

fn points(update: &Update, timestamp: DateTime<Utc>) -> [Point; 3] {
    let point = |measurement: &str, value: f64| {
        let point = Point::new(measurement)
            .tag("tag_number", update.id.as_str())
            .tag("tag_name", update.name.as_str())
            .field("value", value);
        // Outside the nanosecond range the server stamps the point itself.
        match timestamp.timestamp_nanos_opt() {
            Some(nanos) => point.timestamp(nanos),
            None => point,
        }
    };

    [
        point("temperature", update.degrees_c),
        point("humidity", update.humidity),
        point("battery_voltage", update.battery_voltage),
    ]
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    async fn update(&self, _ctx: &UpdateContext, update: &Update) -> Result<(), SinkError> {
        let write_api = self.write_api().await?;
        for point in points(update, update.timestamp_or_now()) {
            write_api.write_point(point);
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(write_api) = self.write_api.get() {
            tracing::info!("flushing influxdb writes");
            write_api.close().await;
        }
    }
}
