use clap::Parser;
use ingest::config::{DEFAULT_ADDR, Listener};
use std::path::PathBuf;
use std::sync::Arc;
use updater::influxdb::{self, ConfigError, InfluxSink};
use updater::{NoopSink, Sink};

#[derive(Parser, Debug)]
#[command(name = "tagdata", about = "Receives wireless sensor tag updates over HTTP")]
pub struct Cli {
    /// Address for the web server
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: Listener,

    /// Config file for InfluxDB
    #[arg(long, value_name = "PATH")]
    pub influx: Option<PathBuf>,

    /// InfluxDB URL, instead of a config file
    #[arg(long, conflicts_with = "influx", requires = "influx_token")]
    pub influx_url: Option<String>,

    #[arg(long, requires = "influx_url")]
    pub influx_token: Option<String>,

    #[arg(long, default_value = influxdb::DEFAULT_ORG)]
    pub influx_org: String,

    #[arg(long, default_value = influxdb::DEFAULT_BUCKET)]
    pub influx_bucket: String,

    /// Send metrics to this statsd host
    #[arg(long)]
    pub statsd_host: Option<String>,

    #[arg(long, default_value_t = 8125)]
    pub statsd_port: u16,
}

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("error setting up influxdb: {0}")]
    Influx(#[from] ConfigError),
    #[error("could not start metrics exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

impl Cli {
    fn influx_config(&self) -> Option<InfluxSource<'_>> {
        if let Some(path) = &self.influx {
            return Some(InfluxSource::File(path));
        }
        match (&self.influx_url, &self.influx_token) {
            (Some(url), Some(token)) => Some(InfluxSource::Inline { url, token }),
            _ => None,
        }
    }

    /// Builds the sinks every update is delivered to, in delivery order.
    pub async fn sinks(&self) -> Result<Vec<Arc<dyn Sink>>, CliError> {
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

        if let Some(source) = self.influx_config() {
            let config = match source {
                InfluxSource::File(path) => influxdb::Config::load(path).await?,
                InfluxSource::Inline { url, token } => {
                    influxdb::Config::new(url, token, &self.influx_org, &self.influx_bucket)?
                }
            };
            tracing::info!("configured influxdb using {source}");
            sinks.push(Arc::new(InfluxSink::new(config)));
        }

        if sinks.is_empty() {
            tracing::warn!("no sinks configured, updates are only logged");
            sinks.push(Arc::new(NoopSink));
        }

        Ok(sinks)
    }
}

#[derive(Clone, Copy)]
enum InfluxSource<'a> {
    File(&'a PathBuf),
    Inline { url: &'a str, token: &'a str },
}

impl std::fmt::Display for InfluxSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfluxSource::File(path) => write!(f, "{}", path.display()),
            InfluxSource::Inline { url, .. } => write!(f, "{url}"),
        }
    }
}
