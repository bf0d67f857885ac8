mod config;

use clap::Parser;
use config::{Cli, CliError};
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;
use updater::Dispatcher;

// Example usage:
// $ tagdata --addr 127.0.0.1:8288
// $ curl -d '{"tag_name": "test", "degrees_c": 123.34}' http://127.0.0.1:8288/

fn init_metrics(host: &str, port: u16) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(host, port).build(Some("tagdata"))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderInstalled)?;

    shared::metrics_defs::describe(shared::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe(updater::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe(ingest::metrics_defs::ALL_METRICS);
    tracing::info!(host, port, "sending metrics to statsd");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(host) = &cli.statsd_host
        && let Err(e) = init_metrics(host, cli.statsd_port)
    {
        tracing::error!("{e}");
        std::process::exit(1);
    }

    let sinks = match cli.sinks().await {
        Ok(sinks) => sinks,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };
    let dispatcher = Dispatcher::new(sinks);
    tracing::info!(sinks = ?dispatcher.sink_names().collect::<Vec<_>>(), "starting");

    let result = tokio::select! {
        result = ingest::run(cli.addr, dispatcher.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };
    dispatcher.close().await;

    if let Err(e) = result {
        tracing::error!("server stopped: {e}");
        std::process::exit(1);
    }
}
