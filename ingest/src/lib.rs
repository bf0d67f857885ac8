pub mod config;
pub mod errors;
mod handler;
pub mod metrics_defs;

pub use errors::IngestError;
pub use handler::IngestService;

use shared::http::run_http_service;
use shared::request_logger::RequestLogger;
use updater::Dispatcher;

/// Serves updates on `listener` until accepting connections fails.
pub async fn run(listener: config::Listener, dispatcher: Dispatcher) -> Result<(), IngestError> {
    let service = RequestLogger::new(IngestService::new(dispatcher));
    run_http_service(&listener.to_string(), service).await
}
