use thiserror::Error;

/// Errors that can occur while running the ingest endpoint
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}
