// src/errors.rs
// Boundary error types. Everything past these edges is infallible by
// construction (see SPEC_FULL §7): quality failures resolve to a NoAction
// signal or a rejected decision, never a propagated Err.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VenueStreamError {
    #[error("venue {0} disconnected")]
    Disconnected(String),

    #[error("venue {0} timed out after {1:?}")]
    Timeout(String, std::time::Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum HistoricalStoreError {
    #[error("source {0} exhausted retries")]
    RetriesExhausted(String),

    #[error("source {0} rate limited")]
    RateLimited(String),

    #[error("no data for {symbol} from {source}")]
    NotFound { source: String, symbol: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}
