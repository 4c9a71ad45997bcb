use thiserror::Error;

/// Errors surfaced to callers of the connection manager.
///
/// Only pool exhaustion and command-channel failures reach the caller
/// synchronously; transport drops, retries and queueing are handled
/// internally and observable via `connection_state` / `connections_info`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection pool exhausted ({max} connections in use)")]
    PoolExhausted { max: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("connection task is no longer running")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
