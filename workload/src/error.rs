use kv_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker #{worker} could not connect to {target}: {source}")]
    Connect {
        worker: usize,
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("Worker #{worker} could not be started: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker #{worker} panicked")]
    Panicked { worker: usize },

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}
