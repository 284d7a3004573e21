use thiserror::Error;

/// Error kinds surfaced by the core (see spec §7). Archivers and the queue
/// translate into these so the worker has one propagation policy.
#[derive(Error, Debug)]
pub enum ArkerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("browser process leak: {0}")]
    ProcessLeak(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArkerError {
    /// Whether the queue primitive should retry this failure (anything but
    /// a deliberate cancellation or a caller-facing validation problem).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ArkerError::Invalid(_) | ArkerError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ArkerError>;
