use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("browser bundle used after cleanup")]
    Cleaned,

    #[error("browser bundle already in state for this transition")]
    WrongState,

    #[error("operation cancelled")]
    Cancelled,

    #[error("page-ready wait timed out")]
    TimedOut,

    #[error(transparent)]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrowserError>;
