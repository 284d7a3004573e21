use thiserror::Error;

#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed socks5 message: {0}")]
    Protocol(String),

    #[error("upstream rejected connect, REP=0x{0:02x}")]
    UpstreamRefused(u8),

    #[error("upstream offered no acceptable auth method")]
    UpstreamAuthUnsupported,

    #[error("upstream username/password auth failed")]
    UpstreamAuthFailed,

    #[error("circuit breaker open, rejecting connection")]
    BreakerOpen,

    #[error("invalid upstream proxy url: {0}")]
    InvalidUpstreamUrl(String),
}

pub type Result<T> = std::result::Result<T, Socks5Error>;
