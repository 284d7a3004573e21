use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no object at key: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
