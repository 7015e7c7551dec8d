use thiserror::Error;

#[derive(Error, Debug)]
pub enum VesperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl VesperError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }
}

impl From<walkdir::Error> for VesperError {
    fn from(e: walkdir::Error) -> Self {
        Self::Io(e.into())
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, VesperError>;
