use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
