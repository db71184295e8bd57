use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown error: {0}")]
    Other(#[from] anyhow::Error),
}
