use thiserror::Error;

#[derive(Error, Debug)]
pub enum VadError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("VAD store not found: {0}")]
    StoreNotFound(String),

    #[error("VAD shard not found: {0}")]
    ShardNotFound(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, VadError>;
