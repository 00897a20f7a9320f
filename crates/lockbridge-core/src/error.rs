use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Topic errors
    #[error("Invalid topic segment: {0}")]
    InvalidTopicPath(String),

    #[error("Topic path too long: {length} bytes exceeds limit of {limit}")]
    TopicTooLong { length: usize, limit: usize },

    // Command errors
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown configuration field: {0}")]
    UnknownField(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid restart reason code: {0}")]
    InvalidRestartReason(u32),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
