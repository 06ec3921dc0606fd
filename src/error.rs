use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// `start()` while the streamer is already running
    #[error("Busy: streamer is already running")]
    Busy,

    /// Push before the track is open, or an operation before a required bind
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Invalid argument: {0}")]
    ArgsError(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

impl AppError {
    /// Whether this is the `NotReady` status a per-frame push reports while no viewer is attached
    pub fn is_not_ready(&self) -> bool {
        matches!(self, AppError::NotReady(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
