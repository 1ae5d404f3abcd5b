use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum AppError {
    #[error("TOML config file error: {0}")]
    TomlConfig(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid device specification: {0}")]
    InvalidDevice(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image loading failed: {0}")]
    ImageLoad(String),

    #[error("YOLO inference error: {0}")]
    Inference(String),

    /// Remote link invalid, device unavailable, file unreadable
    #[error("Video source could not be opened: {0}")]
    SourceResolution(String),

    /// Read failure in the middle of a stream
    #[error("Video stream read failed: {0}")]
    StreamRead(String),

    /// Relay credentials unobtainable or negotiation failed
    #[error("Peer session setup failed: {0}")]
    PeerSessionSetup(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type with default AppError
pub type Result<T, E = AppError> = std::result::Result<T, E>;
