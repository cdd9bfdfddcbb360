use thiserror::Error;

/// Error types for the trigger pipeline.
///
/// Configuration and key-loading errors are fatal at startup; classifier and
/// resampling errors are recoverable per scan cycle and only skip the cycle
/// that raised them.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("configuration error in `{field}`: {message}")]
    Config { field: String, message: String },

    #[error("failed to load public key: {0}")]
    KeyLoad(String),

    #[error("audio encoding failed: {0}")]
    Encode(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("filter design failed: {0}")]
    Filter(String),

    #[error("transport closed")]
    TransportClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TriggerError {
    pub fn config(field: &str, message: impl Into<String>) -> Self {
        TriggerError::Config {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TriggerError>;
