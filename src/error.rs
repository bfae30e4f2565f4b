use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DVRIPError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Short reads and bad magic bytes. Fatal to the exchange in progress.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DVRIPError {
    /// Whether a download attempt that failed with this error may be repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            DVRIPError::Timeout(_) | DVRIPError::ConnectionError(_) => true,
            DVRIPError::IoError(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DVRIPError>;
