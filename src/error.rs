//! Error types for the AnyWork client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Live channel error: {0}")]
    Channel(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// True when the failure means the session itself is invalid and the
    /// caller should redirect to the login screen rather than retry.
    pub fn is_auth(&self) -> bool {
        match self {
            ClientError::Auth(_) => true,
            ClientError::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
