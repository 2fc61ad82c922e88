use thiserror::Error;

/// Startup-time failures. Any of these stops the process before it serves traffic.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credential: {var} is not set")]
    MissingCredential { var: &'static str },

    #[error("Cannot read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RelayError {
    /// Short error code used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::MissingCredential { .. } => "MISSING_CREDENTIAL",
            RelayError::File { .. } => "FILE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
