use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Render helper failed to run: {0}")]
    Spawn(String),

    #[error("Render timed out after {0}ms")]
    Timeout(u64),

    /// Helper stdout was absent or not the expected JSON object.
    #[error("Malformed render envelope: {0}")]
    Envelope(String),
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Network(err.to_string())
    }
}
