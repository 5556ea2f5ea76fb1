use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Timeout, refused connection, non-2xx where a body was expected,
    /// or a render helper that produced nothing usable.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Auth error (status {status})")]
    Auth { status: u16 },

    /// Malformed JSON, missing fields, unexpected content type.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResolveError {
    /// Only configuration errors abort a resolution.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolveError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Network(format!("io: {err}"))
    }
}
