use thiserror::Error;

pub type Result<T> = std::result::Result<T, XApiError>;

#[derive(Debug, Error)]
pub enum XApiError {
    #[error("Network error: {0}")]
    Network(String),

    /// 401/403/429: the guest token was rejected or rate limited.
    #[error("Auth error (status {status})")]
    Auth { status: u16 },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected content type: {0}")]
    ContentType(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing field in response: {0}")]
    MissingField(&'static str),
}

impl From<reqwest::Error> for XApiError {
    fn from(err: reqwest::Error) -> Self {
        XApiError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for XApiError {
    fn from(err: serde_json::Error) -> Self {
        XApiError::Parse(err.to_string())
    }
}
