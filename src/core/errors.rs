use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Non-success REST response. Carries the status, its canonical
    /// description and the raw body so callers can surface all three.
    #[error("API error: {status} {description} - {body}")]
    ApiError {
        status: u16,
        description: String,
        body: String,
    },

    #[error("Rate limit still exceeded after {attempts} attempts: {body}")]
    RateLimitExceeded { attempts: u32, body: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("Unsupported order: {0}")]
    UnsupportedOrder(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("User data session has not been started")]
    SessionNotStarted,

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Brokerage is not connected")]
    NotConnected,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// Builds an [`ExchangeError::ApiError`] from a raw status code and body.
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        let description = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown status")
            .to_string();
        Self::ApiError {
            status,
            description,
            body: body.into(),
        }
    }

    /// True when the exchange rejected the request itself (4xx other than 429).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if (400..500).contains(status) && *status != 429)
    }
}
