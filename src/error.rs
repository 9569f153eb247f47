use thiserror::Error;

/// Message shown when the server cannot be reached at all
pub const CONNECT_MESSAGE: &str = "Unable to connect to the server. Please try again later.";

/// Errors surfaced by the session store and API client
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed or expired token, or a 401/403 from the server.
    /// The token has already been cleared when this is returned.
    #[error("Authentication failed; please log in again")]
    Unauthenticated,

    /// Request payload rejected locally, before any network call
    #[error("{0}")]
    Validation(String),

    /// Non-2xx response other than 401/403
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Login successful but no token returned")]
    MissingToken,

    #[error("{}", CONNECT_MESSAGE)]
    Connect,

    #[error("request failed: {0}")]
    Transport(String),

    /// Valid JSON that does not have the expected record shape
    #[error("unexpected record in response: {0}")]
    UnexpectedShape(String),

    #[error("invalid JSON in response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ApiError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ApiError::Unauthenticated)
    }
}
