//! Error types for the Pulsewatch client

use thiserror::Error;

/// Failures surfaced by the request client.
///
/// None of these are thrown across the public API: every call returns them as
/// the `Err` side of [`ApiResult`] so callers must branch on them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No usable credential; the user has to log in (again)
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The server rejected the credential mid-call
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The call did not settle within the request timeout
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response (DNS, refused, reset, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body was not a valid envelope
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The envelope came back with `success: false`
    #[error("{0}")]
    Rejected(String),

    /// Malformed endpoint or options
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The credential could not be written to the store
    #[error("Failed to save credential: {0}")]
    Store(String),
}

impl ApiError {
    /// Gateway-class failures: the backend could not be reached through the
    /// primary path at all.
    pub fn is_gateway(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, message } => {
                *status == 502 || message.contains("Bad Gateway")
            }
            _ => false,
        }
    }

    /// Whether simply repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Whether the caller has to obtain a fresh credential through login.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            ApiError::AuthenticationRequired | ApiError::AuthenticationFailed
        )
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        if self.requires_login() {
            "Your session has expired, please log in again".to_string()
        } else if matches!(self, ApiError::Timeout) {
            "The request timed out, please retry".to_string()
        } else if self.is_retryable() {
            "The server is unreachable, please retry".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err.to_string())
    }
}

/// Result type for request client operations
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors raised by the live channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Opening the connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the handshake credential
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No credential stored, nothing to authenticate the handshake with
    #[error("No credential available")]
    NoCredential,

    /// The open connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server closed the connection
    #[error("Connection closed")]
    Closed,

    /// The handshake did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// Not currently connected to the server
    #[error("Not connected")]
    NotConnected,

    /// Every automatic reconnection attempt failed
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Failed to serialize/deserialize a frame
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    /// Terminal errors stop automatic reconnection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::ReconnectExhausted { .. })
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Errors from a credential store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("no config directory available for the credential store")]
    NoLocation,
}
