//! Error taxonomy shared by the bridge components

use thiserror::Error;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Failures obtaining a usable credential for the remote service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Refresh failed for a reason that may go away (network, upstream hiccup)
    #[error("credential refresh failed: {0}")]
    Transient(String),

    /// The refresh token was rejected or revoked; a new login is required
    #[error("Spotify authorization expired, re-authentication required")]
    Unauthorized,
}

/// Failures reported by the remote music service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Spotify unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The access token was rejected even after a refresh
    #[error("access token rejected by Spotify")]
    CredentialExpired,

    #[error("no playback device available")]
    NoDeviceAvailable,

    #[error("unexpected Spotify response (status {status}): {message}")]
    Unexpected { status: u16, message: String },
}

/// Failures talking to the local media player over D-Bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("local player is not connected")]
    Disconnected,

    #[error("bus call failed: {0}")]
    CallFailed(String),
}

/// Command arguments rejected before any I/O
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl BridgeError {
    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(AuthError::Unauthorized) => "REFRESH_TOKEN_REVOKED",
            Self::Auth(AuthError::Transient(_)) => "REFRESH_FAILED",
            Self::Upstream(UpstreamError::RateLimited { .. }) => "RATE_LIMITED",
            Self::Upstream(UpstreamError::Unavailable(_)) => "SPOTIFY_UNAVAILABLE",
            Self::Upstream(UpstreamError::NotFound(_)) => "NOT_FOUND",
            Self::Upstream(UpstreamError::Forbidden(_)) => "FORBIDDEN",
            Self::Upstream(UpstreamError::CredentialExpired) => "TOKEN_EXPIRED",
            Self::Upstream(UpstreamError::NoDeviceAvailable) => "NO_DEVICE",
            Self::Upstream(UpstreamError::Unexpected { .. }) => "SPOTIFY_ERROR",
            Self::Bus(BusError::Disconnected) => "PLAYER_DISCONNECTED",
            Self::Bus(BusError::CallFailed(_)) => "PLAYER_CALL_FAILED",
            Self::Validation(_) => "INVALID_REQUEST",
        }
    }
}
