//! Status taxonomy for tracking operations.
//!
//! No condition here is fatal to the engine: permission and invalid-fix
//! errors terminate the current handling pass, timeouts resolve pending
//! one-shot requests, and network/server errors are surfaced to observers
//! while the engine keeps processing subsequent fixes.

use thiserror::Error;

/// Outcome classification for engine and transmission operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// Location permission has not been granted.
    #[error("location permissions denied")]
    PermissionDenied,

    /// No qualifying fix arrived before the one-shot request timed out.
    #[error("location request timed out")]
    LocationTimeout,

    /// The fix failed validation (coordinate out of range or accuracy <= 0).
    #[error("invalid location")]
    LocationInvalid,

    /// Beacon ranging is unavailable or did not complete in time.
    #[error("bluetooth unavailable")]
    BluetoothUnavailable,

    /// The request never reached the server or the connection failed.
    #[error("network error")]
    NetworkError,

    /// The server responded with a 5xx status.
    #[error("server error ({0})")]
    ServerError(u16),

    /// The server rejected the request as malformed.
    #[error("bad request")]
    BadRequest,

    /// The credentials were missing or rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The server throttled the request.
    #[error("rate limited")]
    RateLimited,

    /// Anything that does not fit the categories above.
    #[error("unknown error")]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Status::PermissionDenied.to_string(), "location permissions denied");
        assert_eq!(Status::ServerError(503).to_string(), "server error (503)");
        assert_eq!(Status::RateLimited.to_string(), "rate limited");
    }
}
