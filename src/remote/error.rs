//! Error types for the publishing API client.
//!
//! Defines [`RemoteError`] with variants for the three failure families the
//! connection manager cares about, plus a [`RemoteError::class`] method that
//! collapses a concrete error into its [`ErrorClass`] for gate decisions.

use thiserror::Error;

/// Errors that can occur while talking to the publishing service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service could not be reached: DNS failure, connection refused or
    /// reset, a transfer broken mid-flight, or a request timeout.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The service rejected our credential (HTTP 401/403).
    #[error("authorization rejected (status {status})")]
    Unauthorized { status: u16 },

    /// Any other error returned by the API (e.g. 422 validation, 500).
    /// Contains the HTTP status code and the response body message.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be parsed into the expected shape.
    #[error("failed to parse API response: {0}")]
    Parse(String),

    /// The local source file could not be read for upload. Not a
    /// connectivity problem; the item fails without closing the gate.
    #[error("file error: {0}")]
    File(String),
}

/// Coarse classification used by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity is gone; back off and re-probe.
    Unreachable,
    /// Credential is bad; discard it and force re-authentication.
    Unauthorized,
    /// Everything else; logged, no connection state change.
    Other,
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Unreachable(_) => ErrorClass::Unreachable,
            RemoteError::Unauthorized { .. } => ErrorClass::Unauthorized,
            RemoteError::Api { .. } | RemoteError::Parse(_) | RemoteError::File(_) => {
                ErrorClass::Other
            }
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return RemoteError::Unreachable(e.to_string());
        }
        if e.is_decode() {
            return RemoteError::Parse(e.to_string());
        }
        // Body/send errors mid-request behave like a broken transfer.
        RemoteError::Unreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_display() {
        let err = RemoteError::Unreachable("dns error".into());
        assert_eq!(err.to_string(), "service unreachable: dns error");
    }

    #[test]
    fn unauthorized_display() {
        let err = RemoteError::Unauthorized { status: 401 };
        assert_eq!(err.to_string(), "authorization rejected (status 401)");
    }

    #[test]
    fn api_error_display() {
        let err = RemoteError::Api {
            status: 422,
            message: "name taken".into(),
        };
        assert_eq!(err.to_string(), "API error (status 422): name taken");
    }

    #[test]
    fn classification() {
        assert_eq!(
            RemoteError::Unreachable("x".into()).class(),
            ErrorClass::Unreachable
        );
        assert_eq!(
            RemoteError::Unauthorized { status: 403 }.class(),
            ErrorClass::Unauthorized
        );
        assert_eq!(
            RemoteError::Api {
                status: 500,
                message: "boom".into()
            }
            .class(),
            ErrorClass::Other
        );
        assert_eq!(RemoteError::Parse("bad json".into()).class(), ErrorClass::Other);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RemoteError>();
    }
}
