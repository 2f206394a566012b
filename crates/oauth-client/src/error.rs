//! Error types for provider network operations

/// Errors from OAuth provider operations.
///
/// Protocol failures (the provider answered, but not with success) carry the
/// status and body for diagnostics. `Transport` covers everything where no
/// usable answer arrived: timeouts, refused connections, truncated bodies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token endpoint returned {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("revocation endpoint returned {status}: {body}")]
    Revocation { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether a caller may retry the operation with backoff.
    ///
    /// Only transport failures qualify. Authorization codes are single-use, so
    /// a rejected exchange must restart the flow instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Classify a reqwest failure for the named operation.
    pub(crate) fn transport(operation: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Error::Transport(format!("{operation} {kind}: {err}"))
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(Error::Transport("token exchange timed out".into()).is_retryable());
        assert!(
            !Error::TokenExchange {
                status: 400,
                body: "invalid_grant".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::Revocation {
                status: 500,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!Error::MalformedResponse("missing access_token".into()).is_retryable());
    }

    #[test]
    fn protocol_errors_display_status_and_body() {
        let err = Error::TokenExchange {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("400"), "got: {msg}");
        assert!(msg.contains("invalid_grant"), "got: {msg}");
    }
}
