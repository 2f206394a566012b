//! Error types for store and flow operations

use std::fmt;

/// Errors from the stores and the provider client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("state token not found (never issued or already used)")]
    StateNotFound,

    #[error("state token expired after {age_secs}s (ttl {ttl_secs}s)")]
    StateExpired { age_secs: u64, ttl_secs: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Provider(#[from] oauth_client::Error),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of a flow operation, attached to errors surfaced by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    LoadGateway,
    IssueState,
    ValidateState,
    ExchangeCode,
    StoreToken,
    LoadToken,
    RefreshToken,
    ReplaceToken,
    RevokeToken,
    RemoveToken,
}

impl FlowStep {
    pub fn label(&self) -> &'static str {
        match self {
            FlowStep::LoadGateway => "load_gateway",
            FlowStep::IssueState => "issue_state",
            FlowStep::ValidateState => "validate_state",
            FlowStep::ExchangeCode => "exchange_code",
            FlowStep::StoreToken => "store_token",
            FlowStep::LoadToken => "load_token",
            FlowStep::RefreshToken => "refresh_token",
            FlowStep::ReplaceToken => "replace_token",
            FlowStep::RevokeToken => "revoke_token",
            FlowStep::RemoveToken => "remove_token",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A coordinator failure: which step failed and the underlying error.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {error}")]
pub struct FlowError {
    pub step: FlowStep,
    #[source]
    pub error: Error,
}

impl FlowError {
    pub fn new(step: FlowStep, error: impl Into<Error>) -> Self {
        Self {
            step,
            error: error.into(),
        }
    }

    /// Adapter for `map_err` at a given step.
    pub(crate) fn at<E: Into<Error>>(step: FlowStep) -> impl FnOnce(E) -> Self {
        move |error| Self::new(step, error)
    }
}
