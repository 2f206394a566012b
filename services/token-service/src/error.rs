//! HTTP error mapping
//!
//! Every failed request answers with `{"error": {"type", "message"}}`. The
//! status comes from the underlying core error; the flow step, when there is
//! one, goes into the message.

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use token_manager::{Error, FlowError};

/// Error returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Core(#[from] Error),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn core(&self) -> Option<&Error> {
        match self {
            ApiError::Flow(e) => Some(&e.error),
            ApiError::Core(e) => Some(e),
            ApiError::BadRequest(_) => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        let Some(error) = self.core() else {
            return StatusCode::BAD_REQUEST;
        };
        match error {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::StateNotFound => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::StateExpired { .. } => StatusCode::GONE,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Provider(e) => match e {
                oauth_client::Error::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
                oauth_client::Error::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
                oauth_client::Error::TokenExchange { .. }
                | oauth_client::Error::Revocation { .. }
                | oauth_client::Error::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        let Some(error) = self.core() else {
            return "validation_error";
        };
        match error {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::StateNotFound => "state_not_found",
            Error::StateExpired { .. } => "state_expired",
            Error::Storage(_) => "storage_error",
            Error::Provider(e) => match e {
                oauth_client::Error::TokenExchange { .. } => "token_exchange_error",
                oauth_client::Error::Revocation { .. } => "revocation_error",
                oauth_client::Error::Transport(_) => "transport_error",
                oauth_client::Error::MalformedResponse(_) => "malformed_response",
                oauth_client::Error::InvalidConfig(_) => "configuration_error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (
            self.status(),
            [(CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// JSON request body whose rejections use the API error envelope.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                ApiError::BadRequest(format!("invalid request body: {}", rejection.body_text()))
            })?;
        Ok(Self(value))
    }
}
