//! HTTP API for gateways, the authorization flow, and issued tokens
//!
//! Endpoints:
//! - GET    /authorize/{gateway_id}  redirect (303) to the provider
//! - GET    /callback?code=&state=   finish the flow, return the new token
//! - POST   /refresh {token_id}      refresh a token in place
//! - POST   /revoke {token_id}       revoke at the provider, then delete
//! - GET    /gateways                list gateways (secrets never returned)
//! - POST   /gateways                register a gateway
//! - PATCH  /gateways/{id}           partial update
//! - DELETE /gateways/{id}           remove a gateway
//! - GET    /tokens                  list issued tokens
//! - GET    /tokens/{id}             one token
//! - DELETE /tokens/{id}             discard locally without revoking

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, patch, post};
use serde::Deserialize;
use tracing::info;

use common::Secret;
use token_manager::{AttemptState, FlowCoordinator, Gateway, GatewayUpdate, IssuedToken};

use crate::error::{ApiError, JsonBody};
use crate::metrics;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    flow: Arc<FlowCoordinator>,
}

impl ApiState {
    pub fn new(flow: Arc<FlowCoordinator>) -> Self {
        Self { flow }
    }
}

/// Build the API router.
pub fn build_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/authorize/{gateway_id}", get(authorize))
        .route("/callback", get(callback))
        .route("/refresh", post(refresh))
        .route("/revoke", post(revoke))
        .route("/gateways", get(list_gateways).post(add_gateway))
        .route("/gateways/{id}", patch(update_gateway).delete(remove_gateway))
        .route("/tokens", get(list_tokens))
        .route("/tokens/{id}", get(get_token).delete(discard_token))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id: {raw}")))
}

/// Gateway view. The client secret is never included.
fn gateway_json(gateway: &Gateway) -> serde_json::Value {
    serde_json::json!({
        "id": gateway.id,
        "name": gateway.name,
        "client_id": gateway.client_id,
    })
}

/// Token view. The access token is included so it can be copied out; the
/// refresh token stays server-side.
fn token_json(token: &IssuedToken) -> serde_json::Value {
    serde_json::json!({
        "id": token.id,
        "gateway_id": token.gateway_id,
        "gateway_name": token.gateway_name,
        "access_token": token.access_token.expose(),
        "token_type": token.token_type,
        "has_refresh_token": token.refresh_token.is_some(),
        "expires_at": token.expires_at,
        "created_at": token.created_at,
    })
}

/// GET /authorize/{gateway_id}: start a flow and redirect to the provider.
async fn authorize(
    State(state): State<ApiState>,
    Path(gateway_id): Path<String>,
) -> Result<Redirect, ApiError> {
    let gateway_id = parse_id(&gateway_id)?;
    let url = state.flow.begin_authorization(gateway_id).await?;
    Ok(Redirect::to(url.as_str()))
}

/// Query parameters the provider sends back.
#[derive(Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /callback: consume the state, exchange the code, store the token.
async fn callback(
    State(state): State<ApiState>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    if let Some(error) = params.error {
        // The user denied access or the provider refused; drop the attempt
        if !params.state.is_empty() {
            state.flow.abandon_authorization(&params.state).await?;
        }
        metrics::record_authorization(AttemptState::Failed);
        let detail = params
            .error_description
            .map(|d| format!("{error}: {d}"))
            .unwrap_or(error);
        return Err(ApiError::BadRequest(format!(
            "provider returned an error: {detail}"
        )));
    }

    let result = state
        .flow
        .complete_authorization(&params.code, &params.state)
        .await;
    metrics::record_authorization(AttemptState::of(&result));

    let token = result?;
    Ok(json_response(StatusCode::OK, token_json(&token)))
}

/// Body for refresh and revoke.
#[derive(Deserialize)]
struct TokenRequest {
    token_id: u64,
}

/// POST /refresh: refresh a token in place.
async fn refresh(
    State(state): State<ApiState>,
    JsonBody(body): JsonBody<TokenRequest>,
) -> Result<Response, ApiError> {
    let result = state.flow.refresh(body.token_id).await;
    metrics::record_token_operation("refresh", result.is_ok());

    let token = result?;
    Ok(json_response(StatusCode::OK, token_json(&token)))
}

/// POST /revoke: revoke at the provider, then delete the record.
async fn revoke(
    State(state): State<ApiState>,
    JsonBody(body): JsonBody<TokenRequest>,
) -> Result<Response, ApiError> {
    let result = state.flow.revoke(body.token_id).await;
    metrics::record_token_operation("revoke", result.is_ok());

    result?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "token_id": body.token_id,
            "status": "revoked"
        }),
    ))
}

/// GET /gateways
async fn list_gateways(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let gateways = state.flow.gateways().list().await?;
    let gateways: Vec<_> = gateways.iter().map(gateway_json).collect();
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "gateways": gateways }),
    ))
}

#[derive(Deserialize)]
struct NewGatewayRequest {
    name: String,
    client_id: String,
    client_secret: Secret<String>,
}

/// POST /gateways
async fn add_gateway(
    State(state): State<ApiState>,
    JsonBody(body): JsonBody<NewGatewayRequest>,
) -> Result<Response, ApiError> {
    let gateway = state
        .flow
        .gateways()
        .add(body.name, body.client_id, body.client_secret)
        .await?;
    Ok(json_response(StatusCode::CREATED, gateway_json(&gateway)))
}

/// PATCH /gateways/{id}
async fn update_gateway(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    JsonBody(update): JsonBody<GatewayUpdate>,
) -> Result<Response, ApiError> {
    let gateway = state.flow.gateways().update(parse_id(&id)?, update).await?;
    Ok(json_response(StatusCode::OK, gateway_json(&gateway)))
}

/// DELETE /gateways/{id}: tokens issued through it are kept.
async fn remove_gateway(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let gateway = state.flow.gateways().remove(parse_id(&id)?).await?;
    info!(gateway_id = gateway.id, "gateway removed via API");
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "id": gateway.id,
            "status": "removed"
        }),
    ))
}

/// GET /tokens
async fn list_tokens(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let tokens = state.flow.tokens().list().await?;
    let tokens: Vec<_> = tokens.iter().map(token_json).collect();
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "tokens": tokens }),
    ))
}

/// GET /tokens/{id}
async fn get_token(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let token = state.flow.tokens().get(parse_id(&id)?).await?;
    Ok(json_response(StatusCode::OK, token_json(&token)))
}

/// DELETE /tokens/{id}: remove locally without contacting the provider.
async fn discard_token(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let token = state.flow.discard(parse_id(&id)?).await?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "token_id": token.id,
            "status": "discarded"
        }),
    ))
}
