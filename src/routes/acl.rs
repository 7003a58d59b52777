//! ACL management and the internal batch authorization endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::acl::{enforce, EnforceAccess, Resource};
use crate::app::AppState;
use crate::db::acl_repo;
use crate::errors::{AppError, AppResult};
use crate::models::acl::{
    AuthorizationRequest, AuthorizationResponse, PolicyCreateRequest, PolicyResponse, TokenCreateRequest,
    TokenResponse,
};
use crate::token::AclToken;

/// Upper bound on checks in one authorize call.
pub const MAX_AUTHORIZATION_REQUESTS: usize = 64;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/acl/policy", put(create_policy))
        .route("/v1/acl/policies", get(list_policies))
        .route("/v1/acl/token", put(create_token))
        .route("/v1/internal/acl/authorize", post(authorize))
}

#[utoipa::path(
    put,
    path = "/v1/acl/policy",
    tag = "ACL",
    request_body = PolicyCreateRequest,
    responses(
        (status = 201, description = "Policy created", body = PolicyResponse),
        (status = 400, description = "Invalid rules"),
        (status = 403, description = "Permission denied"),
    ),
    security(("consul_token" = []))
)]
pub async fn create_policy(
    State(state): State<AppState>,
    token: AclToken,
    Json(payload): Json<PolicyCreateRequest>,
) -> AppResult<(StatusCode, Json<PolicyResponse>)> {
    token.authz.acl_write(&token.ctx).require(|| "acl:write".to_string())?;

    let policy = acl_repo::create_policy(&state.pool, &payload).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

#[utoipa::path(
    get,
    path = "/v1/acl/policies",
    tag = "ACL",
    responses(
        (status = 200, description = "All policies", body = [PolicyResponse]),
        (status = 403, description = "Permission denied"),
    ),
    security(("consul_token" = []))
)]
pub async fn list_policies(State(state): State<AppState>, token: AclToken) -> AppResult<Json<Vec<PolicyResponse>>> {
    token.authz.acl_read(&token.ctx).require(|| "acl:read".to_string())?;

    Ok(Json(acl_repo::list_policies(&state.pool).await?))
}

#[utoipa::path(
    put,
    path = "/v1/acl/token",
    tag = "ACL",
    request_body = TokenCreateRequest,
    responses(
        (status = 201, description = "Token created", body = TokenResponse),
        (status = 400, description = "Unknown policy or bad identity"),
        (status = 403, description = "Permission denied"),
    ),
    security(("consul_token" = []))
)]
pub async fn create_token(
    State(state): State<AppState>,
    token: AclToken,
    Json(payload): Json<TokenCreateRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    token.authz.acl_write(&token.ctx).require(|| "acl:write".to_string())?;

    let created = acl_repo::create_token(&state.pool, &payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Runs each check against the caller's token. `Default` answers are
/// resolved with the configured default policy.
#[utoipa::path(
    post,
    path = "/v1/internal/acl/authorize",
    tag = "ACL",
    request_body = [AuthorizationRequest],
    responses(
        (status = 200, description = "One answer per request, in order", body = [AuthorizationResponse]),
        (status = 400, description = "Unknown resource or access level"),
        (status = 403, description = "Token not found"),
    ),
    security(("consul_token" = []))
)]
pub async fn authorize(
    State(state): State<AppState>,
    token: AclToken,
    Json(requests): Json<Vec<AuthorizationRequest>>,
) -> AppResult<Json<Vec<AuthorizationResponse>>> {
    if requests.len() > MAX_AUTHORIZATION_REQUESTS {
        return Err(AppError::bad_request(format!(
            "at most {MAX_AUTHORIZATION_REQUESTS} authorization requests are allowed, got {}",
            requests.len()
        )));
    }

    let default_allow = state.config.default_allow();
    let mut responses = Vec::with_capacity(requests.len());

    for request in requests {
        let resource: Resource = request.resource.parse()?;
        let access: EnforceAccess = request.access.parse()?;
        let decision = enforce(token.authz.as_ref(), resource, &request.segment, access, &token.ctx)?;

        responses.push(AuthorizationResponse {
            allow: decision.resolve(default_allow),
            resource: request.resource,
            segment: request.segment,
            access: request.access,
        });
    }

    Ok(Json(responses))
}
