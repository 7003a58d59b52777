use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::acl::{AuthorizerContext, Authorizer};
use crate::app::AppState;
use crate::errors::AppError;

pub const TOKEN_HEADER: &str = "X-Consul-Token";

/// Token secret carried by a request: `X-Consul-Token` first, then
/// `Authorization: Bearer`. Empty when neither is present.
pub fn secret_from_headers(headers: &HeaderMap) -> String {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|value| value.to_str().ok()) {
        return token.trim().to_string();
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .unwrap_or_default()
}

/// The resolved authorizer for the calling token.
#[derive(Clone)]
pub struct AclToken {
    pub authz: Arc<dyn Authorizer>,
    pub ctx: AuthorizerContext,
}

#[async_trait]
impl FromRequestParts<AppState> for AclToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let secret = secret_from_headers(&parts.headers);
        let authz = state.resolver.resolve(&secret).await?;

        Ok(AclToken {
            authz,
            ctx: AuthorizerContext::default(),
        })
    }
}
