use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::acl::{AclConfig, Resolver};
use crate::db::acl_repo::SqliteTokenSource;
use crate::errors::AppError;
use crate::routes::{acl, health};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AclConfig>,
    pub resolver: Arc<Resolver>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AclConfig) -> Self {
        let source = Arc::new(SqliteTokenSource::new(pool.clone()));
        let resolver = Resolver::new(config.clone(), source);
        Self {
            pool,
            config: Arc::new(config),
            resolver: Arc::new(resolver),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AclConfig::from_env()?;
    create_app_with_config(pool, config)
}

pub fn create_app_with_config(pool: SqlitePool, config: AclConfig) -> Result<Router, AppError> {
    // Fail at startup rather than on the first request.
    config.default_authorizer()?;

    tracing::info!(
        enabled = config.enabled,
        default_policy = %config.default_policy,
        token_ttl_secs = config.token_ttl.as_secs(),
        "acl configured"
    );

    let state = AppState::new(pool, config);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/api/health", get(health::health))
        .merge(acl::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
