use anyhow::Context;
use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use mesh_acl::acl::AclConfig;
use mesh_acl::create_app_with_config;
use mesh_acl::db::acl_repo;
use mesh_acl::models::acl::{PolicyCreateRequest, PolicyLink, TokenCreateRequest};

async fn setup_pool() -> Result<(TempDir, SqlitePool)> {
    // create temp dir and sqlite db
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    // run migrations from crate migrations folder
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

/// Seeds a management token directly in the database and returns its secret.
async fn bootstrap_token(pool: &SqlitePool) -> Result<String> {
    let policy = acl_repo::create_policy(
        pool,
        &PolicyCreateRequest {
            name: "global-management".into(),
            description: "bootstrap".into(),
            rules: r#"{"acl": "write", "operator": "write"}"#.into(),
        },
    )
    .await?;

    let token = acl_repo::create_token(
        pool,
        &TokenCreateRequest {
            description: "bootstrap".into(),
            policies: vec![PolicyLink {
                id: Some(policy.id),
                name: None,
            }],
            ..Default::default()
        },
    )
    .await?;

    Ok(token.secret_id)
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Consul-Token", token);
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)
            .with_context(|| format!("non-JSON body: {}", String::from_utf8_lossy(&body_bytes)))?
    };
    Ok((status, value))
}

fn deny_config() -> Result<AclConfig> {
    Ok(AclConfig::default().with_default_policy("deny")?)
}

#[tokio::test]
async fn full_acl_flow() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let management = bootstrap_token(&pool).await?;
    let app = create_app_with_config(pool.clone(), deny_config()?)?;

    // -- anonymous may not manage ACLs
    let policy_body = json!({
        "Name": "web-db-read",
        "Description": "read the db service",
        "Rules": r#"{"service": {"db": {"policy": "read"}}}"#
    });
    let (status, body) = send(&app, "PUT", "/v1/acl/policy", None, Some(policy_body.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"], "permission_denied");

    // -- management token creates the policy
    let (status, body) = send(&app, "PUT", "/v1/acl/policy", Some(&management), Some(policy_body)).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["Name"], "web-db-read");
    assert!(body["ID"].as_str().is_some_and(|id| !id.is_empty()));

    // -- a token with that policy plus a service identity
    let token_body = json!({
        "Description": "web app",
        "Policies": [{ "Name": "web-db-read" }],
        "ServiceIdentities": [{ "ServiceName": "web" }]
    });
    let (status, body) = send(&app, "PUT", "/v1/acl/token", Some(&management), Some(token_body)).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let secret = body["SecretID"].as_str().context("missing SecretID")?.to_string();
    assert!(body["AccessorID"].as_str().is_some());
    assert_eq!(body["Policies"][0]["Name"], "web-db-read");

    // -- the web token may not manage ACLs either
    let (status, _) = send(&app, "GET", "/v1/acl/policies", Some(&secret), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, "GET", "/v1/acl/policies", Some(&management), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    // -- batch authorization
    let checks = json!([
        { "Resource": "service", "Segment": "web", "Access": "write" },
        { "Resource": "service", "Segment": "web-sidecar-proxy", "Access": "write" },
        { "Resource": "service", "Segment": "db", "Access": "write" },
        { "Resource": "service", "Segment": "db", "Access": "read" },
        { "Resource": "node", "Segment": "n1", "Access": "read" },
        { "Resource": "key", "Segment": "app/config", "Access": "read" },
        { "Resource": "acl", "Access": "read" }
    ]);
    let (status, body) = send(&app, "POST", "/v1/internal/acl/authorize", Some(&secret), Some(checks)).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let allowed: Vec<bool> = body
        .as_array()
        .context("expected array")?
        .iter()
        .map(|item| item["Allow"].as_bool().unwrap_or(false))
        .collect();
    assert_eq!(allowed, vec![true, true, false, true, true, false, false]);
    assert_eq!(body[0]["Resource"], "service");
    assert_eq!(body[0]["Segment"], "web");

    Ok(())
}

#[tokio::test]
async fn unknown_and_root_tokens_are_rejected() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = create_app_with_config(pool, deny_config()?)?;
    let checks = json!([{ "Resource": "service", "Segment": "web", "Access": "read" }]);

    let (status, body) = send(&app, "POST", "/v1/internal/acl/authorize", Some("not-a-token"), Some(checks.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().is_some_and(|m| m.contains("ACL not found")), "{body}");

    let (status, _) = send(&app, "POST", "/v1/internal/acl/authorize", Some("manage"), Some(checks.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Anonymous falls back to the deny default.
    let (status, body) = send(&app, "POST", "/v1/internal/acl/authorize", None, Some(checks)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["Allow"], false);
    Ok(())
}

#[tokio::test]
async fn bearer_header_is_accepted() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let management = bootstrap_token(&pool).await?;
    let app = create_app_with_config(pool, deny_config()?)?;

    let req = Request::builder()
        .method("GET")
        .uri("/v1/acl/policies")
        .header("authorization", format!("Bearer {}", management))
        .body(Body::empty())?;
    let resp: Response = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_bad_requests() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let management = bootstrap_token(&pool).await?;
    let app = create_app_with_config(pool, deny_config()?)?;

    let bad_rules = json!({ "Name": "bad", "Rules": r#"{"service": {"web": {"policy": "list"}}}"# });
    let (status, _) = send(&app, "PUT", "/v1/acl/policy", Some(&management), Some(bad_rules)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown_resource = json!({ "Name": "bad2", "Rules": r#"{"vault": {"x": {"policy": "read"}}}"# });
    let (status, _) = send(&app, "PUT", "/v1/acl/policy", Some(&management), Some(unknown_resource)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let duplicate = json!({ "Name": "global-management", "Rules": "" });
    let (status, _) = send(&app, "PUT", "/v1/acl/policy", Some(&management), Some(duplicate)).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let missing_policy = json!({ "Policies": [{ "Name": "does-not-exist" }] });
    let (status, _) = send(&app, "PUT", "/v1/acl/token", Some(&management), Some(missing_policy)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let checks = json!([
        { "Resource": "service", "Segment": "web", "Access": "read" },
        { "Resource": "operator", "Access": "list" }
    ]);
    let (status, body) = send(&app, "POST", "/v1/internal/acl/authorize", Some(&management), Some(checks)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let checks = json!([{ "Resource": "vault", "Segment": "x", "Access": "read" }]);
    let (status, _) = send(&app, "POST", "/v1/internal/acl/authorize", Some(&management), Some(checks)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_many: Vec<Value> = (0..65)
        .map(|i| json!({ "Resource": "key", "Segment": format!("k{i}"), "Access": "read" }))
        .collect();
    let (status, _) = send(&app, "POST", "/v1/internal/acl/authorize", Some(&management), Some(Value::Array(too_many))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn expiring_tokens_carry_expiration_time() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let management = bootstrap_token(&pool).await?;
    let app = create_app_with_config(pool, deny_config()?)?;

    let body = json!({ "NodeIdentities": [{ "NodeName": "n1" }], "ExpirationTTL": 600 });
    let (status, body) = send(&app, "PUT", "/v1/acl/token", Some(&management), Some(body)).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["ExpirationTime"].is_string());
    let secret = body["SecretID"].as_str().context("missing SecretID")?.to_string();

    let checks = json!([
        { "Resource": "node", "Segment": "n1", "Access": "write" },
        { "Resource": "node", "Segment": "n2", "Access": "write" }
    ]);
    let (status, body) = send(&app, "POST", "/v1/internal/acl/authorize", Some(&secret), Some(checks)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["Allow"], true);
    assert_eq!(body[1]["Allow"], false);

    let bad_ttl = json!({ "ExpirationTTL": 0 });
    let (status, _) = send(&app, "PUT", "/v1/acl/token", Some(&management), Some(bad_ttl)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn oversized_expiration_ttl_is_rejected() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let management = bootstrap_token(&pool).await?;
    let app = create_app_with_config(pool, deny_config()?)?;

    for ttl in [i64::MAX / 1000 + 1, 9_000_000_000_000, i64::MAX] {
        let body = json!({ "Description": "too long", "ExpirationTTL": ttl });
        let (status, body) = send(&app, "PUT", "/v1/acl/token", Some(&management), Some(body)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "ttl {ttl}: {body}");
        assert_eq!(body["error"], "bad_request");
    }

    let body = json!({ "ExpirationTTL": 3600 });
    let (status, body) = send(&app, "PUT", "/v1/acl/token", Some(&management), Some(body)).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(())
}
