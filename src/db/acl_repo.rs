use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::acl::{AclError, AclIdentity, Policy, TokenSource};
use crate::errors::{AppError, AppResult};
use crate::models::acl::{
    NodeIdentity, PolicyCreateRequest, PolicyLink, PolicyResponse, ServiceIdentity, TokenCreateRequest,
    TokenResponse,
};

#[derive(Debug, Clone, FromRow)]
struct DbPolicy {
    id: String,
    name: String,
    description: String,
    rules: String,
    created_at: String,
    modify_index: i64,
}

impl TryFrom<DbPolicy> for PolicyResponse {
    type Error = AppError;

    fn try_from(value: DbPolicy) -> Result<Self, Self::Error> {
        Ok(PolicyResponse {
            create_time: parse_timestamp(&value.created_at)?,
            id: value.id,
            name: value.name,
            description: value.description,
            rules: value.rules,
            modify_index: value.modify_index,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbToken {
    accessor_id: String,
    expiration_time: Option<String>,
}

/// Tokens are looked up by this digest; the secret itself is never stored.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP format
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(AppError::internal(format!("invalid timestamp: {s}")))
}

pub async fn create_policy(pool: &SqlitePool, payload: &PolicyCreateRequest) -> AppResult<PolicyResponse> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("policy name is required"));
    }
    // Rejects unknown resources and bad access levels before anything is stored.
    Policy::parse("", name, &payload.rules)?;

    if fetch_policy_by_name(pool, name).await?.is_some() {
        return Err(AppError::conflict(format!("policy {name:?} already exists")));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query("INSERT INTO acl_policies (id, name, description, rules, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(&payload.description)
        .bind(&payload.rules)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;

    tracing::info!(policy_id = %id, name, "policy created");

    fetch_policy(pool, &id)
        .await?
        .ok_or_else(|| AppError::internal("policy vanished after insert"))
}

pub async fn list_policies(pool: &SqlitePool) -> AppResult<Vec<PolicyResponse>> {
    let rows = sqlx::query_as::<_, DbPolicy>(
        "SELECT id, name, description, rules, created_at, modify_index FROM acl_policies ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(PolicyResponse::try_from).collect()
}

async fn fetch_policy(pool: &SqlitePool, id: &str) -> AppResult<Option<PolicyResponse>> {
    let row = sqlx::query_as::<_, DbPolicy>(
        "SELECT id, name, description, rules, created_at, modify_index FROM acl_policies WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(PolicyResponse::try_from).transpose()
}

async fn fetch_policy_by_name(pool: &SqlitePool, name: &str) -> AppResult<Option<PolicyResponse>> {
    let row = sqlx::query_as::<_, DbPolicy>(
        "SELECT id, name, description, rules, created_at, modify_index FROM acl_policies WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    row.map(PolicyResponse::try_from).transpose()
}

async fn resolve_policy_link(pool: &SqlitePool, link: &PolicyLink) -> AppResult<PolicyResponse> {
    let found = match (&link.id, &link.name) {
        (Some(id), _) => fetch_policy(pool, id).await?,
        (None, Some(name)) => fetch_policy_by_name(pool, name).await?,
        (None, None) => return Err(AppError::bad_request("policy link needs an ID or a Name")),
    };

    found.ok_or_else(|| {
        let what = link.id.as_deref().or(link.name.as_deref()).unwrap_or_default();
        AppError::bad_request(format!("no such policy: {what}"))
    })
}

/// Creates a token and returns it with its secret. The secret is not
/// recoverable afterwards.
pub async fn create_token(pool: &SqlitePool, payload: &TokenCreateRequest) -> AppResult<TokenResponse> {
    let mut policies = Vec::with_capacity(payload.policies.len());
    for link in &payload.policies {
        let policy = resolve_policy_link(pool, link).await?;
        if !policies.iter().any(|p: &PolicyResponse| p.id == policy.id) {
            policies.push(policy);
        }
    }

    if payload.service_identities.iter().any(|s| s.service_name.trim().is_empty()) {
        return Err(AppError::bad_request("service identity needs a ServiceName"));
    }
    if payload.node_identities.iter().any(|n| n.node_name.trim().is_empty()) {
        return Err(AppError::bad_request("node identity needs a NodeName"));
    }

    let now = Utc::now();
    let expiration_time = match payload.expiration_ttl {
        Some(ttl) if ttl <= 0 => return Err(AppError::bad_request("ExpirationTTL must be positive")),
        Some(ttl) => Some(
            Duration::try_seconds(ttl)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| AppError::bad_request("ExpirationTTL out of range"))?,
        ),
        None => None,
    };

    let accessor_id = Uuid::new_v4().to_string();
    let secret_id = Uuid::new_v4().to_string();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO acl_tokens (accessor_id, secret_hash, description, expiration_time, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&accessor_id)
    .bind(hash_secret(&secret_id))
    .bind(&payload.description)
    .bind(expiration_time.map(|t| t.to_rfc3339()))
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for policy in &policies {
        sqlx::query("INSERT INTO acl_token_policies (accessor_id, policy_id) VALUES (?, ?)")
            .bind(&accessor_id)
            .bind(&policy.id)
            .execute(&mut *tx)
            .await?;
    }
    for identity in &payload.service_identities {
        sqlx::query("INSERT OR IGNORE INTO acl_token_service_identities (accessor_id, service_name) VALUES (?, ?)")
            .bind(&accessor_id)
            .bind(identity.service_name.trim())
            .execute(&mut *tx)
            .await?;
    }
    for identity in &payload.node_identities {
        sqlx::query("INSERT OR IGNORE INTO acl_token_node_identities (accessor_id, node_name) VALUES (?, ?)")
            .bind(&accessor_id)
            .bind(identity.node_name.trim())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!(%accessor_id, policies = policies.len(), "token created");

    Ok(TokenResponse {
        accessor_id,
        secret_id,
        description: payload.description.clone(),
        policies: policies
            .into_iter()
            .map(|p| PolicyLink {
                id: Some(p.id),
                name: Some(p.name),
            })
            .collect(),
        service_identities: payload
            .service_identities
            .iter()
            .map(|s| ServiceIdentity {
                service_name: s.service_name.trim().to_string(),
            })
            .collect(),
        node_identities: payload
            .node_identities
            .iter()
            .map(|n| NodeIdentity {
                node_name: n.node_name.trim().to_string(),
            })
            .collect(),
        expiration_time,
        create_time: now,
    })
}

/// Token lookups backed by the SQLite ACL tables.
#[derive(Clone)]
pub struct SqliteTokenSource {
    pool: SqlitePool,
}

impl SqliteTokenSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_identity(&self, token: DbToken) -> Result<AclIdentity, AclError> {
        let rows = sqlx::query_as::<_, DbPolicy>(
            "SELECT p.id, p.name, p.description, p.rules, p.created_at, p.modify_index \
             FROM acl_policies p JOIN acl_token_policies tp ON tp.policy_id = p.id \
             WHERE tp.accessor_id = ? ORDER BY p.name",
        )
        .bind(&token.accessor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AclError::source)?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let mut policy = Policy::parse(row.id, row.name, &row.rules)?;
            policy.description = row.description;
            policies.push(policy);
        }

        let service_identities: Vec<String> = sqlx::query_scalar(
            "SELECT service_name FROM acl_token_service_identities WHERE accessor_id = ? ORDER BY service_name",
        )
        .bind(&token.accessor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AclError::source)?;

        let node_identities: Vec<String> = sqlx::query_scalar(
            "SELECT node_name FROM acl_token_node_identities WHERE accessor_id = ? ORDER BY node_name",
        )
        .bind(&token.accessor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AclError::source)?;

        let expiration_time = token
            .expiration_time
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_timestamp)
            .transpose()
            .map_err(AclError::source)?;

        Ok(AclIdentity {
            accessor_id: token.accessor_id,
            policies,
            service_identities,
            node_identities,
            expiration_time,
        })
    }
}

#[async_trait]
impl TokenSource for SqliteTokenSource {
    async fn identity_from_secret(&self, secret: &str) -> Result<Option<AclIdentity>, AclError> {
        let token = sqlx::query_as::<_, DbToken>(
            "SELECT accessor_id, expiration_time FROM acl_tokens WHERE secret_hash = ?",
        )
        .bind(hash_secret(secret))
        .fetch_optional(&self.pool)
        .await
        .map_err(AclError::source)?;

        match token {
            Some(token) => self.load_identity(token).await.map(Some),
            None => Ok(None),
        }
    }
}
