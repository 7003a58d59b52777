use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use super::{
    manage_all, static_authorizer_by_name, AclConfig, AclError, Authorizer, ChainedAuthorizer, Policy,
    PolicyAuthorizer,
};

/// Everything a token grants, as loaded from the backing store.
#[derive(Debug, Clone, Default)]
pub struct AclIdentity {
    pub accessor_id: String,
    pub policies: Vec<Policy>,
    pub service_identities: Vec<String>,
    pub node_identities: Vec<String>,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl AclIdentity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.is_some_and(|exp| exp <= now)
    }

    /// Stored policies followed by the synthetic identity policies.
    pub fn effective_policies(&self) -> Vec<Policy> {
        let mut policies = self.policies.clone();
        policies.extend(self.service_identities.iter().map(|s| Policy::for_service_identity(s)));
        policies.extend(self.node_identities.iter().map(|n| Policy::for_node_identity(n)));
        policies
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// `Ok(None)` when no token has this secret.
    async fn identity_from_secret(&self, secret: &str) -> Result<Option<AclIdentity>, AclError>;

    /// Policies applied to requests without a token.
    async fn anonymous_identity(&self) -> Result<Option<AclIdentity>, AclError> {
        Ok(None)
    }
}

#[derive(Clone)]
struct CachedAuthorizer {
    authz: Arc<dyn Authorizer>,
    built_at: Instant,
    expiration_time: Option<DateTime<Utc>>,
}

type CacheCell = Arc<OnceCell<CachedAuthorizer>>;

/// Turns token secrets into authorizer chains and caches the result per
/// secret for `AclConfig::token_ttl`.
pub struct Resolver {
    config: AclConfig,
    source: Arc<dyn TokenSource>,
    cache: Mutex<HashMap<String, CacheCell>>,
}

impl Resolver {
    pub fn new(config: AclConfig, source: Arc<dyn TokenSource>) -> Self {
        Self {
            config,
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }

    pub async fn resolve(&self, secret: &str) -> Result<Arc<dyn Authorizer>, AclError> {
        if !self.config.enabled {
            return Ok(manage_all());
        }
        if static_authorizer_by_name(secret).is_some() {
            return Err(AclError::RootNotAllowed);
        }

        let cell = self.cell_for(secret);
        let result = cell.get_or_try_init(|| self.build(secret)).await;

        match result {
            Ok(cached) => Ok(Arc::clone(&cached.authz)),
            Err(err) => {
                self.forget_cell(secret, &cell);
                Err(err)
            }
        }
    }

    /// Drops the cached chain for one secret.
    pub fn invalidate(&self, secret: &str) {
        self.lock_cache().remove(secret);
    }

    pub fn purge(&self) {
        self.lock_cache().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheCell>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cell to build into. A stale cell is swapped for a fresh
    /// one so concurrent callers still share a single rebuild.
    fn cell_for(&self, secret: &str) -> CacheCell {
        let mut cache = self.lock_cache();
        let stale = cache
            .get(secret)
            .and_then(|cell| cell.get())
            .is_some_and(|cached| self.is_stale(cached));
        if stale {
            cache.remove(secret);
        }
        Arc::clone(cache.entry(secret.to_string()).or_default())
    }

    fn forget_cell(&self, secret: &str, cell: &CacheCell) {
        let mut cache = self.lock_cache();
        if cache.get(secret).is_some_and(|current| Arc::ptr_eq(current, cell)) {
            cache.remove(secret);
        }
    }

    fn is_stale(&self, cached: &CachedAuthorizer) -> bool {
        cached.built_at.elapsed() >= self.config.token_ttl
            || cached.expiration_time.is_some_and(|exp| exp <= Utc::now())
    }

    async fn build(&self, secret: &str) -> Result<CachedAuthorizer, AclError> {
        let identity = if secret.is_empty() {
            self.source.anonymous_identity().await?.unwrap_or_default()
        } else {
            let identity = self
                .source
                .identity_from_secret(secret)
                .await?
                .ok_or(AclError::TokenNotFound)?;
            if identity.is_expired(Utc::now()) {
                tracing::debug!(accessor_id = %identity.accessor_id, "token expired");
                return Err(AclError::TokenNotFound);
            }
            identity
        };

        let policies = identity.effective_policies();
        let chain: Vec<Arc<dyn Authorizer>> = vec![
            Arc::new(PolicyAuthorizer::new(&policies)),
            self.config.default_authorizer()?,
        ];

        tracing::debug!(
            accessor_id = %identity.accessor_id,
            policies = policies.len(),
            default_policy = %self.config.default_policy,
            "built authorizer chain"
        );

        Ok(CachedAuthorizer {
            authz: Arc::new(ChainedAuthorizer::new(chain)),
            built_at: Instant::now(),
            expiration_time: identity.expiration_time,
        })
    }
}
