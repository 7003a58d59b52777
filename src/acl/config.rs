use std::sync::Arc;
use std::time::Duration;

use super::{static_authorizer_by_name, AclError, Authorizer};

const DEFAULT_TOKEN_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclConfig {
    pub enabled: bool,
    /// Name of the root policy used when every authorizer abstains:
    /// `"allow"` or `"deny"`.
    pub default_policy: String,
    pub token_ttl: Duration,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_policy: "allow".to_string(),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
        }
    }
}

impl AclConfig {
    /// Reads `ACL_ENABLED`, `ACL_DEFAULT_POLICY` and `ACL_TOKEN_TTL_SECS`.
    pub fn from_env() -> Result<Self, AclError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AclError> {
        let mut config = Self::default();

        if let Some(enabled) = lookup("ACL_ENABLED") {
            config.enabled = match enabled.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(AclError::Configuration(format!(
                        "ACL_ENABLED must be a boolean, got {other:?}"
                    )))
                }
            };
        }

        if let Some(policy) = lookup("ACL_DEFAULT_POLICY") {
            config = config.with_default_policy(policy.trim())?;
        }

        if let Some(ttl) = lookup("ACL_TOKEN_TTL_SECS") {
            let secs = ttl
                .trim()
                .parse::<u64>()
                .map_err(|_| AclError::Configuration("ACL_TOKEN_TTL_SECS must be a valid integer".into()))?;
            config.token_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Only `allow` and `deny` are accepted. `manage` would hand every
    /// anonymous caller full ACL management.
    pub fn with_default_policy(mut self, policy: &str) -> Result<Self, AclError> {
        match policy {
            "allow" | "deny" => {
                self.default_policy = policy.to_string();
                Ok(self)
            }
            other => Err(AclError::Configuration(format!(
                "invalid default policy {other:?}, expected \"allow\" or \"deny\""
            ))),
        }
    }

    pub fn default_allow(&self) -> bool {
        self.default_policy == "allow"
    }

    /// Root authorizer placed at the tail of every resolved chain.
    pub fn default_authorizer(&self) -> Result<Arc<dyn Authorizer>, AclError> {
        static_authorizer_by_name(&self.default_policy)
            .ok_or_else(|| AclError::Configuration(format!("unknown default policy {:?}", self.default_policy)))
    }
}
