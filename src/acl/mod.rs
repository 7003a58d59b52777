//! ACL authorization core
//!
//! This module implements the permission-checking protocol used by every
//! control plane operation:
//! - A three-valued decision (`Allow`, `Deny`, `Default`)
//! - The `Authorizer` capability trait, one method per resource and verb
//! - Static root policies (allow-all, deny-all, manage-all)
//! - First-match-wins chaining across policy sources
//! - Rule-based policies and token resolution with caching

mod chained;
mod config;
mod enforce;
mod error;
mod policy;
mod resolver;
mod static_authorizer;

pub use chained::ChainedAuthorizer;
pub use config::AclConfig;
pub use enforce::{enforce, EnforceAccess, Resource};
pub use error::AclError;
pub use policy::{AccessLevel, Policy, PolicyAuthorizer, PolicyRules, RuleSpec};
pub use resolver::{AclIdentity, Resolver, TokenSource};
pub use static_authorizer::{
    allow_all, deny_all, manage_all, static_authorizer_by_name, StaticAuthorizer,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of a single authorization check.
///
/// `Default` means "this authorizer has no opinion". It must be resolved
/// against the configured default policy before it reaches a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnforcementDecision {
    Deny,
    Allow,
    Default,
}

impl EnforcementDecision {
    pub fn is_allow(self) -> bool {
        self == EnforcementDecision::Allow
    }

    /// Collapse the decision to a boolean, using `default_allow` for `Default`.
    pub fn resolve(self, default_allow: bool) -> bool {
        match self {
            EnforcementDecision::Allow => true,
            EnforcementDecision::Deny => false,
            EnforcementDecision::Default => default_allow,
        }
    }

    /// Turn anything other than `Allow` into a permission denied error.
    /// `Default` is treated as deny here.
    pub fn require(self, what: impl FnOnce() -> String) -> Result<(), AclError> {
        if self.is_allow() {
            Ok(())
        } else {
            Err(AclError::PermissionDenied(what()))
        }
    }
}

impl fmt::Display for EnforcementDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnforcementDecision::Allow => "Allow",
            EnforcementDecision::Deny => "Deny",
            EnforcementDecision::Default => "Default",
        };
        f.write_str(s)
    }
}

/// Extra matching criteria passed to every check (partition / namespace
/// scoping). The base authorizers ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizerContext {
    pub partition: Option<String>,
    pub namespace: Option<String>,
}

impl AuthorizerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// The full set of authorization questions the control plane can ask.
///
/// Every method is a pure function of its arguments and the authorizer's
/// own immutable policy state. Identifiers may be empty or wildcard-looking;
/// a decision is returned for every input.
pub trait Authorizer: Send + Sync {
    fn acl_read(&self, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn acl_write(&self, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn agent_read(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn agent_write(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn event_read(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn event_write(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    /// Whether the intention system itself defaults to allow.
    fn intention_default_allow(&self, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn intention_read(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn intention_write(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn key_read(&self, key: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn key_list(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn key_write(&self, key: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    /// Recursive write under `prefix`. Single-key write never implies this.
    fn key_write_prefix(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn keyring_read(&self, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn keyring_write(&self, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn node_read(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn node_write(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn operator_read(&self, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn operator_write(&self, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn prepared_query_read(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn prepared_query_write(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn service_read(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn service_write(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    /// Write access to at least one service.
    fn service_write_any(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.service_write("", ctx)
    }

    fn session_read(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision;
    fn session_write(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision;

    fn snapshot(&self, ctx: &AuthorizerContext) -> EnforcementDecision;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resolves_to_configured_policy() {
        assert!(EnforcementDecision::Default.resolve(true));
        assert!(!EnforcementDecision::Default.resolve(false));
        assert!(EnforcementDecision::Allow.resolve(false));
        assert!(!EnforcementDecision::Deny.resolve(true));
    }

    #[test]
    fn test_require_treats_default_as_deny() {
        assert!(EnforcementDecision::Allow.require(|| "x".into()).is_ok());
        assert_eq!(
            EnforcementDecision::Default.require(|| "key:read".into()),
            Err(AclError::PermissionDenied("key:read".into()))
        );
        assert!(EnforcementDecision::Deny.require(|| "x".into()).is_err());
    }
}
