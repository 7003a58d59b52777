use std::sync::{Arc, OnceLock};

use super::{Authorizer, AuthorizerContext, EnforcementDecision};

/// Base policy that either allows or denies every request, ignoring the
/// resource identifier. Meant to sit at the tail of a chain.
///
/// Management checks (ACL read/write, snapshot) follow `allow_manage`,
/// everything else follows `default_allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAuthorizer {
    allow_manage: bool,
    default_allow: bool,
}

impl StaticAuthorizer {
    pub const fn new(allow_manage: bool, default_allow: bool) -> Self {
        Self {
            allow_manage,
            default_allow,
        }
    }

    pub fn allow_manage(&self) -> bool {
        self.allow_manage
    }

    pub fn default_allow(&self) -> bool {
        self.default_allow
    }

    fn manage(&self) -> EnforcementDecision {
        if self.allow_manage {
            EnforcementDecision::Allow
        } else {
            EnforcementDecision::Deny
        }
    }

    fn fallback(&self) -> EnforcementDecision {
        if self.default_allow {
            EnforcementDecision::Allow
        } else {
            EnforcementDecision::Deny
        }
    }
}

impl Authorizer for StaticAuthorizer {
    fn acl_read(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.manage()
    }

    fn acl_write(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.manage()
    }

    fn agent_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn agent_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn event_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn event_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn intention_default_allow(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn intention_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn intention_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn key_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn key_list(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn key_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn key_write_prefix(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn keyring_read(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn keyring_write(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn node_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn node_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn operator_read(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn operator_write(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn prepared_query_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn prepared_query_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn service_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn service_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn session_read(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn session_write(&self, _: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.fallback()
    }

    fn snapshot(&self, _: &AuthorizerContext) -> EnforcementDecision {
        self.manage()
    }
}

static ALLOW_ALL: OnceLock<Arc<dyn Authorizer>> = OnceLock::new();
static DENY_ALL: OnceLock<Arc<dyn Authorizer>> = OnceLock::new();
static MANAGE_ALL: OnceLock<Arc<dyn Authorizer>> = OnceLock::new();

/// Allows every non-management operation.
pub fn allow_all() -> Arc<dyn Authorizer> {
    Arc::clone(ALLOW_ALL.get_or_init(|| Arc::new(StaticAuthorizer::new(false, true))))
}

/// Denies every operation.
pub fn deny_all() -> Arc<dyn Authorizer> {
    Arc::clone(DENY_ALL.get_or_init(|| Arc::new(StaticAuthorizer::new(false, false))))
}

/// Allows every operation, management included.
///
/// Configuration never accepts "manage" as a default policy, so the only
/// caller is the resolver when ACLs are disabled.
pub fn manage_all() -> Arc<dyn Authorizer> {
    Arc::clone(MANAGE_ALL.get_or_init(|| Arc::new(StaticAuthorizer::new(true, true))))
}

/// Returns the root policy with the given name, if there is one.
pub fn static_authorizer_by_name(name: &str) -> Option<Arc<dyn Authorizer>> {
    match name {
        "allow" => Some(allow_all()),
        "deny" => Some(deny_all()),
        "manage" => Some(manage_all()),
        _ => None,
    }
}
