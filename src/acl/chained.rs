use std::fmt;
use std::sync::Arc;

use super::{Authorizer, AuthorizerContext, EnforcementDecision};

/// Composes an ordered list of authorizers. For each check the first
/// authorizer with a non-`Default` answer decides; later entries are not
/// consulted. An empty chain, or one where every entry abstains, yields
/// `Default`.
#[derive(Clone, Default)]
pub struct ChainedAuthorizer {
    chain: Vec<Arc<dyn Authorizer>>,
}

impl ChainedAuthorizer {
    pub fn new(chain: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { chain }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn first_decision<F>(&self, check: F) -> EnforcementDecision
    where
        F: Fn(&dyn Authorizer) -> EnforcementDecision,
    {
        for authz in &self.chain {
            let decision = check(authz.as_ref());
            if decision != EnforcementDecision::Default {
                return decision;
            }
        }
        EnforcementDecision::Default
    }
}

impl fmt::Debug for ChainedAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedAuthorizer")
            .field("len", &self.chain.len())
            .finish()
    }
}

impl Authorizer for ChainedAuthorizer {
    fn acl_read(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.acl_read(ctx))
    }

    fn acl_write(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.acl_write(ctx))
    }

    fn agent_read(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.agent_read(node, ctx))
    }

    fn agent_write(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.agent_write(node, ctx))
    }

    fn event_read(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.event_read(name, ctx))
    }

    fn event_write(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.event_write(name, ctx))
    }

    fn intention_default_allow(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.intention_default_allow(ctx))
    }

    fn intention_read(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.intention_read(prefix, ctx))
    }

    fn intention_write(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.intention_write(prefix, ctx))
    }

    fn key_read(&self, key: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.key_read(key, ctx))
    }

    fn key_list(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.key_list(prefix, ctx))
    }

    fn key_write(&self, key: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.key_write(key, ctx))
    }

    fn key_write_prefix(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.key_write_prefix(prefix, ctx))
    }

    fn keyring_read(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.keyring_read(ctx))
    }

    fn keyring_write(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.keyring_write(ctx))
    }

    fn node_read(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.node_read(node, ctx))
    }

    fn node_write(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.node_write(node, ctx))
    }

    fn operator_read(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.operator_read(ctx))
    }

    fn operator_write(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.operator_write(ctx))
    }

    fn prepared_query_read(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.prepared_query_read(prefix, ctx))
    }

    fn prepared_query_write(&self, prefix: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.prepared_query_write(prefix, ctx))
    }

    fn service_read(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.service_read(name, ctx))
    }

    fn service_write(&self, name: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.service_write(name, ctx))
    }

    fn service_write_any(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.service_write_any(ctx))
    }

    fn session_read(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.session_read(node, ctx))
    }

    fn session_write(&self, node: &str, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.session_write(node, ctx))
    }

    fn snapshot(&self, ctx: &AuthorizerContext) -> EnforcementDecision {
        self.first_decision(|a| a.snapshot(ctx))
    }
}
