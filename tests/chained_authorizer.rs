use std::sync::Arc;

use mesh_acl::acl::{
    allow_all, deny_all, manage_all, static_authorizer_by_name, Authorizer, AuthorizerContext, ChainedAuthorizer,
    EnforcementDecision,
};

/// Answers every check with the same decision.
struct Fixed(EnforcementDecision);

macro_rules! fixed {
    ($($name:ident($($arg:ident: $ty:ty),*)),* $(,)?) => {
        $(fn $name(&self, $(_: $ty,)* _: &AuthorizerContext) -> EnforcementDecision {
            self.0
        })*
    };
}

impl Authorizer for Fixed {
    fixed!(
        acl_read(), acl_write(),
        agent_read(n: &str), agent_write(n: &str),
        event_read(n: &str), event_write(n: &str),
        intention_default_allow(), intention_read(n: &str), intention_write(n: &str),
        key_read(n: &str), key_list(n: &str), key_write(n: &str), key_write_prefix(n: &str),
        keyring_read(), keyring_write(),
        node_read(n: &str), node_write(n: &str),
        operator_read(), operator_write(),
        prepared_query_read(n: &str), prepared_query_write(n: &str),
        service_read(n: &str), service_write(n: &str),
        session_read(n: &str), session_write(n: &str),
        snapshot(),
    );
}

fn fixed(decision: EnforcementDecision) -> Arc<dyn Authorizer> {
    Arc::new(Fixed(decision))
}

fn every_check(authz: &dyn Authorizer, segment: &str) -> Vec<EnforcementDecision> {
    let ctx = AuthorizerContext::default();
    vec![
        authz.acl_read(&ctx),
        authz.acl_write(&ctx),
        authz.agent_read(segment, &ctx),
        authz.agent_write(segment, &ctx),
        authz.event_read(segment, &ctx),
        authz.event_write(segment, &ctx),
        authz.intention_default_allow(&ctx),
        authz.intention_read(segment, &ctx),
        authz.intention_write(segment, &ctx),
        authz.key_read(segment, &ctx),
        authz.key_list(segment, &ctx),
        authz.key_write(segment, &ctx),
        authz.key_write_prefix(segment, &ctx),
        authz.keyring_read(&ctx),
        authz.keyring_write(&ctx),
        authz.node_read(segment, &ctx),
        authz.node_write(segment, &ctx),
        authz.operator_read(&ctx),
        authz.operator_write(&ctx),
        authz.prepared_query_read(segment, &ctx),
        authz.prepared_query_write(segment, &ctx),
        authz.service_read(segment, &ctx),
        authz.service_write(segment, &ctx),
        authz.session_read(segment, &ctx),
        authz.session_write(segment, &ctx),
        authz.snapshot(&ctx),
    ]
}

const SEGMENTS: [&str; 4] = ["", "web", "*", "a/b/c"];

#[test]
fn empty_chain_abstains_everywhere() {
    let chain = ChainedAuthorizer::new(Vec::new());
    assert!(chain.is_empty());
    for segment in SEGMENTS {
        assert!(every_check(&chain, segment)
            .iter()
            .all(|d| *d == EnforcementDecision::Default));
    }
}

#[test]
fn first_non_default_decision_wins() {
    use EnforcementDecision::{Allow, Default as Abstain, Deny};

    let cases = [
        (vec![Deny, Allow], Deny),
        (vec![Allow, Deny], Allow),
        (vec![Abstain, Allow], Allow),
        (vec![Abstain, Deny], Deny),
        (vec![Abstain, Abstain], Abstain),
        (vec![Abstain, Abstain, Allow, Deny], Allow),
    ];

    for (decisions, expected) in cases {
        let chain = ChainedAuthorizer::new(decisions.iter().copied().map(fixed).collect());
        for segment in SEGMENTS {
            assert!(
                every_check(&chain, segment).iter().all(|d| *d == expected),
                "chain {decisions:?} should answer {expected:?}"
            );
        }
    }
}

#[test]
fn singleton_chain_is_identity() {
    let members: Vec<Arc<dyn Authorizer>> = vec![
        allow_all(),
        deny_all(),
        manage_all(),
        fixed(EnforcementDecision::Default),
    ];

    for member in members {
        let chain = ChainedAuthorizer::new(vec![Arc::clone(&member)]);
        for segment in SEGMENTS {
            assert_eq!(every_check(&chain, segment), every_check(member.as_ref(), segment));
        }
    }
}

#[test]
fn chained_static_roots_follow_first_root() {
    let ctx = AuthorizerContext::default();
    let chain = ChainedAuthorizer::new(vec![allow_all(), manage_all()]);

    // allow-all has no ACL management, so the first entry already denies.
    assert_eq!(chain.acl_write(&ctx), EnforcementDecision::Deny);
    assert_eq!(chain.snapshot(&ctx), EnforcementDecision::Deny);
    assert_eq!(chain.key_write("anything", &ctx), EnforcementDecision::Allow);
}

#[test]
fn roots_are_found_by_name_only() {
    for name in ["allow", "deny", "manage"] {
        assert!(static_authorizer_by_name(name).is_some(), "{name} should resolve");
    }
    for name in ["", "Allow", "root", "allow "] {
        assert!(static_authorizer_by_name(name).is_none(), "{name:?} should not resolve");
    }

    let deny = static_authorizer_by_name("deny").map(|a| every_check(a.as_ref(), "web"));
    assert_eq!(deny, Some(every_check(deny_all().as_ref(), "web")));
}
