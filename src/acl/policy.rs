use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{AclError, Authorizer, AuthorizerContext, EnforcementDecision};

/// Access granted by a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Deny,
    Read,
    List,
    Write,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Deny => "deny",
            AccessLevel::Read => "read",
            AccessLevel::List => "list",
            AccessLevel::Write => "write",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            AccessLevel::Deny => 3,
            AccessLevel::Write => 2,
            AccessLevel::List => 1,
            AccessLevel::Read => 0,
        }
    }

    /// Used when two policies name the same segment: deny beats write
    /// beats list beats read.
    pub fn takes_precedence_over(self, other: AccessLevel) -> bool {
        self.precedence() > other.precedence()
    }

    fn read_decision(self) -> EnforcementDecision {
        match self {
            AccessLevel::Read | AccessLevel::List | AccessLevel::Write => EnforcementDecision::Allow,
            AccessLevel::Deny => EnforcementDecision::Deny,
        }
    }

    fn list_decision(self) -> EnforcementDecision {
        match self {
            AccessLevel::List | AccessLevel::Write => EnforcementDecision::Allow,
            AccessLevel::Read | AccessLevel::Deny => EnforcementDecision::Deny,
        }
    }

    fn write_decision(self) -> EnforcementDecision {
        match self {
            AccessLevel::Write => EnforcementDecision::Allow,
            _ => EnforcementDecision::Deny,
        }
    }
}

impl FromStr for AccessLevel {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deny" => Ok(AccessLevel::Deny),
            "read" => Ok(AccessLevel::Read),
            "list" => Ok(AccessLevel::List),
            "write" => Ok(AccessLevel::Write),
            _ => Err(AclError::InvalidAccessLevel(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub policy: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intentions: Option<AccessLevel>,
}

impl RuleSpec {
    pub fn new(policy: AccessLevel) -> Self {
        Self {
            policy,
            intentions: None,
        }
    }
}

type Rules = BTreeMap<String, RuleSpec>;

/// JSON rule document, e.g.
/// `{"key_prefix": {"app/": {"policy": "write"}}, "operator": "read"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<AccessLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<AccessLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring: Option<AccessLevel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_prefix: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event_prefix: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_prefix: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_prefix: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_prefix: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_prefix: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub session: Rules,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub session_prefix: Rules,
}

impl PolicyRules {
    fn validate(&self) -> Result<(), AclError> {
        let single = [("acl", self.acl), ("operator", self.operator), ("keyring", self.keyring)];
        for (name, level) in single {
            if level == Some(AccessLevel::List) {
                return Err(AclError::invalid_policy(format!("{name} does not support \"list\"")));
            }
        }

        let segmented: [(&str, &Rules); 14] = [
            ("agent", &self.agent),
            ("agent_prefix", &self.agent_prefix),
            ("event", &self.event),
            ("event_prefix", &self.event_prefix),
            ("key", &self.key),
            ("key_prefix", &self.key_prefix),
            ("node", &self.node),
            ("node_prefix", &self.node_prefix),
            ("query", &self.query),
            ("query_prefix", &self.query_prefix),
            ("service", &self.service),
            ("service_prefix", &self.service_prefix),
            ("session", &self.session),
            ("session_prefix", &self.session_prefix),
        ];
        for (kind, rules) in segmented {
            let is_key = kind.starts_with("key");
            let is_service = kind.starts_with("service");
            for (segment, spec) in rules {
                if spec.policy == AccessLevel::List && !is_key {
                    return Err(AclError::invalid_policy(format!(
                        "{kind} {segment:?}: \"list\" is only valid for key rules"
                    )));
                }
                if let Some(intentions) = spec.intentions {
                    if !is_service {
                        return Err(AclError::invalid_policy(format!(
                            "{kind} {segment:?}: intentions are only valid for service rules"
                        )));
                    }
                    if intentions == AccessLevel::List {
                        return Err(AclError::invalid_policy(format!(
                            "{kind} {segment:?}: intentions do not support \"list\""
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A named set of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: PolicyRules,
}

impl Policy {
    /// Parses and validates a JSON rule document. Empty input yields a
    /// policy with no rules.
    pub fn parse(id: impl Into<String>, name: impl Into<String>, rules: &str) -> Result<Self, AclError> {
        let rules = if rules.trim().is_empty() {
            PolicyRules::default()
        } else {
            serde_json::from_str::<PolicyRules>(rules)
                .map_err(|err| AclError::invalid_policy(err.to_string()))?
        };
        rules.validate()?;

        Ok(Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            rules,
        })
    }

    /// Policy granted to a token that carries a service identity: write on
    /// the service and its sidecar proxy, read on the rest of the catalog.
    pub fn for_service_identity(service: &str) -> Self {
        let mut rules = PolicyRules::default();
        rules.service.insert(service.to_string(), RuleSpec::new(AccessLevel::Write));
        rules
            .service
            .insert(format!("{service}-sidecar-proxy"), RuleSpec::new(AccessLevel::Write));
        rules.service_prefix.insert(String::new(), RuleSpec::new(AccessLevel::Read));
        rules.node_prefix.insert(String::new(), RuleSpec::new(AccessLevel::Read));

        Self {
            id: format!("service-identity:{service}"),
            name: format!("service-identity-{service}"),
            description: format!("synthetic policy for service identity {service:?}"),
            rules,
        }
    }

    /// Policy granted to a token that carries a node identity.
    pub fn for_node_identity(node: &str) -> Self {
        let mut rules = PolicyRules::default();
        rules.node.insert(node.to_string(), RuleSpec::new(AccessLevel::Write));
        rules.service_prefix.insert(String::new(), RuleSpec::new(AccessLevel::Read));

        Self {
            id: format!("node-identity:{node}"),
            name: format!("node-identity-{node}"),
            description: format!("synthetic policy for node identity {node:?}"),
            rules,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    access: AccessLevel,
    intentions: Option<AccessLevel>,
}

impl Rule {
    fn merge(&mut self, other: Rule) {
        if other.access.takes_precedence_over(self.access) {
            self.access = other.access;
        }
        self.intentions = match (self.intentions, other.intentions) {
            (Some(a), Some(b)) if b.takes_precedence_over(a) => Some(b),
            (a, b) => a.or(b),
        };
    }

    /// Intentions follow the service policy unless set explicitly.
    fn intention_access(&self) -> AccessLevel {
        self.intentions.unwrap_or(match self.access {
            AccessLevel::Deny => AccessLevel::Deny,
            _ => AccessLevel::Read,
        })
    }
}

impl From<&RuleSpec> for Rule {
    fn from(spec: &RuleSpec) -> Self {
        Self {
            access: spec.policy,
            intentions: spec.intentions,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RuleTree {
    exact: BTreeMap<String, Rule>,
    prefix: BTreeMap<String, Rule>,
}

impl RuleTree {
    fn add(&mut self, exact: &Rules, prefix: &Rules) {
        for (segment, spec) in exact {
            Self::insert(&mut self.exact, segment, spec.into());
        }
        for (segment, spec) in prefix {
            Self::insert(&mut self.prefix, segment, spec.into());
        }
    }

    fn insert(map: &mut BTreeMap<String, Rule>, segment: &str, rule: Rule) {
        map.entry(segment.to_string())
            .and_modify(|existing| existing.merge(rule))
            .or_insert(rule);
    }

    fn longest_prefix(&self, segment: &str) -> Option<&Rule> {
        self.prefix
            .iter()
            .filter(|(prefix, _)| segment.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rule)| rule)
    }

    /// Exact match first, then the longest matching prefix.
    fn lookup(&self, segment: &str) -> Option<&Rule> {
        self.exact.get(segment).or_else(|| self.longest_prefix(segment))
    }

    fn rules(&self) -> impl Iterator<Item = (&String, &Rule)> {
        self.exact.iter().chain(self.prefix.iter())
    }

    fn decide(&self, segment: &str, f: fn(AccessLevel) -> EnforcementDecision) -> EnforcementDecision {
        self.lookup(segment)
            .map(|rule| f(rule.access))
            .unwrap_or(EnforcementDecision::Default)
    }
}

fn single_decision(level: Option<AccessLevel>, f: fn(AccessLevel) -> EnforcementDecision) -> EnforcementDecision {
    level.map(f).unwrap_or(EnforcementDecision::Default)
}

/// Authorizer compiled from one or more policies. Segments without a
/// matching rule yield `Default` so a later authorizer in the chain decides.
#[derive(Debug, Clone, Default)]
pub struct PolicyAuthorizer {
    acl: Option<AccessLevel>,
    operator: Option<AccessLevel>,
    keyring: Option<AccessLevel>,
    agents: RuleTree,
    events: RuleTree,
    keys: RuleTree,
    nodes: RuleTree,
    queries: RuleTree,
    services: RuleTree,
    sessions: RuleTree,
}

impl PolicyAuthorizer {
    pub fn new<'a>(policies: impl IntoIterator<Item = &'a Policy>) -> Self {
        let mut authz = Self::default();
        for policy in policies {
            authz.add(&policy.rules);
        }
        authz
    }

    fn add(&mut self, rules: &PolicyRules) {
        merge_single(&mut self.acl, rules.acl);
        merge_single(&mut self.operator, rules.operator);
        merge_single(&mut self.keyring, rules.keyring);
        self.agents.add(&rules.agent, &rules.agent_prefix);
        self.events.add(&rules.event, &rules.event_prefix);
        self.keys.add(&rules.key, &rules.key_prefix);
        self.nodes.add(&rules.node, &rules.node_prefix);
        self.queries.add(&rules.query, &rules.query_prefix);
        self.services.add(&rules.service, &rules.service_prefix);
        self.sessions.add(&rules.session, &rules.session_prefix);
    }
}

fn merge_single(current: &mut Option<AccessLevel>, incoming: Option<AccessLevel>) {
    *current = match (*current, incoming) {
        (Some(a), Some(b)) if b.takes_precedence_over(a) => Some(b),
        (a, b) => a.or(b),
    };
}

impl Authorizer for PolicyAuthorizer {
    fn acl_read(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.acl, AccessLevel::read_decision)
    }

    fn acl_write(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.acl, AccessLevel::write_decision)
    }

    fn agent_read(&self, node: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.agents.decide(node, AccessLevel::read_decision)
    }

    fn agent_write(&self, node: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.agents.decide(node, AccessLevel::write_decision)
    }

    fn event_read(&self, name: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.events.decide(name, AccessLevel::read_decision)
    }

    fn event_write(&self, name: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.events.decide(name, AccessLevel::write_decision)
    }

    fn intention_default_allow(&self, _: &AuthorizerContext) -> EnforcementDecision {
        EnforcementDecision::Default
    }

    fn intention_read(&self, prefix: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.services
            .lookup(prefix)
            .map(|rule| rule.intention_access().read_decision())
            .unwrap_or(EnforcementDecision::Default)
    }

    fn intention_write(&self, prefix: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.services
            .lookup(prefix)
            .map(|rule| rule.intention_access().write_decision())
            .unwrap_or(EnforcementDecision::Default)
    }

    fn key_read(&self, key: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.keys.decide(key, AccessLevel::read_decision)
    }

    fn key_list(&self, prefix: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.keys.decide(prefix, AccessLevel::list_decision)
    }

    fn key_write(&self, key: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.keys.decide(key, AccessLevel::write_decision)
    }

    /// Allowed only when the governing prefix rule grants write and no rule
    /// at or below `prefix` withholds it.
    fn key_write_prefix(&self, prefix: &str, _: &AuthorizerContext) -> EnforcementDecision {
        let governing = self.keys.longest_prefix(prefix).map(|rule| rule.access);
        if matches!(governing, Some(access) if access != AccessLevel::Write) {
            return EnforcementDecision::Deny;
        }

        let restricted_below = self
            .keys
            .rules()
            .any(|(segment, rule)| segment.starts_with(prefix) && rule.access != AccessLevel::Write);
        if restricted_below {
            return EnforcementDecision::Deny;
        }

        match governing {
            Some(_) => EnforcementDecision::Allow,
            None => EnforcementDecision::Default,
        }
    }

    fn keyring_read(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.keyring, AccessLevel::read_decision)
    }

    fn keyring_write(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.keyring, AccessLevel::write_decision)
    }

    fn node_read(&self, node: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.nodes.decide(node, AccessLevel::read_decision)
    }

    fn node_write(&self, node: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.nodes.decide(node, AccessLevel::write_decision)
    }

    fn operator_read(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.operator, AccessLevel::read_decision)
    }

    fn operator_write(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.operator, AccessLevel::write_decision)
    }

    fn prepared_query_read(&self, prefix: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.queries.decide(prefix, AccessLevel::read_decision)
    }

    fn prepared_query_write(&self, prefix: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.queries.decide(prefix, AccessLevel::write_decision)
    }

    fn service_read(&self, name: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.services.decide(name, AccessLevel::read_decision)
    }

    fn service_write(&self, name: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.services.decide(name, AccessLevel::write_decision)
    }

    fn service_write_any(&self, _: &AuthorizerContext) -> EnforcementDecision {
        if self.services.rules().any(|(_, rule)| rule.access == AccessLevel::Write) {
            EnforcementDecision::Allow
        } else {
            EnforcementDecision::Default
        }
    }

    fn session_read(&self, node: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.sessions.decide(node, AccessLevel::read_decision)
    }

    fn session_write(&self, node: &str, _: &AuthorizerContext) -> EnforcementDecision {
        self.sessions.decide(node, AccessLevel::write_decision)
    }

    fn snapshot(&self, _: &AuthorizerContext) -> EnforcementDecision {
        single_decision(self.acl, AccessLevel::write_decision)
    }
}
