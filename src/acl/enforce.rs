use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{AclError, Authorizer, AuthorizerContext, EnforcementDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Acl,
    Agent,
    Event,
    Intention,
    Key,
    Keyring,
    Node,
    Operator,
    Query,
    Service,
    Session,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Acl => "acl",
            Resource::Agent => "agent",
            Resource::Event => "event",
            Resource::Intention => "intention",
            Resource::Key => "key",
            Resource::Keyring => "keyring",
            Resource::Node => "node",
            Resource::Operator => "operator",
            Resource::Query => "query",
            Resource::Service => "service",
            Resource::Session => "session",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let resource = match s {
            "acl" => Resource::Acl,
            "agent" => Resource::Agent,
            "event" => Resource::Event,
            "intention" => Resource::Intention,
            "key" => Resource::Key,
            "keyring" => Resource::Keyring,
            "node" => Resource::Node,
            "operator" => Resource::Operator,
            "query" => Resource::Query,
            "service" => Resource::Service,
            "session" => Resource::Session,
            other => return Err(AclError::InvalidResource(other.to_string())),
        };
        Ok(resource)
    }
}

/// Verb requested against a [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforceAccess {
    Read,
    List,
    Write,
    WritePrefix,
}

impl EnforceAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforceAccess::Read => "read",
            EnforceAccess::List => "list",
            EnforceAccess::Write => "write",
            EnforceAccess::WritePrefix => "write-prefix",
        }
    }
}

impl fmt::Display for EnforceAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforceAccess {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(EnforceAccess::Read),
            "list" => Ok(EnforceAccess::List),
            "write" => Ok(EnforceAccess::Write),
            "write-prefix" => Ok(EnforceAccess::WritePrefix),
            other => Err(AclError::InvalidAccessLevel(other.to_string())),
        }
    }
}

/// Runs the check named by `resource` and `access` against `authz`.
///
/// `segment` is ignored for resources without identifiers (acl, keyring,
/// operator). List and write-prefix are only meaningful for keys; asking
/// for them on anything else is an error rather than a decision.
pub fn enforce(
    authz: &dyn Authorizer,
    resource: Resource,
    segment: &str,
    access: EnforceAccess,
    ctx: &AuthorizerContext,
) -> Result<EnforcementDecision, AclError> {
    use EnforceAccess::{List, Read, Write, WritePrefix};

    let decision = match (resource, access) {
        (Resource::Acl, Read) => authz.acl_read(ctx),
        (Resource::Acl, Write) => authz.acl_write(ctx),
        (Resource::Agent, Read) => authz.agent_read(segment, ctx),
        (Resource::Agent, Write) => authz.agent_write(segment, ctx),
        (Resource::Event, Read) => authz.event_read(segment, ctx),
        (Resource::Event, Write) => authz.event_write(segment, ctx),
        (Resource::Intention, Read) => authz.intention_read(segment, ctx),
        (Resource::Intention, Write) => authz.intention_write(segment, ctx),
        (Resource::Key, Read) => authz.key_read(segment, ctx),
        (Resource::Key, List) => authz.key_list(segment, ctx),
        (Resource::Key, Write) => authz.key_write(segment, ctx),
        (Resource::Key, WritePrefix) => authz.key_write_prefix(segment, ctx),
        (Resource::Keyring, Read) => authz.keyring_read(ctx),
        (Resource::Keyring, Write) => authz.keyring_write(ctx),
        (Resource::Node, Read) => authz.node_read(segment, ctx),
        (Resource::Node, Write) => authz.node_write(segment, ctx),
        (Resource::Operator, Read) => authz.operator_read(ctx),
        (Resource::Operator, Write) => authz.operator_write(ctx),
        (Resource::Query, Read) => authz.prepared_query_read(segment, ctx),
        (Resource::Query, Write) => authz.prepared_query_write(segment, ctx),
        (Resource::Service, Read) => authz.service_read(segment, ctx),
        (Resource::Service, Write) => authz.service_write(segment, ctx),
        (Resource::Session, Read) => authz.session_read(segment, ctx),
        (Resource::Session, Write) => authz.session_write(segment, ctx),
        (resource, access) => {
            return Err(AclError::InvalidEnforceRequest {
                resource: resource.to_string(),
                access: access.to_string(),
            })
        }
    };

    tracing::trace!(%resource, segment, %access, %decision, "enforce");
    Ok(decision)
}
