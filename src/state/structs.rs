use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::acl::{Authorizer, AuthorizerContext};

pub const WILDCARD_SPECIFIER: &str = "*";

/// Partition and namespace a catalog object lives in. Empty fields mean the
/// default partition / namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnterpriseMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl EnterpriseMeta {
    /// Matches every namespace in every partition.
    pub fn wildcard() -> Self {
        Self {
            partition: WILDCARD_SPECIFIER.to_string(),
            namespace: WILDCARD_SPECIFIER.to_string(),
        }
    }

    pub fn fill_authz_context(&self, ctx: &mut AuthorizerContext) {
        ctx.partition = (!self.partition.is_empty()).then(|| self.partition.clone());
        ctx.namespace = (!self.namespace.is_empty()).then(|| self.namespace.clone());
    }

    pub fn authz_context(&self) -> AuthorizerContext {
        let mut ctx = AuthorizerContext::default();
        self.fill_authz_context(&mut ctx);
        ctx
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "ID", default)]
    pub id: String,
    pub node: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Node {
    pub fn new(node: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            address: address.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    #[default]
    #[serde(rename = "")]
    Typical,
    ConnectProxy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectProxyConfig {
    #[serde(default)]
    pub destination_service_name: String,
    #[serde(rename = "DestinationServiceID", default)]
    pub destination_service_id: String,
    #[serde(default)]
    pub local_service_port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConnect {
    #[serde(default)]
    pub native: bool,
}

/// A service instance as registered on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeService {
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub proxy: ConnectProxyConfig,
    #[serde(default)]
    pub connect: ServiceConnect,
    #[serde(flatten)]
    pub enterprise_meta: EnterpriseMeta,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl NodeService {
    pub fn new(id: impl Into<String>, service: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            port,
            ..Default::default()
        }
    }

    /// Sidecar proxy instance fronting `destination`.
    pub fn connect_proxy(id: impl Into<String>, service: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            kind: ServiceKind::ConnectProxy,
            id: id.into(),
            service: service.into(),
            proxy: ConnectProxyConfig {
                destination_service_name: destination.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn is_connect_proxy(&self) -> bool {
        self.kind == ServiceKind::ConnectProxy
    }

    /// Name this instance is known by on the connect topic: the destination
    /// for proxies, its own name for connect-native services.
    pub fn connect_name(&self) -> Option<&str> {
        if self.is_connect_proxy() {
            Some(&self.proxy.destination_service_name)
        } else if self.connect.native {
            Some(&self.service)
        } else {
            None
        }
    }

    pub fn to_service_node(&self, node: &str) -> ServiceNode {
        ServiceNode {
            node: node.to_string(),
            service_kind: self.kind,
            service_id: self.id.clone(),
            service_name: self.service.clone(),
            service_tags: self.tags.clone(),
            service_address: self.address.clone(),
            service_port: self.port,
            service_proxy: self.proxy.clone(),
            service_connect: self.connect,
            enterprise_meta: self.enterprise_meta.clone(),
            create_index: self.create_index,
            modify_index: self.modify_index,
        }
    }
}

/// Storage row for a service instance, flattened with its node name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceNode {
    pub node: String,
    pub service_kind: ServiceKind,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    pub service_name: String,
    pub service_tags: Vec<String>,
    pub service_address: String,
    pub service_port: u16,
    pub service_proxy: ConnectProxyConfig,
    pub service_connect: ServiceConnect,
    #[serde(flatten)]
    pub enterprise_meta: EnterpriseMeta,
    pub create_index: u64,
    pub modify_index: u64,
}

impl ServiceNode {
    pub fn to_node_service(&self) -> NodeService {
        NodeService {
            kind: self.service_kind,
            id: self.service_id.clone(),
            service: self.service_name.clone(),
            tags: self.service_tags.clone(),
            address: self.service_address.clone(),
            port: self.service_port,
            proxy: self.service_proxy.clone(),
            connect: self.service_connect,
            enterprise_meta: self.enterprise_meta.clone(),
            create_index: self.create_index,
            modify_index: self.modify_index,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    #[default]
    Critical,
    Maintenance,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    pub node: String,
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default)]
    pub output: String,
    /// Empty for node-level checks.
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(flatten)]
    pub enterprise_meta: EnterpriseMeta,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl HealthCheck {
    pub fn node_check(node: impl Into<String>, check_id: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            node: node.into(),
            check_id: check_id.into(),
            status,
            ..Default::default()
        }
    }

    pub fn service_check(
        node: impl Into<String>,
        check_id: impl Into<String>,
        service_id: impl Into<String>,
        status: HealthStatus,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            ..Self::node_check(node, check_id, status)
        }
    }

    pub fn is_node_check(&self) -> bool {
        self.service_id.is_empty()
    }
}

/// A service instance together with its node and every check that applies
/// to it (node-level checks first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckServiceNode {
    pub node: Node,
    pub service: NodeService,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

impl CheckServiceNode {
    pub fn can_read(&self, authz: &dyn Authorizer) -> bool {
        let ctx = self.service.enterprise_meta.authz_context();
        authz.node_read(&self.node.node, &ctx).is_allow() && authz.service_read(&self.service.service, &ctx).is_allow()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaRoot {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub serial_number: u64,
    #[serde(rename = "SigningKeyID", default)]
    pub signing_key_id: String,
    #[serde(default)]
    pub root_cert: String,
    #[serde(default)]
    pub intermediate_certs: Vec<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl CaRoot {
    pub fn new(id: impl Into<String>, name: impl Into<String>, active: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active,
            ..Default::default()
        }
    }
}
