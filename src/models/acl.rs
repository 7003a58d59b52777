use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyCreateRequest {
    #[schema(example = "web-writer")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "Write access to the web service")]
    pub description: String,
    /// JSON rule document.
    #[serde(default)]
    #[schema(example = r#"{"service": {"web": {"policy": "write"}}}"#)]
    pub rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: String,
    pub create_time: DateTime<Utc>,
    pub modify_index: i64,
}

/// Reference to an existing policy, by ID or by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyLink {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceIdentity {
    #[schema(example = "web")]
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct NodeIdentity {
    #[schema(example = "node-1")]
    pub node_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TokenCreateRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policies: Vec<PolicyLink>,
    #[serde(default)]
    pub service_identities: Vec<ServiceIdentity>,
    #[serde(default)]
    pub node_identities: Vec<NodeIdentity>,
    /// Lifetime in seconds; the token never expires when absent.
    #[serde(rename = "ExpirationTTL", default, skip_serializing_if = "Option::is_none")]
    #[schema(example = 3600)]
    pub expiration_ttl: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct TokenResponse {
    #[serde(rename = "AccessorID")]
    pub accessor_id: String,
    /// Only returned when the token is created.
    #[serde(rename = "SecretID")]
    pub secret_id: String,
    pub description: String,
    pub policies: Vec<PolicyLink>,
    pub service_identities: Vec<ServiceIdentity>,
    pub node_identities: Vec<NodeIdentity>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationRequest {
    #[schema(example = "service")]
    pub resource: String,
    #[serde(default)]
    #[schema(example = "web")]
    pub segment: String,
    #[schema(example = "write")]
    pub access: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationResponse {
    pub resource: String,
    pub segment: String,
    pub access: String,
    pub allow: bool,
}
