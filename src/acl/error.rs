/// Errors surfaced by token resolution, policy parsing and enforcement
/// requests. Authorizer checks themselves never fail.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("ACL not found")]
    TokenNotFound,
    #[error("Cannot resolve root ACLs")]
    RootNotAllowed,
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("invalid access level: {0:?}")]
    InvalidAccessLevel(String),
    #[error("invalid resource: {0:?}")]
    InvalidResource(String),
    #[error("access {access:?} is not valid for resource {resource:?}")]
    InvalidEnforceRequest { resource: String, access: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token source error: {0}")]
    Source(String),
}

impl AclError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy(message.into())
    }

    pub fn source(err: impl ToString) -> Self {
        Self::Source(err.to_string())
    }
}
