pub mod acl;
pub mod health;
