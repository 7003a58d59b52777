pub mod acl;
pub mod app;
pub mod db;
pub mod docs;
pub mod errors;
pub mod models;
pub mod routes;
pub mod state;
pub mod stream;
pub mod token;

// Re-export commonly used items for tests
pub use app::{create_app, create_app_with_config};
