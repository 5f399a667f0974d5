pub mod auth;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod import;
pub mod mailer;
pub mod models;
pub mod openapi;
pub mod policy;
pub mod repo;
pub mod representation;
pub mod routes;
pub mod validators;

// Re-export commonly used items for tests / binaries
pub use config::AppConfig;
pub use routes::{config, cors, AppState};
