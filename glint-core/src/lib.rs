//! Glint Core Library
//!
//! Authentication core for the Glint desktop companion: browser-delegated
//! sign-in, deep-link callbacks, identity token verification and secure
//! credential storage.

pub mod auth;
pub mod config;

// Re-export commonly used items
pub use config::load_config;
pub use config::AuthConfig;
