// Encryption of secrets at rest
pub mod credentials;

// Error taxonomy and HTTP mapping
pub mod error;

// Service configuration (TOML + environment)
pub mod config;

// Per-tenant data source configuration
pub mod source_config;

// OAuth connection flow
pub mod oauth;

// HTTP APIs
pub mod api;

pub use error::{Result, SourceError};
