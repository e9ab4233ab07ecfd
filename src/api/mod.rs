// HTTP API for the OAuth connection flow

pub mod oauth;

pub use oauth::{create_oauth_router, OAuthAppState};
