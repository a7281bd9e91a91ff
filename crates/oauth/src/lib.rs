//! OAuth2 client-credentials support for protected MCP HTTP servers.
//!
//! - Protected resource and authorization server discovery (`discovery`)
//! - Token endpoint exchanges (`flow`)
//! - Per-server single-flight token cache (`token_cache`)

pub mod discovery;
pub mod error;
pub mod flow;
pub mod token_cache;
pub mod types;

pub use {
    discovery::{
        AuthorizationServerMetadata, DiscoveredEndpoint, ProtectedResourceMetadata,
        discover_token_endpoint, fetch_as_metadata, fetch_resource_metadata,
        parse_www_authenticate,
    },
    error::{Error, Result},
    flow::ClientCredentialsFlow,
    token_cache::TokenCache,
    types::{ClientCredentialsConfig, OAuthTokens, serialize_option_secret, serialize_secret},
};
