//! OAuth metadata discovery for protected MCP servers.
//!
//! Implements:
//! - RFC 9728: OAuth 2.0 Protected Resource Metadata
//! - RFC 8414: OAuth 2.0 Authorization Server Metadata
//!
//! Used to locate a token endpoint when the configuration does not name one.

use {
    reqwest::Client,
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tracing::{debug, info},
    url::Url,
};

use crate::{Error, Result};

// ── Protected Resource Metadata (RFC 9728) ─────────────────────────────────

/// Metadata returned by `/.well-known/oauth-protected-resource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The resource server's identifier (its base URL).
    #[serde(default)]
    pub resource: String,
    /// Authorization server(s) that can issue tokens for this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Scopes the resource requires.
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Fetch protected resource metadata from `{resource_url}/.well-known/oauth-protected-resource`.
pub async fn fetch_resource_metadata(
    client: &Client,
    resource_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    let well_known = build_well_known_url(resource_url, "oauth-protected-resource")?;
    let meta: ProtectedResourceMetadata =
        fetch_metadata(client, &well_known, "protected resource metadata").await?;
    info!(resource = %meta.resource, servers = meta.authorization_servers.len(), "fetched resource metadata");
    Ok(meta)
}

// ── Authorization Server Metadata (RFC 8414) ───────────────────────────────

/// Metadata returned by `/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The AS issuer identifier (a URL).
    pub issuer: String,
    /// URL of the token endpoint.
    pub token_endpoint: String,
    /// Absent on servers that only issue machine-to-machine tokens.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Scopes the AS supports.
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    /// Grant types supported.
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Fetch authorization server metadata from `{as_url}/.well-known/oauth-authorization-server`.
pub async fn fetch_as_metadata(
    client: &Client,
    as_url: &Url,
) -> Result<AuthorizationServerMetadata> {
    let well_known = build_well_known_url(as_url, "oauth-authorization-server")?;
    let meta: AuthorizationServerMetadata =
        fetch_metadata(client, &well_known, "authorization server metadata").await?;
    info!(issuer = %meta.issuer, "fetched AS metadata");
    Ok(meta)
}

// ── Token endpoint discovery ───────────────────────────────────────────────

/// Token endpoint and default scopes located through discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub token_endpoint: String,
    pub scopes_supported: Vec<String>,
}

/// Locate the token endpoint for a protected resource.
///
/// Without an explicit authorization server the resource is probed: a 401
/// carrying `resource_metadata` in `WWW-Authenticate` points at the metadata
/// document, otherwise the origin's well-known location is used.
pub async fn discover_token_endpoint(
    client: &Client,
    resource_url: &Url,
    authorization_server: Option<&str>,
) -> Result<DiscoveredEndpoint> {
    let (as_url, resource_scopes) = match authorization_server {
        Some(server) => (Url::parse(server)?, Vec::new()),
        None => {
            let meta = discover_resource_metadata(client, resource_url).await?;
            let first = meta.authorization_servers.first().ok_or_else(|| {
                Error::message(format!(
                    "protected resource {resource_url} advertises no authorization server"
                ))
            })?;
            (Url::parse(first)?, meta.scopes_supported)
        },
    };

    let as_meta = fetch_as_metadata(client, &as_url).await?;
    let scopes_supported = if as_meta.scopes_supported.is_empty() {
        resource_scopes
    } else {
        as_meta.scopes_supported
    };

    debug!(token_endpoint = %as_meta.token_endpoint, "discovered token endpoint");
    Ok(DiscoveredEndpoint {
        token_endpoint: as_meta.token_endpoint,
        scopes_supported,
    })
}

async fn discover_resource_metadata(
    client: &Client,
    resource_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    let probe = client
        .get(resource_url.as_str())
        .send()
        .await
        .map_err(|source| Error::external("failed to probe protected resource", source))?;

    let hinted = (probe.status() == reqwest::StatusCode::UNAUTHORIZED)
        .then(|| {
            probe
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_www_authenticate)
        })
        .flatten();

    match hinted {
        Some(url) => {
            debug!(url = %url, "resource metadata advertised via WWW-Authenticate");
            let url = Url::parse(&url)?;
            fetch_metadata(client, &url, "protected resource metadata").await
        },
        None => {
            let origin = Url::parse(&resource_url.origin().ascii_serialization())?;
            fetch_resource_metadata(client, &origin).await
        },
    }
}

// ── WWW-Authenticate header parsing ────────────────────────────────────────

/// Parse the `resource_metadata` URL from a `WWW-Authenticate: Bearer ...` header.
///
/// Example header: `Bearer realm="example", resource_metadata="https://example.com/.well-known/oauth-protected-resource"`
#[must_use]
pub fn parse_www_authenticate(header: &str) -> Option<String> {
    let stripped = header
        .strip_prefix("Bearer")
        .or_else(|| header.strip_prefix("bearer"))?;
    let stripped = stripped.trim_start();

    for part in stripped.split(',') {
        let part = part.trim();
        if let Some(value) = part
            .strip_prefix("resource_metadata=")
            .or_else(|| part.strip_prefix("resource_metadata ="))
        {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ── Helpers ────────────────────────────────────────────────────────────────

async fn fetch_metadata<T: DeserializeOwned>(client: &Client, url: &Url, what: &str) -> Result<T> {
    debug!(url = %url, "fetching {what}");

    let resp = client
        .get(url.as_str())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|source| Error::external(format!("failed to fetch {what}"), source))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::message(format!("{what} returned HTTP {status}: {body}")));
    }

    resp.json()
        .await
        .map_err(|source| Error::external(format!("failed to parse {what}"), source))
}

/// Build a `/.well-known/<suffix>` URL following RFC 8615 path conventions.
fn build_well_known_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = base.clone();
    // Ensure path ends with /
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url = url
        .join(&format!(".well-known/{suffix}"))
        .map_err(|source| {
            Error::external(
                format!("failed to build .well-known/{suffix} URL from {base}"),
                source,
            )
        })?;
    Ok(url)
}
