use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Client-credentials settings for one protected MCP server.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientCredentialsConfig {
    /// The protected resource (the MCP endpoint itself).
    pub resource_url: String,
    pub client_id: String,
    #[serde(serialize_with = "serialize_secret")]
    pub client_secret: Secret<String>,
    /// Token endpoint; discovered from the resource when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// Authorization server to use when the resource does not advertise one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_server: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ClientCredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsConfig")
            .field("resource_url", &self.resource_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint)
            .field("authorization_server", &self.authorization_server)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Stored OAuth tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    /// Unix timestamp when the access token expires.
    pub expires_at: Option<u64>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl OAuthTokens {
    /// Whether the token is expired or expires within `margin_secs`.
    /// Tokens without expiry information are treated as valid.
    #[must_use]
    pub fn expires_within(&self, margin_secs: u64) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        unix_now() + margin_secs >= expires_at
    }

    /// Whether `candidate` is this token's access token.
    #[must_use]
    pub fn is_access_token(&self, candidate: &Secret<String>) -> bool {
        self.access_token.expose_secret() == candidate.expose_secret()
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through storage (config files, token JSON).
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_at: Option<u64>) -> OAuthTokens {
        OAuthTokens {
            access_token: Secret::new("at".into()),
            refresh_token: None,
            expires_at,
        }
    }

    #[test]
    fn expiry_respects_margin() {
        let now = unix_now();
        assert!(tokens(Some(now - 10)).expires_within(60));
        assert!(tokens(Some(now + 30)).expires_within(60));
        assert!(!tokens(Some(now + 3600)).expires_within(60));
        assert!(!tokens(None).expires_within(60));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = ClientCredentialsConfig {
            resource_url: "https://mcp.example.com/mcp".into(),
            client_id: "client".into(),
            client_secret: Secret::new("hunter2".into()),
            token_endpoint: None,
            authorization_server: None,
            scopes: vec![],
        };
        assert!(!format!("{config:?}").contains("hunter2"));

        let rendered = format!("{:?}", tokens(None));
        assert!(!rendered.contains("\"at\""));
        assert!(rendered.contains("[REDACTED]"));
    }
}
