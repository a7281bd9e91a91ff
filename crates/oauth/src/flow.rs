use {
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    tokio::sync::OnceCell,
    tracing::{debug, info},
    url::Url,
};

use crate::{
    Error, Result,
    discovery::{DiscoveredEndpoint, discover_token_endpoint},
    types::{ClientCredentialsConfig, OAuthTokens, unix_now},
};

/// Token endpoint exchanges for a confidential client.
///
/// The token endpoint is resolved lazily: either taken from the configuration
/// or discovered from the protected resource on first use.
pub struct ClientCredentialsFlow {
    config: ClientCredentialsConfig,
    client: Client,
    endpoint: OnceCell<DiscoveredEndpoint>,
}

impl ClientCredentialsFlow {
    pub fn new(config: ClientCredentialsConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: ClientCredentialsConfig, client: Client) -> Self {
        Self {
            config,
            client,
            endpoint: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ClientCredentialsConfig {
        &self.config
    }

    async fn endpoint(&self) -> Result<&DiscoveredEndpoint> {
        self.endpoint
            .get_or_try_init(|| async {
                if let Some(token_endpoint) = &self.config.token_endpoint {
                    return Ok(DiscoveredEndpoint {
                        token_endpoint: token_endpoint.clone(),
                        scopes_supported: Vec::new(),
                    });
                }
                let resource = Url::parse(&self.config.resource_url)?;
                discover_token_endpoint(
                    &self.client,
                    &resource,
                    self.config.authorization_server.as_deref(),
                )
                .await
            })
            .await
    }

    /// Configured scopes, or the discovered defaults when none are configured.
    fn scope(&self, endpoint: &DiscoveredEndpoint) -> Option<String> {
        let scopes = if self.config.scopes.is_empty() {
            &endpoint.scopes_supported
        } else {
            &self.config.scopes
        };
        (!scopes.is_empty()).then(|| scopes.join(" "))
    }

    /// Obtain a fresh token with the `client_credentials` grant
    /// (`client_secret_post` authentication).
    pub async fn client_credentials(&self) -> Result<OAuthTokens> {
        let endpoint = self.endpoint().await?;
        let mut form = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            (
                "client_secret".to_string(),
                self.config.client_secret.expose_secret().clone(),
            ),
        ];
        if let Some(scope) = self.scope(endpoint) {
            form.push(("scope".to_string(), scope));
        }

        debug!(endpoint = %endpoint.token_endpoint, client_id = %self.config.client_id, "requesting client credentials token");
        let tokens = self.post_token(&endpoint.token_endpoint, &form).await?;
        info!(client_id = %self.config.client_id, expires_at = ?tokens.expires_at, "obtained OAuth access token");
        Ok(tokens)
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh(&self, refresh_token: &Secret<String>) -> Result<OAuthTokens> {
        let endpoint = self.endpoint().await?;
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            (
                "refresh_token".to_string(),
                refresh_token.expose_secret().clone(),
            ),
            ("client_id".to_string(), self.config.client_id.clone()),
            (
                "client_secret".to_string(),
                self.config.client_secret.expose_secret().clone(),
            ),
        ];

        debug!(endpoint = %endpoint.token_endpoint, "refreshing OAuth access token");
        let mut tokens = self.post_token(&endpoint.token_endpoint, &form).await?;
        // Servers may omit the refresh token when it is unchanged.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.clone());
        }
        Ok(tokens)
    }

    async fn post_token(&self, token_url: &str, form: &[(String, String)]) -> Result<OAuthTokens> {
        let resp = self
            .client
            .post(token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::TokenEndpoint { status, body });
        }

        let body = resp.json::<serde_json::Value>().await?;
        parse_token_response(&body)
    }
}

fn parse_token_response(resp: &serde_json::Value) -> Result<OAuthTokens> {
    let access_token = resp["access_token"]
        .as_str()
        .ok_or_else(|| Error::message("missing access_token in response"))?
        .to_string();

    let refresh_token = resp["refresh_token"].as_str().map(|s| s.to_string());
    let expires_at = resp["expires_in"].as_u64().map(|secs| unix_now() + secs);

    Ok(OAuthTokens {
        access_token: Secret::new(access_token),
        refresh_token: refresh_token.map(Secret::new),
        expires_at,
    })
}
