//! Single-flight access token cache owned by one OAuth-protected transport.

use {
    secrecy::Secret,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{Result, flow::ClientCredentialsFlow, types::OAuthTokens};

/// Renew tokens this many seconds before they expire.
pub const EXPIRY_MARGIN_SECS: u64 = 60;

/// Caches one access token and renews it on demand.
///
/// The slot lock is held across the token exchange, so concurrent callers that
/// find the token stale queue behind a single refresh and all observe its result.
pub struct TokenCache {
    flow: ClientCredentialsFlow,
    slot: Mutex<Option<OAuthTokens>>,
}

impl TokenCache {
    pub fn new(flow: ClientCredentialsFlow) -> Self {
        Self {
            flow,
            slot: Mutex::new(None),
        }
    }

    pub fn flow(&self) -> &ClientCredentialsFlow {
        &self.flow
    }

    /// Return a valid access token, renewing it first if needed.
    pub async fn access_token(&self) -> Result<Secret<String>> {
        let mut slot = self.slot.lock().await;

        if let Some(tokens) = slot.as_ref()
            && !tokens.expires_within(EXPIRY_MARGIN_SECS)
        {
            return Ok(tokens.access_token.clone());
        }

        let refresh_token = slot.as_ref().and_then(|t| t.refresh_token.clone());
        let fresh = match refresh_token {
            Some(refresh_token) => match self.flow.refresh(&refresh_token).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(error = %e, "refresh_token grant failed, falling back to client credentials");
                    self.flow.client_credentials().await?
                },
            },
            None => self.flow.client_credentials().await?,
        };

        let token = fresh.access_token.clone();
        *slot = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token after the server rejected it.
    ///
    /// Only clears the slot if it still holds `rejected`, so a token renewed
    /// by a concurrent caller is not thrown away.
    pub async fn invalidate(&self, rejected: &Secret<String>) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|t| t.is_access_token(rejected)) {
            debug!("invalidating rejected OAuth access token");
            *slot = None;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use {mockito::Matcher, secrecy::ExposeSecret};

    use super::*;
    use crate::types::ClientCredentialsConfig;

    fn cache_for(server: &mockito::Server) -> TokenCache {
        TokenCache::new(ClientCredentialsFlow::new(ClientCredentialsConfig {
            resource_url: format!("{}/mcp", server.url()),
            client_id: "client".into(),
            client_secret: Secret::new("secret".into()),
            token_endpoint: Some(format!("{}/token", server.url())),
            authorization_server: None,
            scopes: vec![],
        }))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_exchange() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"shared","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let cache = Arc::new(cache_for(&server));
        let calls = (0..16).map(|_| {
            let cache = Arc::clone(&cache);
            async move { cache.access_token().await }
        });
        let tokens = futures::future::join_all(calls).await;

        for token in tokens {
            assert_eq!(token.unwrap().expose_secret(), "shared");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn token_inside_margin_is_renewed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"short","expires_in":30}"#)
            .expect(2)
            .create_async()
            .await;

        let cache = cache_for(&server);
        cache.access_token().await.unwrap();
        cache.access_token().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_token_is_preferred_for_renewal() {
        let mut server = mockito::Server::new_async().await;
        let initial = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"first","refresh_token":"rt","expires_in":1}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"second","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let cache = cache_for(&server);
        assert_eq!(cache.access_token().await.unwrap().expose_secret(), "first");
        assert_eq!(cache.access_token().await.unwrap().expose_secret(), "second");
        initial.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn invalidate_ignores_tokens_already_replaced() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"current","expires_in":3600}"#)
            .expect(2)
            .create_async()
            .await;

        let cache = cache_for(&server);
        let current = cache.access_token().await.unwrap();

        cache.invalidate(&Secret::new("older".into())).await;
        cache.access_token().await.unwrap();

        cache.invalidate(&current).await;
        cache.access_token().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn exchange_failure_surfaces_and_leaves_slot_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_client"}"#)
            .expect(2)
            .create_async()
            .await;

        let cache = cache_for(&server);
        assert!(cache.access_token().await.is_err());
        assert!(cache.access_token().await.is_err());
    }
}
