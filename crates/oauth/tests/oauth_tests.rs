#![allow(clippy::unwrap_used, clippy::expect_used)]
use {
    conduit_oauth::{ClientCredentialsConfig, ClientCredentialsFlow, TokenCache},
    mockito::Matcher,
    secrecy::{ExposeSecret, Secret},
};

fn config(resource_url: String) -> ClientCredentialsConfig {
    ClientCredentialsConfig {
        resource_url,
        client_id: "conduit-client".into(),
        client_secret: Secret::new("s3cret".into()),
        token_endpoint: None,
        authorization_server: None,
        scopes: vec![],
    }
}

#[tokio::test]
async fn discovered_endpoint_is_reused_across_renewals() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let probe = server
        .mock("GET", "/mcp")
        .with_status(401)
        .with_header(
            "www-authenticate",
            &format!(r#"Bearer resource_metadata="{base}/.well-known/oauth-protected-resource""#),
        )
        .expect(1)
        .create_async()
        .await;
    let resource = server
        .mock("GET", "/.well-known/oauth-protected-resource")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "resource": format!("{base}/mcp"),
                "authorization_servers": [format!("{base}/auth")],
                "scopes_supported": ["mcp:tools"]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let as_meta = server
        .mock("GET", "/auth/.well-known/oauth-authorization-server")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "issuer": format!("{base}/auth"),
                "token_endpoint": format!("{base}/auth/token"),
                "grant_types_supported": ["client_credentials"]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let token = server
        .mock("POST", "/auth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("scope".into(), "mcp:tools".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at-1","token_type":"Bearer","expires_in":3600}"#)
        .expect(2)
        .create_async()
        .await;

    let cache = TokenCache::new(ClientCredentialsFlow::new(config(format!("{base}/mcp"))));

    let first = cache.access_token().await.unwrap();
    assert_eq!(first.expose_secret(), "at-1");
    // Still fresh: served from the cache.
    let again = cache.access_token().await.unwrap();
    assert_eq!(again.expose_secret(), "at-1");

    cache.invalidate(&first).await;
    let renewed = cache.access_token().await.unwrap();
    assert_eq!(renewed.expose_secret(), "at-1");

    probe.assert_async().await;
    resource.assert_async().await;
    as_meta.assert_async().await;
    token.assert_async().await;
}

#[tokio::test]
async fn resource_without_authorization_server_fails_exchange() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let _probe = server
        .mock("GET", "/mcp")
        .with_status(401)
        .create_async()
        .await;
    let _resource = server
        .mock("GET", "/.well-known/oauth-protected-resource")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"resource":"x","authorization_servers":[]}"#)
        .create_async()
        .await;

    let cache = TokenCache::new(ClientCredentialsFlow::new(config(format!("{base}/mcp"))));
    assert!(cache.access_token().await.is_err());
}
