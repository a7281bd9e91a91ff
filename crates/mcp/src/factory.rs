//! Selects the transport for each configured server.

use std::sync::Arc;

use {
    conduit_config::{ServerDescriptor, TransportConfig, schema::DEFAULT_FUNCTION_URL_REGION},
    conduit_oauth::{ClientCredentialsConfig, ClientCredentialsFlow, TokenCache},
    conduit_sigv4::{SharedCredentialsProvider, SigV4Signer},
};

use crate::{
    client::McpClient,
    http_transport::{HttpConnector, OAuthBearer, SigV4Auth},
    lambda_transport::LambdaInvokeConnector,
    traits::ServerTransport,
    transport::StdioConnector,
};

/// Build the (not yet connected) transport for one server.
///
/// AWS credentials are only consulted by the Lambda-backed variants, and only
/// when a request is signed.
pub fn build_transport(
    server: &ServerDescriptor,
    credentials: &SharedCredentialsProvider,
) -> Arc<dyn ServerTransport> {
    let name = server.name.clone();
    let client = match &server.transport {
        TransportConfig::Stdio(cfg) => {
            let client = McpClient::new(name.clone(), Box::new(StdioConnector::new(&name, cfg.clone())));
            if cfg.pipelining {
                client
            } else {
                client.with_serialized_calls()
            }
        },
        TransportConfig::LambdaFunction(cfg) => McpClient::new(
            name,
            Box::new(LambdaInvokeConnector::new(cfg.clone(), Arc::clone(credentials))),
        ),
        TransportConfig::LambdaFunctionUrl(cfg) => {
            let region = cfg
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_FUNCTION_URL_REGION.to_string());
            let signer = SigV4Signer::new(region, "lambda", Arc::clone(credentials));
            McpClient::new(
                name,
                Box::new(HttpConnector::new(cfg.function_url.clone(), SigV4Auth::new(signer))),
            )
        },
        TransportConfig::OAuth(cfg) => {
            let flow = ClientCredentialsFlow::new(ClientCredentialsConfig {
                resource_url: cfg.server_url.clone(),
                client_id: cfg.client_id.clone(),
                client_secret: cfg.client_secret.clone(),
                token_endpoint: cfg.token_endpoint.clone(),
                authorization_server: cfg.authorization_server_url.clone(),
                scopes: cfg.scopes.clone(),
            });
            let tokens = Arc::new(TokenCache::new(flow));
            McpClient::new(
                name,
                Box::new(HttpConnector::new(cfg.server_url.clone(), OAuthBearer::new(tokens))),
            )
        },
    };
    Arc::new(client)
}

/// Build transports for every server, in configuration order.
pub fn build_transports(
    servers: &[ServerDescriptor],
    credentials: &SharedCredentialsProvider,
) -> Vec<Arc<dyn ServerTransport>> {
    servers
        .iter()
        .map(|server| build_transport(server, credentials))
        .collect()
}
