//! Per-server validation and default resolution.

use std::collections::HashMap;

use url::Url;

use crate::{
    error::{Error, Result},
    schema::{
        DEFAULT_FUNCTION_URL_REGION, DEFAULT_LAMBDA_REGION, ServerDescriptor, TransportConfig,
    },
};

/// Server names must be unique across every section.
pub fn check_unique_names(servers: &[ServerDescriptor]) -> Result<()> {
    let mut seen: HashMap<&str, &'static str> = HashMap::new();
    for server in servers {
        if let Some(first) = seen.insert(server.name.as_str(), server.section()) {
            return Err(Error::DuplicateServer {
                server: server.name.clone(),
                first,
                second: server.section(),
            });
        }
    }
    Ok(())
}

/// Check required values and fill in region defaults.
pub fn validate_server(
    server: &mut ServerDescriptor,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<()> {
    let section = server.section();
    let name = server.name.clone();
    let fail = |message: String| Error::server(section, name.clone(), message);

    if name.trim().is_empty() {
        return Err(fail("server name must not be empty".into()));
    }

    match &mut server.transport {
        TransportConfig::Stdio(cfg) => {
            if cfg.command.trim().is_empty() {
                return Err(fail("command must not be empty".into()));
            }
        },
        TransportConfig::LambdaFunction(cfg) => {
            if cfg.function_name.trim().is_empty() {
                return Err(fail("functionName must not be empty".into()));
            }
            if let Some(endpoint) = &cfg.endpoint_url {
                require_http_url(endpoint, "endpointUrl").map_err(&fail)?;
            }
            if cfg.region.is_none() {
                cfg.region = Some(
                    lookup("AWS_REGION")
                        .or_else(|| lookup("AWS_DEFAULT_REGION"))
                        .unwrap_or_else(|| DEFAULT_LAMBDA_REGION.to_string()),
                );
            }
        },
        TransportConfig::LambdaFunctionUrl(cfg) => {
            require_http_url(&cfg.function_url, "functionUrl").map_err(&fail)?;
            if cfg.region.is_none() {
                cfg.region = Some(DEFAULT_FUNCTION_URL_REGION.to_string());
            }
        },
        TransportConfig::OAuth(cfg) => {
            require_http_url(&cfg.server_url, "serverUrl").map_err(&fail)?;
            if cfg.client_id.trim().is_empty() {
                return Err(fail("clientId must not be empty".into()));
            }
            if let Some(endpoint) = &cfg.token_endpoint {
                require_http_url(endpoint, "tokenEndpoint").map_err(&fail)?;
            }
            if let Some(endpoint) = &cfg.authorization_server_url {
                require_http_url(endpoint, "authorizationServerUrl").map_err(&fail)?;
            }
        },
    }
    Ok(())
}

fn require_http_url(raw: &str, field: &str) -> std::result::Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("{field} is not a valid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{field} must use http or https, got {other}")),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::FunctionUrlServerConfig};

    fn url_server(url: &str) -> ServerDescriptor {
        ServerDescriptor {
            name: "fn".into(),
            transport: TransportConfig::LambdaFunctionUrl(FunctionUrlServerConfig {
                function_url: url.into(),
                region: None,
            }),
        }
    }

    #[test]
    fn rejects_non_http_urls() {
        let mut server = url_server("ftp://example.com/");
        let err = validate_server(&mut server, &|_| None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "lambdaFunctionUrlServers.fn: functionUrl must use http or https, got ftp"
        );
    }

    #[test]
    fn rejects_relative_urls() {
        let mut server = url_server("/relative");
        let err = validate_server(&mut server, &|_| None).unwrap_err();
        assert!(err.to_string().contains("functionUrl is not a valid URL"));
    }

    #[test]
    fn fills_function_url_region() {
        let mut server = url_server("https://abc.lambda-url.us-east-2.on.aws/");
        validate_server(&mut server, &|_| None).unwrap();
        match server.transport {
            TransportConfig::LambdaFunctionUrl(cfg) => {
                assert_eq!(cfg.region.as_deref(), Some(DEFAULT_FUNCTION_URL_REGION));
            },
            _ => unreachable!(),
        }
    }
}
