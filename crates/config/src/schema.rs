//! Typed configuration produced by the loader.

use std::collections::HashMap;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_MODEL_ID: &str = "us.anthropic.claude-3-7-sonnet-20250219-v1:0";
pub const DEFAULT_LLM_REGION: &str = "us-west-2";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_LAMBDA_REGION: &str = "us-east-1";
pub const DEFAULT_FUNCTION_URL_REGION: &str = "us-east-2";

/// Fully validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ConduitConfig {
    /// Servers in section order, then name order within a section.
    pub servers: Vec<ServerDescriptor>,
    pub session: SessionConfig,
}

/// One configured server. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportConfig,
}

impl ServerDescriptor {
    /// Config section the server was declared in.
    #[must_use]
    pub fn section(&self) -> &'static str {
        self.transport.section()
    }
}

/// Transport-specific settings, one variant per supported transport.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio(StdioServerConfig),
    LambdaFunction(LambdaFunctionServerConfig),
    LambdaFunctionUrl(FunctionUrlServerConfig),
    OAuth(OAuthServerConfig),
}

impl TransportConfig {
    #[must_use]
    pub fn section(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdioServers",
            Self::LambdaFunction(_) => "lambdaFunctionServers",
            Self::LambdaFunctionUrl(_) => "lambdaFunctionUrlServers",
            Self::OAuth(_) => "oAuthServers",
        }
    }
}

/// A local server spoken to over stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdioServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// The server handles interleaved requests; calls are not serialized.
    #[serde(default)]
    pub pipelining: bool,
}

/// A server hosted in a Lambda function, invoked by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaFunctionServerConfig {
    pub function_name: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides `https://lambda.{region}.amazonaws.com`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

/// A server behind an IAM-authenticated Lambda function URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlServerConfig {
    pub function_url: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// A streamable HTTP server protected by OAuth client credentials.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthServerConfig {
    pub server_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub authorization_server_url: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for OAuthServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthServerConfig")
            .field("server_url", &self.server_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint)
            .field("authorization_server_url", &self.authorization_server_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Conversation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub model_id: String,
    pub region: String,
    pub system_prompt: String,
    /// Upper bound on LLM calls per user utterance.
    pub max_turns: usize,
    pub tool_timeout_secs: u64,
    pub session_timeout_secs: Option<u64>,
    pub connect_attempts: u32,
    pub tool_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.into(),
            region: DEFAULT_LLM_REGION.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_turns: 25,
            tool_timeout_secs: 60,
            session_timeout_secs: None,
            connect_attempts: 3,
            tool_attempts: 2,
        }
    }
}
