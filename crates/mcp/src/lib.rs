//! MCP (Model Context Protocol) client support for conduit.
//!
//! This crate provides:
//! - JSON-RPC 2.0 over stdio, Lambda invoke and streamable HTTP channels
//! - MCP client for protocol handshake and tool interactions (`client`)
//! - A single tool namespace across servers (`registry`)
//! - Server lifecycle management and call routing (`manager`)

pub mod client;
pub mod error;
pub mod factory;
pub mod http_transport;
pub mod lambda_transport;
pub mod manager;
pub mod registry;
pub mod traits;
pub mod transport;
pub mod types;

pub use {
    client::McpClient,
    error::{Error, Result},
    factory::{build_transport, build_transports},
    http_transport::{
        FunctionUrlTransport, HttpAuth, HttpConnector, HttpTransport, OAuthBearer,
        OAuthHttpTransport, SigV4Auth,
    },
    lambda_transport::{LambdaInvokeConnector, LambdaInvokeTransport},
    manager::{ManagerOptions, McpManager, StartReport},
    registry::ToolRegistry,
    traits::{ChannelConnector, McpTransport, ServerTransport},
    transport::{StdioConnector, StdioTransport},
    types::{FailureKind, McpTransportError, ToolDefinition, ToolsCallResult, TransportResult},
};
