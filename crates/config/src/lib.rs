//! Configuration loading and validation.
//!
//! The config file is JSON (`servers_config.json` by default) with one section
//! per transport kind. Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{DEFAULT_CONFIG_FILE, load_config, parse_config, parse_config_with},
    schema::{
        ConduitConfig, FunctionUrlServerConfig, LambdaFunctionServerConfig, OAuthServerConfig,
        ServerDescriptor, SessionConfig, StdioServerConfig, TransportConfig,
    },
};
