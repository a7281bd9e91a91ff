use std::path::Path;

use {serde::de::DeserializeOwned, tracing::debug};

use crate::{
    env_subst::expand_placeholders,
    error::{Error, Result},
    schema::{ConduitConfig, ServerDescriptor, SessionConfig, TransportConfig},
    validate::{check_unique_names, validate_server},
};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "servers_config.json";

/// Load config from the given path.
pub fn load_config(path: &Path) -> Result<ConduitConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&raw)?;
    debug!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded config"
    );
    Ok(config)
}

/// Parse config text, substituting `${VAR}` from the process environment.
pub fn parse_config(raw: &str) -> Result<ConduitConfig> {
    parse_config_with(raw, |name| std::env::var(name).ok())
}

/// Parse config text against a custom variable lookup.
pub fn parse_config_with(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConduitConfig> {
    let mut root: serde_json::Value = serde_json::from_str(raw)?;
    expand_placeholders(&mut root, &lookup);
    let root = root
        .as_object()
        .ok_or_else(|| Error::message("config root must be a JSON object"))?;

    let mut servers = Vec::new();
    collect_section(root, "stdioServers", &mut servers, TransportConfig::Stdio)?;
    collect_section(
        root,
        "lambdaFunctionServers",
        &mut servers,
        TransportConfig::LambdaFunction,
    )?;
    collect_section(
        root,
        "lambdaFunctionUrlServers",
        &mut servers,
        TransportConfig::LambdaFunctionUrl,
    )?;
    collect_section(root, "oAuthServers", &mut servers, TransportConfig::OAuth)?;

    check_unique_names(&servers)?;
    for server in &mut servers {
        validate_server(server, &lookup)?;
    }

    let session = match root.get("session") {
        None | Some(serde_json::Value::Null) => SessionConfig::default(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Error::message(format!("session: {e}")))?,
    };
    if session.max_turns == 0 {
        return Err(Error::message("session.maxTurns must be at least 1"));
    }

    Ok(ConduitConfig { servers, session })
}

/// Deserialize each server of one section on its own so errors name it.
fn collect_section<T: DeserializeOwned>(
    root: &serde_json::Map<String, serde_json::Value>,
    section: &'static str,
    out: &mut Vec<ServerDescriptor>,
    wrap: fn(T) -> TransportConfig,
) -> Result<()> {
    let entries = match root.get(section) {
        None | Some(serde_json::Value::Null) => return Ok(()),
        Some(serde_json::Value::Object(entries)) => entries,
        Some(_) => {
            return Err(Error::message(format!(
                "{section} must map server names to settings"
            )));
        },
    };

    for (name, settings) in entries {
        let parsed: T = serde_json::from_value(settings.clone())
            .map_err(|e| Error::server(section, name, e))?;
        out.push(ServerDescriptor {
            name: name.clone(),
            transport: wrap(parsed),
        });
    }
    Ok(())
}
