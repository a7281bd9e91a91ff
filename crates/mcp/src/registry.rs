//! ToolRegistry: one tool namespace across every connected server.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::types::{McpTransportError, ToolDefinition, TransportResult};

/// Separator between server and tool in a qualified name.
pub const QUALIFIED_SEPARATOR: &str = "__";

/// Build the name a colliding tool is exposed under.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced so the result stays a
/// valid tool name for the model.
#[must_use]
pub fn qualified_name(server: &str, tool: &str) -> String {
    let sanitized: String = server
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}{QUALIFIED_SEPARATOR}{tool}")
}

#[derive(Debug, Clone)]
struct Entry {
    exposed_name: String,
    definition: ToolDefinition,
}

/// Aggregated tool catalog.
///
/// Tools keep their own name while it is unique. When two servers advertise the
/// same name, every tool with that name is exposed only as `{server}__{tool}`.
/// Built once per session start and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    /// Raw tool names advertised by more than one server.
    collided: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one server's tools into the catalog.
    pub fn register(&mut self, server: &str, tools: Vec<ToolDefinition>) {
        debug!(server = %server, count = tools.len(), "registering MCP tools");

        for mut definition in tools {
            definition.server = server.to_string();
            let name = definition.name.clone();

            if self.collided.contains(&name) {
                self.insert(qualified_name(server, &name), definition);
                continue;
            }

            let Some(&idx) = self.index.get(&name) else {
                self.insert(name, definition);
                continue;
            };

            let existing = &self.entries[idx];
            if existing.definition.name != name {
                // The raw name equals another tool's qualified name.
                warn!(
                    server = %server,
                    tool = %name,
                    "tool name clashes with a qualified tool name, skipping"
                );
                continue;
            }
            if existing.definition.server == server {
                warn!(server = %server, tool = %name, "server advertised a tool twice, keeping the first");
                continue;
            }

            let first_server = existing.definition.server.clone();
            let requalified = qualified_name(&first_server, &name);
            self.index.remove(&name);
            self.entries[idx].exposed_name = requalified.clone();
            self.index.insert(requalified, idx);
            self.collided.insert(name.clone());

            warn!(
                tool = %name,
                first = %first_server,
                second = %server,
                "tool name collision, exposing both under server-qualified names"
            );
            self.insert(qualified_name(server, &name), definition);
        }
    }

    fn insert(&mut self, exposed_name: String, definition: ToolDefinition) {
        if self.index.contains_key(&exposed_name) {
            warn!(
                server = %definition.server,
                tool = %definition.name,
                exposed = %exposed_name,
                "qualified tool name already taken, skipping"
            );
            return;
        }
        self.index.insert(exposed_name.clone(), self.entries.len());
        self.entries.push(Entry {
            exposed_name,
            definition,
        });
    }

    /// Map an exposed name back to `(server, tool name on that server)`.
    pub fn resolve(&self, exposed_name: &str) -> TransportResult<(&str, &str)> {
        let entry = self
            .index
            .get(exposed_name)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| McpTransportError::UnknownTool(exposed_name.to_string()))?;
        Ok((&entry.definition.server, &entry.definition.name))
    }

    /// Snapshot of every tool under its exposed name, in registration order.
    pub fn all_definitions(&self) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .map(|entry| ToolDefinition {
                name: entry.exposed_name.clone(),
                ..entry.definition.clone()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
