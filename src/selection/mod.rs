//! Deployment selection
//!
//! Resolves which server, app types and command groups a deployment
//! covers. Pure: interactive front ends fill the request first and then
//! call `resolve`.

use crate::config::{Config, ServerDescriptor};

/// What the user asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Server name; may be omitted when the configuration has one server
    pub server: Option<String>,
    pub app_types: Vec<String>,
    pub command_groups: Vec<String>,
}

/// A validated selection
#[derive(Debug, Clone)]
pub struct SelectionResult<'a> {
    pub server: &'a ServerDescriptor,
    /// Unique, in request order
    pub app_types: Vec<String>,
    /// Unique, in request order
    pub command_groups: Vec<String>,
}

impl SelectionResult<'_> {
    pub fn is_empty(&self) -> bool {
        self.app_types.is_empty() && self.command_groups.is_empty()
    }
}

/// Selection errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("a server must be chosen, available: {}", .0.join(", "))]
    ServerRequired(Vec<String>),

    #[error("unknown server '{0}'")]
    UnknownServer(String),

    #[error("server '{server}' has no app type '{app_type}', available: {}", .available.join(", "))]
    UnknownAppType {
        server: String,
        app_type: String,
        available: Vec<String>,
    },

    #[error("server '{server}' has no command group '{group}', available: {}", .available.join(", "))]
    UnknownGroup {
        server: String,
        group: String,
        available: Vec<String>,
    },

    #[error("nothing selected: choose at least one app type or command group")]
    NothingSelected,
}

fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// Validate a request against the configuration
pub fn resolve(config: &Config, request: SelectionRequest) -> Result<SelectionResult<'_>, SelectionError> {
    let server = match request.server.as_deref() {
        Some(name) => config
            .servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SelectionError::UnknownServer(name.to_string()))?,
        None => match config.servers.as_slice() {
            [only] => only,
            _ => {
                return Err(SelectionError::ServerRequired(
                    config.server_names().into_iter().map(String::from).collect(),
                ))
            }
        },
    };

    let app_types = dedup_in_order(request.app_types);
    if let Some(unknown) = app_types.iter().find(|a| !server.has_app_type(a)) {
        return Err(SelectionError::UnknownAppType {
            server: server.name.clone(),
            app_type: unknown.clone(),
            available: server.app_types().into_iter().map(String::from).collect(),
        });
    }

    let command_groups = dedup_in_order(request.command_groups);
    if let Some(unknown) = command_groups.iter().find(|g| !server.command_groups.contains_key(*g)) {
        return Err(SelectionError::UnknownGroup {
            server: server.name.clone(),
            group: unknown.clone(),
            available: server.group_names().into_iter().map(String::from).collect(),
        });
    }

    if app_types.is_empty() && command_groups.is_empty() {
        return Err(SelectionError::NothingSelected);
    }

    tracing::debug!(
        server = %server.name,
        app_types = ?app_types,
        command_groups = ?command_groups,
        "selection resolved"
    );
    Ok(SelectionResult {
        server,
        app_types,
        command_groups,
    })
}
