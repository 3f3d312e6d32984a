//! Document validation
//!
//! Walks the normalised JSON tree and builds typed descriptors, rejecting
//! the whole document on the first malformed field. Error messages carry a
//! location such as `server 'web-1': upload.frontend[0].mode`.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde_json::{Map, Value};

use super::model::{AuthMethod, Config, ConfigSource, LocalCommandSpec, ServerDescriptor, UploadMode, UploadTask};
use super::{expand_path, ConfigError};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Build a `Config` from a parsed document
pub fn build_config(doc: &Value, source: ConfigSource) -> Result<Config, ConfigError> {
    let root = as_object(doc, "document")?;

    let license_key = opt_string(root, "license_key", "document")?.filter(|k| !k.trim().is_empty());
    let license_url = opt_string(root, "license_url", "document")?;
    let keep_session = opt_bool(root, "keep_session", "document")?.unwrap_or(true);

    let servers = match root.get("servers") {
        None | Some(Value::Null) => return Err(invalid("document: missing field 'servers'")),
        Some(Value::Array(items)) if items.is_empty() => {
            return Err(invalid("document: 'servers' must list at least one server"))
        }
        Some(Value::Array(items)) => items,
        Some(_) => return Err(invalid("document: 'servers' must be a list")),
    };

    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(servers.len());
    for (index, item) in servers.iter().enumerate() {
        let server = build_server(item, index)?;
        if !seen.insert(server.name.clone()) {
            return Err(invalid(format!("duplicate server name '{}'", server.name)));
        }
        descriptors.push(server);
    }

    Ok(Config {
        license_key,
        license_url,
        keep_session,
        servers: descriptors,
        source,
    })
}

fn build_server(value: &Value, index: usize) -> Result<ServerDescriptor, ConfigError> {
    let at = format!("server #{}", index);
    let map = as_object(value, &at)?;

    let name = req_string(map, "name", &at)?;
    let at = format!("server '{}'", name);

    let host = req_string(map, "host", &at)?;
    let username = req_string(map, "username", &at)?;
    let port = match map.get("port") {
        None | Some(Value::Null) => DEFAULT_PORT,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(p) if (1..=65535).contains(&p) => p as u16,
            _ => return Err(invalid(format!("{}: port must be between 1 and 65535, got {}", at, n))),
        },
        Some(other) => return Err(invalid(format!("{}: port must be a number, got {}", at, other))),
    };

    let auth = build_auth(map.get("auth"), &at)?;
    let upload_sets = build_upload_sets(map.get("upload"), &at)?;
    let command_groups = build_command_groups(map.get("commands"), &at)?;
    let local_command_sets = build_local_commands(map.get("local_commands"), &at)?;

    Ok(ServerDescriptor {
        name,
        host,
        port,
        username,
        auth,
        upload_sets,
        command_groups,
        local_command_sets,
    })
}

fn build_auth(value: Option<&Value>, at: &str) -> Result<AuthMethod, ConfigError> {
    let at = format!("{}: auth", at);
    let map = match value {
        None | Some(Value::Null) => return Err(invalid(format!("{}: missing", at))),
        Some(v) => as_object(v, &at)?,
    };

    let kind = req_string(map, "type", &at)?;
    let password = opt_string(map, "password", &at)?.filter(|p| !p.is_empty());

    match kind.as_str() {
        "ssh_key" => {
            let key_path = expand_path(&req_string(map, "key_path", &at)?);
            if !key_path.exists() {
                tracing::warn!(path = %key_path.display(), "{}: key file does not exist yet", at);
            }
            Ok(AuthMethod::SshKey {
                key_path,
                passphrase: password,
            })
        }
        "password" => Ok(AuthMethod::Password { password }),
        other => Err(invalid(format!(
            "{}.type must be 'ssh_key' or 'password', got '{}'",
            at, other
        ))),
    }
}

fn build_upload_sets(value: Option<&Value>, at: &str) -> Result<BTreeMap<String, Vec<UploadTask>>, ConfigError> {
    let mut sets = BTreeMap::new();
    let Some(map) = opt_object(value, &format!("{}: upload", at))? else {
        return Ok(sets);
    };

    for (app_type, tasks) in map {
        let set_at = format!("{}: upload.{}", at, app_type);
        let items = as_array(tasks, &set_at)?;
        let mut parsed = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            parsed.push(build_upload_task(item, &format!("{}[{}]", set_at, i))?);
        }
        sets.insert(app_type.clone(), parsed);
    }
    Ok(sets)
}

fn build_upload_task(value: &Value, at: &str) -> Result<UploadTask, ConfigError> {
    let map = as_object(value, at)?;
    let local_path = expand_path(&req_string(map, "local_path", at)?);
    let remote_path = req_string(map, "remote_path", at)?;
    let mode = match opt_string(map, "mode", at)?.as_deref() {
        None | Some("copy") => UploadMode::Copy,
        Some("sync") => UploadMode::Sync,
        Some(other) => {
            return Err(invalid(format!("{}.mode must be 'copy' or 'sync', got '{}'", at, other)));
        }
    };
    let delete_extra = opt_bool(map, "delete_extra", at)?.unwrap_or(false);

    Ok(UploadTask {
        local_path,
        remote_path,
        mode,
        delete_extra,
    })
}

fn build_command_groups(value: Option<&Value>, at: &str) -> Result<BTreeMap<String, Vec<String>>, ConfigError> {
    let mut groups = BTreeMap::new();
    let Some(map) = opt_object(value, &format!("{}: commands", at))? else {
        return Ok(groups);
    };

    for (group, commands) in map {
        let group_at = format!("{}: commands.{}", at, group);
        groups.insert(group.clone(), string_list(commands, &group_at)?);
    }
    Ok(groups)
}

fn build_local_commands(
    value: Option<&Value>,
    at: &str,
) -> Result<BTreeMap<String, LocalCommandSpec>, ConfigError> {
    let mut sets = BTreeMap::new();
    let Some(map) = opt_object(value, &format!("{}: local_commands", at))? else {
        return Ok(sets);
    };

    for (app_type, spec) in map {
        let spec_at = format!("{}: local_commands.{}", at, app_type);
        let spec_map = as_object(spec, &spec_at)?;
        let commands = match spec_map.get("commands") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => string_list(v, &format!("{}.commands", spec_at))?,
        };
        let working_dir: Option<PathBuf> = opt_string(spec_map, "working_dir", &spec_at)?.map(|d| expand_path(&d));
        let stop_on_error = opt_bool(spec_map, "stop_on_error", &spec_at)?.unwrap_or(true);

        sets.insert(
            app_type.clone(),
            LocalCommandSpec {
                commands,
                working_dir,
                stop_on_error,
            },
        );
    }
    Ok(sets)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn as_object<'a>(value: &'a Value, at: &str) -> Result<&'a Map<String, Value>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| invalid(format!("{}: expected a mapping, got {}", at, type_name(value))))
}

fn opt_object<'a>(value: Option<&'a Value>, at: &str) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_object(v, at).map(Some),
    }
}

fn as_array<'a>(value: &'a Value, at: &str) -> Result<&'a Vec<Value>, ConfigError> {
    value
        .as_array()
        .ok_or_else(|| invalid(format!("{}: expected a list, got {}", at, type_name(value))))
}

fn string_list(value: &Value, at: &str) -> Result<Vec<String>, ConfigError> {
    as_array(value, at)?
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(invalid(format!("{}[{}]: expected a string, got {}", at, i, type_name(other)))),
        })
        .collect()
}

fn opt_string(map: &Map<String, Value>, key: &str, at: &str) -> Result<Option<String>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        // Numeric passwords are often written unquoted
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(invalid(format!("{}.{}: expected a string, got {}", at, key, type_name(other)))),
    }
}

fn req_string(map: &Map<String, Value>, key: &str, at: &str) -> Result<String, ConfigError> {
    match opt_string(map, key, at)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(invalid(format!("{}.{}: must not be empty", at, key))),
        None => Err(invalid(format!("{}: missing field '{}'", at, key))),
    }
}

fn opt_bool(map: &Map<String, Value>, key: &str, at: &str) -> Result<Option<bool>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(invalid(format!("{}.{}: expected a boolean, got {}", at, key, type_name(other)))),
    }
}
