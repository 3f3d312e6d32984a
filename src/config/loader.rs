//! Configuration loading
//!
//! Reads a YAML or TOML document, records its SHA-256 digest, normalises it
//! to a JSON value tree and hands it to validation.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::model::{Config, ConfigSource};
use super::validate::build_config;
use super::ConfigError;

/// Document syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension; anything but `.toml` is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let digest = digest_bytes(&bytes);
        tracing::debug!(path = %path.display(), digest = %digest, "loaded config");

        let contents = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: format!("Invalid UTF-8: {}", e),
        })?;

        let doc = parse_document(&contents, ConfigFormat::from_path(path)).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;

        build_config(
            &doc,
            ConfigSource {
                path: Some(path.display().to_string()),
                digest,
            },
        )
    }

    /// Parse and validate an in-memory document
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let doc = parse_document(contents, format).map_err(|message| ConfigError::Parse {
            path: "<inline>".to_string(),
            message,
        })?;
        build_config(
            &doc,
            ConfigSource {
                path: None,
                digest: digest_bytes(contents.as_bytes()),
            },
        )
    }
}

fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn parse_document(contents: &str, format: ConfigFormat) -> Result<Value, String> {
    match format {
        ConfigFormat::Yaml => {
            let value: Value = serde_yaml::from_str(contents).map_err(|e| format!("YAML parse error: {}", e))?;
            // An empty YAML file parses to null
            Ok(if value.is_null() { Value::Object(Default::default()) } else { value })
        }
        ConfigFormat::Toml => {
            let value: toml::Value = toml::from_str(contents).map_err(|e| format!("TOML parse error: {}", e))?;
            Ok(toml_to_json(value))
        }
    }
}

/// Convert TOML Value to JSON Value
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
license_key: "ABCD-1234"
servers:
  - name: web-1
    host: 10.0.0.5
    username: deploy
    auth:
      type: password
      password: 123456
    commands:
      restart:
        - cd /srv/app
        - ./restart.sh
"#;

    const TOML: &str = r#"
license_key = "ABCD-1234"

[[servers]]
name = "web-1"
host = "10.0.0.5"
port = 2222
username = "deploy"
auth = { type = "password" }

[servers.upload]
web = [{ local_path = "./dist", remote_path = "/srv/www", mode = "sync" }]
"#;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("deploy.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("deploy.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("deploy.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("deploy")), ConfigFormat::Yaml);
    }

    #[test]
    fn test_parse_yaml() {
        let config = Config::parse(YAML, ConfigFormat::Yaml).unwrap();
        let server = config.server("web-1").unwrap();

        assert_eq!(config.license_key.as_deref(), Some("ABCD-1234"));
        assert_eq!(server.command_groups["restart"], vec!["cd /srv/app", "./restart.sh"]);
        assert_eq!(server.auth.summary(), "password");
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(TOML, ConfigFormat::Toml).unwrap();
        let server = &config.servers[0];

        assert_eq!(server.port, 2222);
        assert_eq!(server.upload_sets["web"][0].remote_path, "/srv/www");
    }

    #[test]
    fn test_load_records_digest() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.source.digest.len(), 64);
        assert_eq!(config.source.digest, digest_bytes(YAML.as_bytes()));
        assert!(config.source.path.is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/deploy.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Config::parse("servers: [unclosed", ConfigFormat::Yaml),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::parse("servers = ", ConfigFormat::Toml),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(Config::parse("{}", ConfigFormat::Yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_server() {
        let config = Config::parse(YAML, ConfigFormat::Yaml).unwrap();
        assert!(matches!(config.server("db-9"), Err(ConfigError::UnknownServer(_))));
    }
}
