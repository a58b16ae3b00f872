//! Configuration file management for fleetcast.
//!
//! Reads/writes `~/.fleetcast/config.yaml` with broker, database, web server,
//! and hub settings. Command-line flags override anything read here.

use std::path::PathBuf;

use crate::types::FleetError;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Broadcast queue depth; publishes beyond this are dropped.
    pub capacity: usize,
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            broker: BrokerConfig {
                host: "127.0.0.1".into(),
                port: 1883,
                topic: "gps/+/location".into(),
                client_id: "fleetcast".into(),
            },
            database: DatabaseConfig {
                path: "data/fleetcast.db".into(),
            },
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
            },
            hub: HubConfig {
                capacity: 256,
                write_timeout_ms: 5000,
            },
        }
    }
}

/// Get the config directory path (`~/.fleetcast/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".fleetcast")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.fleetcast/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(text) => parse_config(&text),
        Err(_) => Config::default(),
    }
}

/// Save config to `~/.fleetcast/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, FleetError> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).map_err(|e| FleetError::Config(e.to_string()))?;

    let path = config_file();
    std::fs::write(&path, serialize_config(config))
        .map_err(|e| FleetError::Config(e.to_string()))?;

    Ok(path)
}

/// Parse simple YAML-like config text. Unknown keys and unparseable values
/// keep their defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = if val.is_empty() {
                Some(key.to_string())
            } else {
                None
            };
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("broker", "host") => set_string(&mut config.broker.host, val),
            ("broker", "port") => set_parsed(&mut config.broker.port, val),
            ("broker", "topic") => set_string(&mut config.broker.topic, val),
            ("broker", "client_id") => set_string(&mut config.broker.client_id, val),
            ("database", "path") => set_string(&mut config.database.path, val),
            ("server", "host") => set_string(&mut config.server.host, val),
            ("server", "port") => set_parsed(&mut config.server.port, val),
            ("hub", "capacity") => set_parsed(&mut config.hub.capacity, val),
            ("hub", "write_timeout_ms") => set_parsed(&mut config.hub.write_timeout_ms, val),
            _ => {}
        }
    }

    config
}

fn set_string(slot: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *slot = v;
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) {
    if let Some(v) = parse_string_value(val).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let lines = [
        "# fleetcast configuration".to_string(),
        String::new(),
        "broker:".into(),
        format!("  host: \"{}\"", config.broker.host),
        format!("  port: {}", config.broker.port),
        format!("  topic: \"{}\"", config.broker.topic),
        format!("  client_id: \"{}\"", config.broker.client_id),
        String::new(),
        "database:".into(),
        format!("  path: \"{}\"", config.database.path),
        String::new(),
        "server:".into(),
        format!("  host: \"{}\"", config.server.host),
        format!("  port: {}", config.server.port),
        String::new(),
        "hub:".into(),
        format!("  capacity: {}", config.hub.capacity),
        format!("  write_timeout_ms: {}", config.hub.write_timeout_ms),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hub.capacity, 256);
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
broker:
  host: "mqtt.internal"
  port: 8883
  topic: "fleet/#"

database:
  path: "/tmp/test.db"

server:
  host: "127.0.0.1"
  port: 9090

hub:
  capacity: 16
  write_timeout_ms: 250
"#;
        let config = parse_config(text);
        assert_eq!(config.broker.host, "mqtt.internal");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.topic, "fleet/#");
        assert_eq!(config.broker.client_id, "fleetcast");
        assert_eq!(config.database.path, "/tmp/test.db");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.hub.capacity, 16);
        assert_eq!(config.hub.write_timeout_ms, 250);
    }

    #[test]
    fn test_parse_config_bad_values_keep_defaults() {
        let text = r#"
server:
  port: not-a-port
hub:
  capacity: ~
"#;
        let config = parse_config(text);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hub.capacity, 256);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.broker.topic = "gps/bus/location".into();
        config.database.path = "fleet.db".into();
        config.hub.capacity = 1024;

        let parsed = parse_config(&serialize_config(&config));
        assert_eq!(parsed, config);
    }
}
