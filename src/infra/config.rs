//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument (parsed by the binary)
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and every key is optional; missing values take the defaults
//! below.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// SQLite file holding the `access_points` table
    #[serde(default = "default_database")]
    pub database: String,
    /// Idle connections kept open between lookup batches
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self { database: default_database(), max_idle_connections: default_max_idle_connections() }
    }
}

fn default_database() -> String {
    "wifi_database.db".to_string()
}

fn default_max_idle_connections() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: default_history_capacity() }
    }
}

fn default_history_capacity() -> usize {
    crate::services::history::DEFAULT_HISTORY_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Subscribe to uplinks over MQTT in addition to the webhook
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            client_id: default_mqtt_client_id(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "v3/+/devices/+/up".to_string()
}

fn default_mqtt_client_id() -> String {
    "wifi-locator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: default_log_format() }
    }
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    bind_address: String,
    http_port: u16,
    database: String,
    max_idle_connections: usize,
    history_capacity: usize,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    metrics_interval_secs: u64,
    log_format: LogFormat,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            bind_address: toml_config.server.bind_address,
            http_port: toml_config.server.port,
            database: toml_config.repository.database,
            max_idle_connections: toml_config.repository.max_idle_connections,
            history_capacity: toml_config.history.capacity.max(1),
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            // interval(0) panics in tokio
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            log_format: toml_config.logging.format,
            config_file,
        }
    }

    /// Config path to use when none is given on the command line
    pub fn default_config_path() -> String {
        path_or_default(env::var("CONFIG_FILE").ok())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn max_idle_connections(&self) -> usize {
        self.max_idle_connections
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

fn path_or_default(from_env: Option<String>) -> String {
    from_env.filter(|p| !p.is_empty()).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "127.0.0.1");
        assert_eq!(config.http_port(), 8000);
        assert_eq!(config.database(), "wifi_database.db");
        assert_eq!(config.max_idle_connections(), 4);
        assert_eq!(config.history_capacity(), 100);
        assert!(!config.mqtt_enabled());
        assert_eq!(config.mqtt_topic(), "v3/+/devices/+/up");
        assert_eq!(config.mqtt_client_id(), "wifi-locator");
        assert_eq!(config.metrics_interval_secs(), 60);
        assert_eq!(config.log_format(), LogFormat::Text);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[server]
port = 9000

[mqtt]
enabled = true
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.http_port(), 9000);
        assert_eq!(config.bind_address(), "127.0.0.1");
        assert!(config.mqtt_enabled());
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_username(), None);
    }

    #[test]
    fn test_zero_capacity_raised() {
        let toml_config: TomlConfig = toml::from_str("[history]\ncapacity = 0\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.history_capacity(), 1);
    }

    #[test]
    fn test_json_log_format() {
        let toml_config: TomlConfig = toml::from_str("[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(Config::from_toml(toml_config, String::new()).log_format(), LogFormat::Json);
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(toml::from_str::<TomlConfig>("[logging]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn test_config_path_from_env_or_default() {
        assert_eq!(path_or_default(Some("config/prod.toml".to_string())), "config/prod.toml");
        assert_eq!(path_or_default(Some(String::new())), DEFAULT_CONFIG_PATH);
        assert_eq!(path_or_default(None), DEFAULT_CONFIG_PATH);
    }
}
