//! Consumer options and the Kafka client configuration set

use crate::error::{BridgeError, BridgeResult};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Consumer group used when none is given
pub const DEFAULT_GROUP_ID: &str = "azure-iotedge-consumer";

/// Default session timeout in milliseconds
pub const DEFAULT_SESSION_TIMEOUT_MS: u32 = 30000;

/// Keys whose values never appear in logs
const REDACTED_KEYS: &[&str] = &["sasl.password", "ssl.key.password"];

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// JSON boolean, written as `true`/`false`
    Bool(bool),
    /// JSON integer
    Int(i64),
    /// JSON string, passed through unchanged
    Str(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

/// Explicit consumer options, usually taken from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    /// Kafka broker addresses (comma-separated)
    pub broker_list: Option<String>,

    /// Topics to subscribe to
    pub topics: Vec<String>,

    /// Consumer group ID
    pub consumer_group: Option<String>,

    /// PLAINTEXT, SSL, SASL_PLAINTEXT or SASL_SSL
    pub security_protocol: Option<String>,

    /// SASL mechanism
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// CA certificate used to verify the brokers
    pub ssl_ca_location: Option<String>,

    /// Request the broker's supported API versions on connect
    pub api_version_request: bool,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,

    /// JSON file with additional client properties
    pub override_file: Option<PathBuf>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            broker_list: None,
            topics: Vec::new(),
            consumer_group: None,
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            api_version_request: true,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            override_file: None,
        }
    }
}

/// Builder for ConsumerOptions
pub struct ConsumerOptionsBuilder {
    options: ConsumerOptions,
}

impl ConsumerOptionsBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        Self {
            options: ConsumerOptions::default(),
        }
    }

    /// Set the broker addresses
    pub fn broker_list(mut self, brokers: impl Into<String>) -> Self {
        self.options.broker_list = Some(brokers.into());
        self
    }

    /// Set the topics to consume
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set the consumer group ID
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.options.consumer_group = Some(group.into());
        self
    }

    /// Set the broker security protocol
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.options.security_protocol = Some(protocol.into());
        self
    }

    /// Set SASL mechanism and credentials
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.options.sasl_mechanism = Some(mechanism.into());
        self.options.sasl_username = Some(username.into());
        self.options.sasl_password = Some(password.into());
        self
    }

    /// Set the CA certificate used to verify the brokers
    pub fn ssl_ca_location(mut self, location: impl Into<String>) -> Self {
        self.options.ssl_ca_location = Some(location.into());
        self
    }

    /// Enable or disable the broker API version request
    pub fn api_version_request(mut self, enable: bool) -> Self {
        self.options.api_version_request = enable;
        self
    }

    /// Set the group session timeout in milliseconds
    pub fn session_timeout_ms(mut self, timeout: u32) -> Self {
        self.options.session_timeout_ms = timeout;
        self
    }

    /// Set the override file path
    pub fn override_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.override_file = Some(path.into());
        self
    }

    /// Build the consumer options
    pub fn build(self) -> ConsumerOptions {
        self.options
    }
}

impl Default for ConsumerOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerOptions {
    /// Create a new consumer options builder
    pub fn builder() -> ConsumerOptionsBuilder {
        ConsumerOptionsBuilder::new()
    }

    /// Validate the options that do not depend on the override file
    pub fn validate(&self) -> Result<(), String> {
        if self.topics.is_empty() {
            return Err("Topics cannot be empty".to_string());
        }

        if self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err("Topic names cannot be empty".to_string());
        }

        if self.session_timeout_ms == 0 {
            return Err("Session timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Finalized Kafka client configuration
///
/// Built once per process by layering compiled-in defaults, explicit options
/// and the override file, in that order. Immutable afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigurationSet {
    entries: BTreeMap<String, ConfigValue>,
}

impl ConfigurationSet {
    /// Assemble the configuration set, reading the override file if one is set
    pub fn assemble(options: &ConsumerOptions) -> BridgeResult<Self> {
        let overrides = match &options.override_file {
            Some(path) => load_override_file(path)?,
            None => BTreeMap::new(),
        };
        Self::with_overrides(options, overrides)
    }

    /// Assemble from options and already-loaded override entries
    pub fn with_overrides(
        options: &ConsumerOptions,
        overrides: BTreeMap<String, ConfigValue>,
    ) -> BridgeResult<Self> {
        options.validate().map_err(BridgeError::ConfigError)?;

        let mut entries = compiled_defaults();

        set_if_present(&mut entries, "bootstrap.servers", &options.broker_list);
        set_if_present(&mut entries, "security.protocol", &options.security_protocol);
        set_if_present(&mut entries, "sasl.mechanisms", &options.sasl_mechanism);
        set_if_present(&mut entries, "sasl.username", &options.sasl_username);
        set_if_present(&mut entries, "sasl.password", &options.sasl_password);
        set_if_present(&mut entries, "ssl.ca.location", &options.ssl_ca_location);
        set_if_present(&mut entries, "group.id", &options.consumer_group);
        entries.insert(
            "api.version.request".to_string(),
            options.api_version_request.into(),
        );
        entries.insert(
            "session.timeout.ms".to_string(),
            i64::from(options.session_timeout_ms).into(),
        );

        for (key, value) in overrides {
            if let Some(previous) = entries.get(&key) {
                debug!(key = %key, previous = %redact(&key, previous), "override file replaces option");
            }
            entries.insert(key, value);
        }

        if !entries.contains_key("bootstrap.servers") {
            return Err(BridgeError::ConfigError(
                "bootstrap.servers must be set via --brokerlist or the override file".to_string(),
            ));
        }

        let set = Self { entries };
        info!(config = ?set, "Kafka client configuration assembled");
        Ok(set)
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    /// Check whether a key is set
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the set has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value used as the consumer's member identifier in logs
    pub fn client_id(&self) -> String {
        self.get("client.id")
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Convert into an rdkafka client configuration
    pub fn to_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        for (key, value) in &self.entries {
            client_config.set(key, value.to_string());
        }
        client_config
    }
}

impl fmt::Debug for ConfigurationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, redact(k, v))))
            .finish()
    }
}

/// Read a flat JSON object of scalar values
pub fn load_override_file(path: &Path) -> BridgeResult<BTreeMap<String, ConfigValue>> {
    let contents = std::fs::read_to_string(path).map_err(|source| BridgeError::OverrideFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let entries: BTreeMap<String, ConfigValue> =
        serde_json::from_str(&contents).map_err(|source| BridgeError::OverrideFileFormat {
            path: path.to_path_buf(),
            source,
        })?;

    info!(
        path = %path.display(),
        entries = entries.len(),
        "Loaded Kafka configuration overrides"
    );
    Ok(entries)
}

fn compiled_defaults() -> BTreeMap<String, ConfigValue> {
    let mut defaults = BTreeMap::new();
    defaults.insert("group.id".to_string(), DEFAULT_GROUP_ID.into());
    defaults.insert(
        "client.id".to_string(),
        format!("kafka-iothub-bridge-{}", uuid::Uuid::new_v4()).into(),
    );
    defaults.insert("enable.auto.commit".to_string(), true.into());
    defaults.insert("auto.offset.reset".to_string(), "earliest".into());
    defaults
}

fn set_if_present(entries: &mut BTreeMap<String, ConfigValue>, key: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        entries.insert(key.to_string(), value.into());
    }
}

fn redact(key: &str, value: &ConfigValue) -> String {
    if REDACTED_KEYS.contains(&key) {
        "***".to_string()
    } else {
        value.to_string()
    }
}
