/// Configuration for a Redis input instance
///
/// Settings are layered from (lowest to highest precedence):
/// 1. Built-in defaults
/// 2. An optional TOML file
/// 3. `REDIS_INPUT_*` environment variables (a `.env` file is loaded first if present)
///
/// # Environment Variables
///
/// - `REDIS_INPUT_HOST`: Redis host (default: 127.0.0.1)
/// - `REDIS_INPUT_PORT`: Redis port (default: 6379)
/// - `REDIS_INPUT_DB`: Database index (default: 0)
/// - `REDIS_INPUT_TIMEOUT`: Connect timeout in seconds (default: 5)
/// - `REDIS_INPUT_PASSWORD`: Password (default: none)
/// - `REDIS_INPUT_KEY`: List name, channel name or channel pattern (required)
/// - `REDIS_INPUT_DATA_TYPE`: `list`, `channel` or `pattern_channel` (default: list)
/// - `REDIS_INPUT_BATCH_COUNT`: Items fetched per round trip in list mode (default: 100)
/// - `REDIS_INPUT_THREADS`: Independent workers to run (default: 1)
/// - `REDIS_INPUT_TAGS`: Comma separated tags added to every event
///
/// # Example
///
/// ```no_run
/// use redis_ingest_shared::config::InputConfig;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = InputConfig::load(None)?;
/// println!("Reading {} from {}", config.key, config.redis_address());
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "REDIS_INPUT";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// Neither `key` nor the deprecated `queue` was set
    #[error("Missing configuration field: key")]
    MissingKey,
}

/// How the input consumes the configured key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// BLPOP the key, then batch-pop the rest with a server-side script
    List,

    /// SUBSCRIBE to the key
    Channel,

    /// PSUBSCRIBE to the key
    PatternChannel,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::List => "list",
            DataType::Channel => "channel",
            DataType::PatternChannel => "pattern_channel",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
    Plain,
}

/// Redis password
///
/// Never printed: `Debug` is redacted so the config can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Password(value.into())
    }

    /// Returns the clear-text value for the AUTH handshake
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Redis input configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InputConfig {
    /// Instance label used in log spans
    ///
    /// Deprecated: kept only so existing configs keep loading.
    #[serde(default = "default_name")]
    pub name: String,

    /// Redis host
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Redis port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Redis database index
    #[serde(default)]
    pub db: i64,

    /// Initial connection timeout in seconds
    #[serde(default = "default_timeout", rename = "timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,

    /// Password to authenticate with
    #[serde(default)]
    pub password: Option<Password>,

    /// Name of the list, channel or channel pattern
    #[serde(default)]
    pub key: String,

    /// Deprecated alias for `key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Consumption strategy
    #[serde(default = "default_data_type")]
    pub data_type: DataType,

    /// Items fetched per round trip in list mode (1 disables batching)
    #[serde(default = "default_batch_count")]
    #[validate(range(min = 1, max = 100000))]
    pub batch_count: usize,

    /// Number of independent workers
    #[serde(default = "default_threads")]
    #[validate(range(min = 1, max = 64))]
    pub threads: usize,

    /// Payload codec
    #[serde(default)]
    pub codec: CodecKind,

    /// Value for the `type` field of events that don't have one
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Tags appended to every event
    #[serde(default)]
    pub tags: Vec<String>,

    /// Fields added to every event unless already present
    #[serde(default)]
    pub add_field: HashMap<String, String>,

    /// Base pause before reconnecting, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    #[validate(range(min = 1))]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnect backoff, in milliseconds
    #[serde(default = "default_max_reconnect_delay_ms")]
    #[validate(range(min = 1))]
    pub max_reconnect_delay_ms: u64,

    /// How long the binary waits for workers on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_timeout() -> u64 {
    5
}

fn default_data_type() -> DataType {
    DataType::List
}

fn default_batch_count() -> usize {
    100
}

fn default_threads() -> usize {
    1
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl InputConfig {
    /// Creates a configuration with defaults for everything but the key
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        InputConfig {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            db: 0,
            timeout_secs: default_timeout(),
            password: None,
            key: key.into(),
            queue: None,
            data_type,
            batch_count: default_batch_count(),
            threads: default_threads(),
            codec: CodecKind::default(),
            event_type: None,
            tags: Vec::new(),
            add_field: HashMap::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }

    /// Loads configuration from an optional TOML file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file is given but can't be read or parsed
    /// - A value has the wrong type
    /// - No key is configured or a value is out of range
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env if present (for development)
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("tags"),
        );

        let config: InputConfig = builder.build()?.try_deserialize()?;
        config.finalize()
    }

    /// Resolves deprecated settings and validates ranges
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        if let Some(queue) = self.queue.take() {
            tracing::warn!(
                queue = %queue,
                "redis input: the `queue` setting is deprecated, please use the `key` setting"
            );
            self.key = queue;
        }

        if self.key.is_empty() {
            return Err(ConfigError::MissingKey);
        }

        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            self.max_reconnect_delay_ms = self.reconnect_delay_ms;
        }

        self.validate()?;
        Ok(self)
    }

    /// `host:port`, used for logging
    pub fn redis_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Whether connecting must install the batch script
    pub fn uses_batch_script(&self) -> bool {
        self.data_type == DataType::List && self.batch_count > 1
    }
}
