//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::topic::{flat_topic, Direction, TopicScheme};

/// Root configuration for bytebot
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Gateway identity and topics
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Bus connection
    #[serde(default)]
    pub redis: RedisConfig,
    /// Chat platform session
    #[serde(default)]
    pub discord: DiscordConfig,
    /// Startup retry policy
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Health probe and endpoint
    #[serde(default)]
    pub health: HealthConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Gateway identity and topic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Identity written to `metadata.source` and matched against `metadata.dest`
    #[serde(default = "default_gateway_id")]
    pub id: String,
    /// Platform segment used in hierarchical topics
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Topic naming convention
    #[serde(default)]
    pub topic_scheme: TopicScheme,
    /// Flat inbound topic; empty means `<id>-inbound`
    #[serde(default)]
    pub inbound_topic: String,
    /// Flat outbound topic; empty means `<id>-outbound`
    #[serde(default)]
    pub outbound_topic: String,
}

fn default_gateway_id() -> String {
    "discord".to_string()
}

fn default_platform() -> String {
    "discord".to_string()
}

impl GatewayConfig {
    /// Resolved flat inbound topic
    pub fn inbound_topic(&self) -> String {
        if self.inbound_topic.trim().is_empty() {
            flat_topic(&self.id, Direction::Inbound)
        } else {
            self.inbound_topic.clone()
        }
    }

    /// Resolved flat outbound topic
    pub fn outbound_topic(&self) -> String {
        if self.outbound_topic.trim().is_empty() {
            flat_topic(&self.id, Direction::Outbound)
        } else {
            self.outbound_topic.clone()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: default_gateway_id(),
            platform: default_platform(),
            topic_scheme: TopicScheme::default(),
            inbound_topic: String::new(),
            outbound_topic: String::new(),
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `host:port`, or a full `redis://` URL
    #[serde(default = "default_redis_addr")]
    pub addr: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

fn default_redis_addr() -> String {
    "localhost:6379".to_string()
}

impl RedisConfig {
    /// Connection URL; a full URL in `addr` is used verbatim
    pub fn url(&self) -> String {
        if self.addr.contains("://") {
            return self.addr.clone();
        }

        let auth = match (self.username.is_empty(), self.password.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!(":{}@", self.password),
            (false, true) => format!("{}@", self.username),
            (false, false) => format!("{}:{}@", self.username, self.password),
        };
        format!("redis://{}{}/{}", auth, self.addr, self.db)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            username: String::new(),
            password: String::new(),
            db: 0,
        }
    }
}

/// Discord session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_discord_gateway")]
    pub gateway_url: String,
    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
    #[serde(default = "default_discord_intents")]
    pub intents: u64,
}

fn default_discord_gateway() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_discord_intents() -> u64 {
    37377 // GUILDS + GUILD_MESSAGES + DIRECT_MESSAGES + MESSAGE_CONTENT
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            gateway_url: default_discord_gateway(),
            api_base: default_discord_api_base(),
            intents: default_discord_intents(),
        }
    }
}

/// Connection supervisor policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Wait before the single startup retry
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Timeout for the startup bus ping
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// How long tasks get to stop after shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_retry_backoff_secs() -> u64 {
    3
}

fn default_ping_timeout_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_backoff_secs: default_retry_backoff_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_bind")]
    pub bind: String,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Channel for the self-message probe; empty re-verifies the session instead
    #[serde(default)]
    pub channel_id: String,
}

fn default_health_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_health_interval_secs() -> u64 {
    30
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_health_bind(),
            interval_secs: default_health_interval_secs(),
            channel_id: String::new(),
        }
    }
}
