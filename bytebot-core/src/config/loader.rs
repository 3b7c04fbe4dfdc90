//! Configuration loading and management
//!
//! Layering, lowest to highest precedence: built-in defaults,
//! `<dir>/config.json`, `BYTEBOT__SECTION__KEY` path variables, then the
//! short alias variables (`BYTEBOT_ID`, `BYTEBOT_TOKEN`, `REDIS_URL`, ...).
//! Command-line flags are applied on top by the binary, and only when the
//! flag was actually passed.

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const PATH_PREFIX: &str = "BYTEBOT__";

/// Configuration loader
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".bytebot"))
            .unwrap_or_else(|| PathBuf::from(".bytebot"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment
    pub fn load(&self) -> crate::Result<Config> {
        let config_path = self.config_path();
        let mut merged = serde_json::to_value(Config::default())?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file_value: Value = serde_json::from_str(&content).map_err(|e| {
                crate::Error::Config(format!("{}: {}", config_path.display(), e))
            })?;
            merge_values(&mut merged, file_value);
        }

        apply_path_overrides(&mut merged);
        apply_alias_overrides(&mut merged);

        let config: Config = serde_json::from_value(merged)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if let Some(existing) = base_map.get_mut(&key) {
                    merge_values(existing, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

/// Interpret an environment value, keeping it a string where the target is one
fn parse_env_value(raw: &str, current: Option<&Value>) -> Value {
    if matches!(current, Some(Value::String(_))) {
        return Value::String(raw.to_string());
    }
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(raw.to_string())
}

fn get_path_value<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, segment| current.get(segment))
}

fn set_path_value(root: &mut Value, path: &[String], value: Value) {
    let Some((leaf, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(leaf.clone(), value);
    }
}

fn apply_alias_overrides(config: &mut Value) {
    // Later entries win: BYTEBOT_REDIS takes precedence over REDIS_URL.
    let aliases = [
        ("REDIS_URL", "redis.addr"),
        ("BYTEBOT_REDIS", "redis.addr"),
        ("BYTEBOT_RUSER", "redis.username"),
        ("BYTEBOT_RPASS", "redis.password"),
        ("BYTEBOT_ID", "gateway.id"),
        ("BYTEBOT_TOKEN", "discord.token"),
        ("BYTEBOT_INBOUND", "gateway.inbound_topic"),
        ("BYTEBOT_OUTBOUND", "gateway.outbound_topic"),
        ("BYTEBOT_TOPIC_SCHEME", "gateway.topic_scheme"),
    ];

    for (env_key, target_path) in aliases {
        if let Ok(value) = std::env::var(env_key) {
            if value.is_empty() {
                continue;
            }
            // Enum-valued alias; serde expects the lowercase variant name.
            let value = if env_key == "BYTEBOT_TOPIC_SCHEME" {
                value.to_ascii_lowercase()
            } else {
                value
            };
            let path: Vec<String> = target_path.split('.').map(ToString::to_string).collect();
            set_path_value(config, &path, Value::String(value));
        }
    }

    if let Ok(value) = std::env::var("BYTEBOT_VERBOSE") {
        if value.eq_ignore_ascii_case("true") {
            let path = ["logging".to_string(), "level".to_string()];
            set_path_value(config, &path, Value::String("debug".to_string()));
        }
    }
}

fn apply_path_overrides(config: &mut Value) {
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix(PATH_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = suffix
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        let parsed = parse_env_value(&value, get_path_value(config, &segments));
        set_path_value(config, &segments, parsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TopicScheme;
    use once_cell::sync::Lazy;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    struct EnvVarGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::set_var(key, value) };
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn unset(key: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::remove_var(key) };
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.original {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::set_var(&self.key, value) };
            } else {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::remove_var(&self.key) };
            }
        }
    }

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_aliases() -> Vec<EnvVarGuard> {
        [
            "REDIS_URL",
            "BYTEBOT_REDIS",
            "BYTEBOT_RUSER",
            "BYTEBOT_RPASS",
            "BYTEBOT_ID",
            "BYTEBOT_TOKEN",
            "BYTEBOT_INBOUND",
            "BYTEBOT_OUTBOUND",
            "BYTEBOT_TOPIC_SCHEME",
            "BYTEBOT_VERBOSE",
        ]
        .iter()
        .map(|k| EnvVarGuard::unset(k))
        .collect()
    }

    #[test]
    fn test_load_default_config() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());
        let config = loader.load().unwrap();

        assert_eq!(config.gateway.id, "discord");
        assert_eq!(config.redis.addr, "localhost:6379");
        assert_eq!(config.supervisor.retry_backoff_secs, 3);
    }

    #[test]
    fn test_save_and_load_config() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_dir(temp_dir.path());

        let mut config = Config::default();
        config.gateway.id = "gw1".to_string();
        config.gateway.topic_scheme = TopicScheme::Hierarchical;

        loader.save(&config).unwrap();
        let loaded = loader.load().unwrap();

        assert_eq!(loaded.gateway.id, "gw1");
        assert_eq!(loaded.gateway.topic_scheme, TopicScheme::Hierarchical);
    }

    #[test]
    fn test_load_applies_alias_env_overrides() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let _id = EnvVarGuard::set("BYTEBOT_ID", "gw-env");
        let _token = EnvVarGuard::set("BYTEBOT_TOKEN", "secret-token");
        let _pass = EnvVarGuard::set("BYTEBOT_RPASS", "12345");
        let _scheme = EnvVarGuard::set("BYTEBOT_TOPIC_SCHEME", "Hierarchical");
        let _verbose = EnvVarGuard::set("BYTEBOT_VERBOSE", "TRUE");

        let temp_dir = TempDir::new().unwrap();
        let config = ConfigLoader::with_dir(temp_dir.path()).load().unwrap();

        assert_eq!(config.gateway.id, "gw-env");
        assert_eq!(config.discord.token, "secret-token");
        assert_eq!(config.redis.password, "12345");
        assert_eq!(config.gateway.topic_scheme, TopicScheme::Hierarchical);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bytebot_redis_wins_over_redis_url() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let _url = EnvVarGuard::set("REDIS_URL", "redis-from-url:6379");
        let temp_dir = TempDir::new().unwrap();

        let config = ConfigLoader::with_dir(temp_dir.path()).load().unwrap();
        assert_eq!(config.redis.addr, "redis-from-url:6379");

        let _redis = EnvVarGuard::set("BYTEBOT_REDIS", "redis-from-bytebot:6379");
        let config = ConfigLoader::with_dir(temp_dir.path()).load().unwrap();
        assert_eq!(config.redis.addr, "redis-from-bytebot:6379");
    }

    #[test]
    fn test_verbose_false_keeps_file_level() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let _verbose = EnvVarGuard::set("BYTEBOT_VERBOSE", "no");
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{"logging":{"level":"warn"}}"#,
        )
        .unwrap();

        let config = ConfigLoader::with_dir(temp_dir.path()).load().unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_applies_path_env_overrides() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let _db = EnvVarGuard::set("BYTEBOT__REDIS__DB", "3");
        let _pass = EnvVarGuard::set("BYTEBOT__REDIS__PASSWORD", "0042");
        let _enabled = EnvVarGuard::set("BYTEBOT__HEALTH__ENABLED", "true");
        let _backoff = EnvVarGuard::set("BYTEBOT__SUPERVISOR__RETRY_BACKOFF_SECS", "1");

        let temp_dir = TempDir::new().unwrap();
        let config = ConfigLoader::with_dir(temp_dir.path()).load().unwrap();

        assert_eq!(config.redis.db, 3);
        assert_eq!(config.redis.password, "0042");
        assert!(config.health.enabled);
        assert_eq!(config.supervisor.retry_backoff_secs, 1);
    }

    #[test]
    fn test_alias_overrides_path_and_file() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let _path = EnvVarGuard::set("BYTEBOT__GATEWAY__ID", "from-path");
        let _alias = EnvVarGuard::set("BYTEBOT_ID", "from-alias");

        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{"gateway":{"id":"from-file"}}"#,
        )
        .unwrap();

        let config = ConfigLoader::with_dir(temp_dir.path()).load().unwrap();
        assert_eq!(config.gateway.id, "from-alias");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILE), "{not json").unwrap();

        let err = ConfigLoader::with_dir(temp_dir.path()).load().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_validation_runs_on_load() {
        let _lock = lock_env();
        let _clear = clear_aliases();
        let _id = EnvVarGuard::set("BYTEBOT__GATEWAY__ID", "has.dot");

        let temp_dir = TempDir::new().unwrap();
        let err = ConfigLoader::with_dir(temp_dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("gateway.id"));
    }
}
