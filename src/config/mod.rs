//! Configuration system (layered: defaults > TOML file > env > code).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};
use crate::util::retry::RetryPolicy;

const CONFIG_PATH_ENV: &str = "KILN_CONFIG";

/// Governance tunables: circuit breaker, rate governor, per-turn and per-call caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Consecutive executor failures that open a tool's breaker.
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub tool_timeout_ms: u64,
    pub max_tool_calls_per_turn: u32,
    /// Calls admitted per principal and tool within one window.
    pub rate_limit_calls: u32,
    pub rate_limit_window_ms: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
            tool_timeout_ms: 60_000,
            max_tool_calls_per_turn: 3,
            rate_limit_calls: 20,
            rate_limit_window_ms: 60_000,
        }
    }
}

impl GovernanceConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

/// Stream ingest and turn-level limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Close the stream if no chunk arrives within this window.
    pub chunk_timeout_ms: u64,
    pub call_timeout_ms: u64,
    /// Overall call timeout when deeper thinking is requested.
    pub thinking_call_timeout_ms: u64,
    pub queue_capacity: usize,
    pub turn_timeout_ms: u64,
    /// Stream passes per turn, first pass included.
    pub max_passes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_timeout_ms: 45_000,
            call_timeout_ms: 120_000,
            thinking_call_timeout_ms: 300_000,
            queue_capacity: 1_000,
            turn_timeout_ms: 600_000,
            max_passes: 4,
        }
    }
}

impl StreamConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn call_timeout(&self, deep_thinking: bool) -> Duration {
        if deep_thinking {
            Duration::from_millis(self.thinking_call_timeout_ms)
        } else {
            Duration::from_millis(self.call_timeout_ms)
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}

/// Upstream retry tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    governance: GovernanceConfig,
    stream: StreamConfig,
    retry: RetryConfig,
    providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderEntry {
    api_key: Option<String>,
    base_url: Option<String>,
}

/// Layered configuration for kiln.
///
/// Credentials and endpoints are keyed by service name (`"openai"`, `"search"`).
#[derive(Clone, Default)]
pub struct KilnConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    pub governance: GovernanceConfig,
    pub stream: StreamConfig,
    pub retry: RetryConfig,
}

impl fmt::Debug for KilnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<String> = self
            .api_keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("KilnConfig")
            .field("api_keys", &services)
            .field("base_urls", &self.base_urls)
            .field("governance", &self.governance)
            .field("stream", &self.stream)
            .field("retry", &self.retry)
            .finish()
    }
}

impl KilnConfig {
    /// Create config with built-in defaults only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then the TOML file (if any), then environment variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::new(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from environment variables only (`.env` honored).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::new();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load a TOML config file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| KilnError::Configuration(format!("invalid config file: {e}")))?;
        let config = Self {
            governance: file.governance,
            stream: file.stream,
            retry: file.retry,
            ..Self::default()
        };
        for (service, entry) in file.providers {
            if let Some(key) = entry.api_key {
                config.set_api_key(&service, key);
            }
            if let Some(url) = entry.base_url {
                config.set_base_url(&service, url);
            }
        }
        Ok(config)
    }

    /// Apply `KILN_*` (and well-known provider) variables from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let key_mappings = [
            ("OPENAI_API_KEY", "openai"),
            ("KILN_API_KEY", "openai"),
            ("KILN_SEARCH_API_KEY", "search"),
        ];
        for (var, service) in key_mappings {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                self.set_api_key(service, value);
            }
        }

        let url_mappings = [
            ("OPENAI_BASE_URL", "openai"),
            ("KILN_BASE_URL", "openai"),
            ("KILN_SEARCH_URL", "search"),
        ];
        for (var, service) in url_mappings {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                self.set_base_url(service, value);
            }
        }

        let gov = &mut self.governance;
        override_u32(&lookup, "KILN_CIRCUIT_FAILURE_THRESHOLD", &mut gov.failure_threshold);
        override_u64(&lookup, "KILN_CIRCUIT_COOLDOWN_MS", &mut gov.cooldown_ms);
        override_u64(&lookup, "KILN_TOOL_TIMEOUT_MS", &mut gov.tool_timeout_ms);
        override_u32(&lookup, "KILN_MAX_TOOL_CALLS_PER_TURN", &mut gov.max_tool_calls_per_turn);
        override_u32(&lookup, "KILN_RATE_LIMIT_CALLS", &mut gov.rate_limit_calls);
        override_u64(&lookup, "KILN_RATE_LIMIT_WINDOW_MS", &mut gov.rate_limit_window_ms);

        let stream = &mut self.stream;
        override_u64(&lookup, "KILN_CHUNK_TIMEOUT_MS", &mut stream.chunk_timeout_ms);
        override_u64(&lookup, "KILN_CALL_TIMEOUT_MS", &mut stream.call_timeout_ms);
        override_u64(
            &lookup,
            "KILN_THINKING_CALL_TIMEOUT_MS",
            &mut stream.thinking_call_timeout_ms,
        );
        override_u64(&lookup, "KILN_TURN_TIMEOUT_MS", &mut stream.turn_timeout_ms);
        override_usize(&lookup, "KILN_MAX_PASSES", &mut stream.max_passes);

        override_u32(&lookup, "KILN_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
    }

    pub fn set_api_key(&self, service: &str, key: String) {
        if let Ok(mut keys) = self.api_keys.write() {
            keys.insert(service.to_string(), key);
        }
    }

    pub fn get_api_key(&self, service: &str) -> Option<String> {
        self.api_keys.read().ok()?.get(service).cloned()
    }

    pub fn set_base_url(&self, service: &str, url: String) {
        if let Ok(mut urls) = self.base_urls.write() {
            urls.insert(service.to_string(), url);
        }
    }

    pub fn get_base_url(&self, service: &str) -> Option<String> {
        self.base_urls.read().ok()?.get(service).cloned()
    }

    pub fn has_credentials(&self, service: &str) -> bool {
        self.get_api_key(service).is_some()
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("dev", "kiln", "kiln")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn parse_positive<T: std::str::FromStr + PartialEq + Default>(value: &str) -> Option<T> {
    let parsed = value.trim().parse::<T>().ok()?;
    if parsed == T::default() {
        None
    } else {
        Some(parsed)
    }
}

fn override_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u64) {
    if let Some(value) = lookup(key).as_deref().and_then(parse_positive) {
        *target = value;
    }
}

fn override_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut u32) {
    if let Some(value) = lookup(key).as_deref().and_then(parse_positive) {
        *target = value;
    }
}

fn override_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut usize) {
    if let Some(value) = lookup(key).as_deref().and_then(parse_positive) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_governance_constants() {
        let config = KilnConfig::new();

        assert_eq!(config.governance.failure_threshold, 3);
        assert_eq!(config.governance.cooldown(), Duration::from_secs(30));
        assert_eq!(config.governance.tool_timeout(), Duration::from_secs(60));
        assert_eq!(config.governance.max_tool_calls_per_turn, 3);
        assert_eq!(config.stream.queue_capacity, 1_000);
    }

    #[test]
    fn thinking_requests_get_the_longer_call_timeout() {
        let stream = StreamConfig::default();

        assert!(stream.call_timeout(true) > stream.call_timeout(false));
    }

    #[test]
    fn toml_file_overrides_defaults_and_sets_credentials() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[governance]
failure_threshold = 5
cooldown_ms = 1000

[providers.openai]
api_key = "sk-file"
base_url = "http://localhost:9999/v1"
"#
        )
        .unwrap();

        let config = KilnConfig::from_file(file.path()).unwrap();

        assert_eq!(config.governance.failure_threshold, 5);
        assert_eq!(config.governance.cooldown_ms, 1000);
        assert_eq!(config.governance.tool_timeout_ms, 60_000);
        assert_eq!(config.get_api_key("openai").as_deref(), Some("sk-file"));
        assert_eq!(
            config.get_base_url("openai").as_deref(),
            Some("http://localhost:9999/v1")
        );
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = KilnConfig::from_toml_str("governance = [").unwrap_err();

        assert!(matches!(err, KilnError::Configuration(_)));
    }

    #[test]
    fn env_overrides_apply_on_top_of_file_values() {
        let mut config = KilnConfig::from_toml_str("[governance]\nmax_tool_calls_per_turn = 5\n").unwrap();
        config.apply_overrides(lookup_from(&[
            ("KILN_MAX_TOOL_CALLS_PER_TURN", "2"),
            ("KILN_SEARCH_API_KEY", "search-key"),
        ]));

        assert_eq!(config.governance.max_tool_calls_per_turn, 2);
        assert_eq!(config.get_api_key("search").as_deref(), Some("search-key"));
    }

    #[test]
    fn zero_or_garbage_overrides_are_ignored() {
        let mut config = KilnConfig::new();
        config.apply_overrides(lookup_from(&[
            ("KILN_TOOL_TIMEOUT_MS", "0"),
            ("KILN_CIRCUIT_COOLDOWN_MS", "soon"),
        ]));

        assert_eq!(config.governance.tool_timeout_ms, 60_000);
        assert_eq!(config.governance.cooldown_ms, 30_000);
    }

    #[test]
    fn debug_output_does_not_print_api_keys() {
        let config = KilnConfig::new();
        config.set_api_key("openai", "sk-secret-value".to_string());

        let rendered = format!("{config:?}");

        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("openai"));
    }
}
