use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

/// Which Binance API family the brokerage talks to.
///
/// The concrete market variant is only known once the host's account type
/// is supplied (see [`crate::exchanges::binance::MarketVariant::resolve`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Binance,
    BinanceUs,
    BinanceUsdtFutures,
    BinanceCoinFutures,
}

impl Venue {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "binance" | "spot" => Ok(Self::Binance),
            "binanceus" | "binance_us" | "us" => Ok(Self::BinanceUs),
            "binance_usdt_futures" | "usdt_futures" | "futures" => Ok(Self::BinanceUsdtFutures),
            "binance_coin_futures" | "coin_futures" => Ok(Self::BinanceCoinFutures),
            other => Err(ConfigError::InvalidConfiguration(format!(
                "Unknown venue '{}'",
                other
            ))),
        }
    }
}

/// REST retry policy applied to HTTP 429 responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay added per attempt: the n-th retry waits `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step: Duration::from_secs(1),
        }
    }
}

/// Fixed-window request quota for the REST gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestQuota {
    pub requests: u32,
    pub window: Duration,
}

impl Default for RequestQuota {
    fn default() -> Self {
        Self {
            requests: 1200,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerageConfig {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub venue: Venue,
    pub testnet: bool,
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub recv_window_ms: Option<u64>,
    pub rest_quota: RequestQuota,
    pub retry: RetryPolicy,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for BrokerageConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("BrokerageConfig", 10)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("venue", &self.venue)?;
        state.serialize_field("testnet", &self.testnet)?;
        state.serialize_field("rest_url", &self.rest_url)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.serialize_field("max_websocket_connections", &self.max_websocket_connections)?;
        state.serialize_field("recv_window_ms", &self.recv_window_ms)?;
        state.serialize_field("rest_quota", &self.rest_quota)?;
        state.serialize_field("retry", &self.retry)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for BrokerageConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BrokerageConfigHelper {
            api_key: String,
            secret_key: String,
            venue: Venue,
            #[serde(default)]
            testnet: bool,
            rest_url: Option<String>,
            ws_url: Option<String>,
            max_websocket_connections: Option<usize>,
            recv_window_ms: Option<u64>,
            #[serde(default)]
            rest_quota: RequestQuota,
            #[serde(default)]
            retry: RetryPolicy,
        }

        let helper = BrokerageConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            secret_key: Secret::new(helper.secret_key),
            venue: helper.venue,
            testnet: helper.testnet,
            rest_url: helper.rest_url,
            ws_url: helper.ws_url,
            max_websocket_connections: helper.max_websocket_connections,
            recv_window_ms: helper.recv_window_ms,
            rest_quota: helper.rest_quota,
            retry: helper.retry,
        })
    }
}

impl BrokerageConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(api_key: String, secret_key: String, venue: Venue) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            venue,
            testnet: false,
            rest_url: None,
            ws_url: None,
            max_websocket_connections: None,
            recv_window_ms: None,
            rest_quota: RequestQuota::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY`
    /// - `{PREFIX}_SECRET_KEY`
    /// - `{PREFIX}_VENUE` (optional, defaults to `binance`)
    /// - `{PREFIX}_TESTNET` (optional, defaults to false)
    /// - `{PREFIX}_REST_URL` / `{PREFIX}_WS_URL` (optional)
    /// - `{PREFIX}_MAX_WS_CONNECTIONS` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |name: &str| format!("{}_{}", prefix, name);

        let api_key = env::var(var("API_KEY"))
            .map_err(|_| ConfigError::MissingEnvironmentVariable(var("API_KEY")))?;
        let secret_key = env::var(var("SECRET_KEY"))
            .map_err(|_| ConfigError::MissingEnvironmentVariable(var("SECRET_KEY")))?;

        let venue = match env::var(var("VENUE")) {
            Ok(value) => Venue::parse(&value)?,
            Err(_) => Venue::Binance,
        };

        let testnet = env::var(var("TESTNET"))
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let max_websocket_connections = match env::var(var("MAX_WS_CONNECTIONS")) {
            Ok(value) => Some(value.parse::<usize>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!(
                    "{} must be a positive integer: {}",
                    var("MAX_WS_CONNECTIONS"),
                    e
                ))
            })?),
            Err(_) => None,
        };

        let mut config = Self::new(api_key, secret_key, venue).testnet(testnet);
        config.rest_url = env::var(var("REST_URL")).ok();
        config.ws_url = env::var(var("WS_URL")).ok();
        config.max_websocket_connections = max_websocket_connections;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // No .env file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Configuration for public endpoints only (market data, history)
    #[must_use]
    pub fn read_only(venue: Venue) -> Self {
        Self::new(String::new(), String::new(), venue)
    }

    /// Check if this configuration has valid credentials for authenticated operations
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    #[must_use]
    pub fn rest_url(mut self, url: String) -> Self {
        self.rest_url = Some(url);
        self
    }

    #[must_use]
    pub fn ws_url(mut self, url: String) -> Self {
        self.ws_url = Some(url);
        self
    }

    #[must_use]
    pub const fn max_websocket_connections(mut self, max: usize) -> Self {
        self.max_websocket_connections = Some(max);
        self
    }

    #[must_use]
    pub const fn recv_window_ms(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = Some(recv_window_ms);
        self
    }

    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn rest_quota(mut self, quota: RequestQuota) -> Self {
        self.rest_quota = quota;
        self
    }

    /// Reject values that can never work before any connection is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_websocket_connections == Some(0) {
            return Err(ConfigError::InvalidConfiguration(
                "max_websocket_connections must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.rest_quota.requests == 0 || self.rest_quota.window.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "rest_quota must allow at least one request per non-empty window".to_string(),
            ));
        }
        Ok(())
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_redacts_secrets() {
        let config = BrokerageConfig::new(
            "my-key".to_string(),
            "my-secret".to_string(),
            Venue::Binance,
        );
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("[REDACTED]"));
        assert!(!json.contains("my-key"));
        assert!(!json.contains("my-secret"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{"api_key":"k","secret_key":"s","venue":"BinanceUsdtFutures"}"#;
        let config: BrokerageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.venue, Venue::BinanceUsdtFutures);
        assert!(!config.testnet);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.api_key(), "k");
    }

    #[test]
    fn test_read_only_has_no_credentials() {
        assert!(!BrokerageConfig::read_only(Venue::Binance).has_credentials());
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let config = BrokerageConfig::read_only(Venue::Binance).max_websocket_connections(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_venue_parse() {
        assert_eq!(Venue::parse("BinanceUS").unwrap(), Venue::BinanceUs);
        assert_eq!(Venue::parse("coin_futures").unwrap(), Venue::BinanceCoinFutures);
        assert!(Venue::parse("kraken").is_err());
    }
}
