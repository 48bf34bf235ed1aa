//! Configuration types for relay-dl
//!
//! Every field has a serde default so an empty JSON object is a valid config.
//! Durations are written as whole seconds.

use crate::error::{Error, Result};
use crate::types::Recipient;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default aria2 JSON-RPC endpoint
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:6800/jsonrpc";

/// Default Telegram Bot API base URL
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

/// Main configuration for the agent
///
/// Sections map one-to-one onto the services that consume them:
/// - [`bus`](BusConfig): inbound queue sizing
/// - [`aria2`](Aria2Config): download backend endpoint and tracker timing
/// - [`telegram`](TelegramConfig): notifier credentials and delivery retry
/// - [`feeds`](FeedConfig): subscription polling
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Message bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Download backend settings
    #[serde(default)]
    pub aria2: Aria2Config,

    /// Telegram notifier settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Feed subscription settings
    #[serde(default)]
    pub feeds: FeedConfig,
}

impl Config {
    /// Parse a configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json(&raw)
    }
}

/// Message bus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of the shared inbound queue (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// aria2 download backend configuration
///
/// Both the endpoint and the secret are optional: aria2 runs fine without an RPC
/// secret, so a missing value is a warning, not an error. See [`Aria2Config::resolve`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Aria2Config {
    /// JSON-RPC endpoint (None = `http://127.0.0.1:6800/jsonrpc`)
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// RPC secret token (None = empty)
    #[serde(default)]
    pub rpc_secret: Option<String>,

    /// Interval between status polls (default: 2 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Deadline for a single RPC call (default: 1 second)
    #[serde(default = "default_rpc_timeout", with = "duration_serde")]
    pub rpc_timeout: Duration,

    /// Tell the requester when a submission is rejected (default: false, failures are only logged)
    #[serde(default)]
    pub notify_submit_failures: bool,
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            rpc_url: None,
            rpc_secret: None,
            poll_interval: default_poll_interval(),
            rpc_timeout: default_rpc_timeout(),
            notify_submit_failures: false,
        }
    }
}

/// Effective backend settings after defaults have been applied
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAria2 {
    /// Validated JSON-RPC endpoint
    pub rpc_url: Url,
    /// RPC secret (may be empty)
    pub rpc_secret: String,
    /// Interval between status polls
    pub poll_interval: Duration,
    /// Deadline for a single RPC call
    pub rpc_timeout: Duration,
    /// Whether submission failures are reported back to the requester
    pub notify_submit_failures: bool,
}

impl Aria2Config {
    /// Apply defaults for missing values and validate the endpoint
    ///
    /// Missing values are logged as warnings. A present but unparsable URL is an error.
    pub fn resolve(&self) -> Result<ResolvedAria2> {
        let rpc_url = match &self.rpc_url {
            Some(url) => {
                tracing::trace!(url = %url, "using configured aria2 rpc url");
                url.clone()
            }
            None => {
                tracing::warn!(url = DEFAULT_RPC_URL, "aria2 rpc url not found, using default");
                DEFAULT_RPC_URL.to_string()
            }
        };
        let rpc_url = Url::parse(&rpc_url)
            .map_err(|e| Error::config("aria2.rpc_url", format!("invalid url {rpc_url:?}: {e}")))?;

        let rpc_secret = match &self.rpc_secret {
            Some(secret) => secret.clone(),
            None => {
                tracing::warn!("aria2 rpc secret not found, using \"\"");
                String::new()
            }
        };

        if self.poll_interval.is_zero() {
            return Err(Error::config("aria2.poll_interval", "must be at least 1 second"));
        }

        Ok(ResolvedAria2 {
            rpc_url,
            rpc_secret,
            poll_interval: self.poll_interval,
            rpc_timeout: self.rpc_timeout,
            notify_submit_failures: self.notify_submit_failures,
        })
    }
}

/// Telegram notifier configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token (required by the notifier; its absence disables only the notifier)
    #[serde(default)]
    pub token: Option<String>,

    /// Bot API base URL (default: "https://api.telegram.org")
    #[serde(default = "default_telegram_api")]
    pub api_base: String,

    /// Chats that receive notifications not addressed to a specific requester
    #[serde(default)]
    pub chat_ids: Vec<Recipient>,

    /// Retry policy for failed deliveries
    #[serde(default)]
    pub retry: DeliveryRetryConfig,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_telegram_api(),
            chat_ids: vec![],
            retry: DeliveryRetryConfig::default(),
        }
    }
}

/// Fixed-backoff retry policy for chat delivery
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRetryConfig {
    /// Total number of delivery attempts, including the first (default: 10)
    #[serde(default = "default_delivery_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts (default: 30 seconds)
    #[serde(default = "default_delivery_backoff", with = "duration_serde")]
    pub backoff: Duration,
}

impl Default for DeliveryRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_delivery_attempts(),
            backoff: default_delivery_backoff(),
        }
    }
}

impl DeliveryRetryConfig {
    /// Express this policy as a general [`RetryConfig`]: constant delay, no jitter
    pub fn as_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.saturating_sub(1),
            initial_delay: self.backoff,
            max_delay: self.backoff,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Feed subscription configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// How often every subscription is re-fetched (default: 600 seconds)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// HTTP timeout for a single feed fetch (default: 30 seconds)
    #[serde(default = "default_feed_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Retry policy for feed fetches
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            request_timeout: default_feed_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_telegram_api() -> String {
    DEFAULT_TELEGRAM_API.to_string()
}

fn default_delivery_attempts() -> u32 {
    10
}

fn default_delivery_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
