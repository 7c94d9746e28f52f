//! Configuration types for dexfetch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL; items are fetched from `{base_url}/{item_id}`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// TCP/TLS connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Total request timeout in seconds, including the body (default: 30)
    #[serde(default = "default_total_timeout", with = "duration_serde")]
    pub total_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout: default_connect_timeout(),
            total_timeout: default_total_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ApiConfig {
    /// URL for a single item
    pub fn item_url(&self, item_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), item_id)
    }
}

/// Delay function used between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry (default)
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay`
    Exponential,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per item, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before a retry, in milliseconds (default: 2000)
    ///
    /// Rate-limited responses wait twice this long.
    #[serde(default = "default_base_delay", with = "millis_serde")]
    pub base_delay: Duration,

    /// Delay function (default: fixed)
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Upper bound for exponential backoff, in milliseconds (default: 60000)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Add random jitter to exponential delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff: BackoffKind::default(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// Payload validation rules for successful responses
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Field whose value must equal the item id, ignoring case (default: "name")
    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    /// Top-level fields that must be present (default: ["id", "name"])
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            identity_field: default_identity_field(),
            required_fields: default_required_fields(),
        }
    }
}

/// Where and how artifacts are written
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Artifact directory (default: "./artifacts")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Treat items whose artifact already exists as done without fetching
    #[serde(default)]
    pub skip_existing: bool,

    /// Optional path for a JSON dump of the run summary
    #[serde(default)]
    pub summary_path: Option<PathBuf>,

    /// Age in seconds after which another process's `*.partial` file counts
    /// as abandoned and is removed by cleanup (default: 3600)
    #[serde(default = "default_stale_partial_age", with = "duration_serde")]
    pub stale_partial_age: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            skip_existing: false,
            summary_path: None,
            stale_partial_age: default_stale_partial_age(),
        }
    }
}

/// Main configuration for a fetch run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry policy settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Payload validation rules
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Artifact output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Maximum in-flight fetches (None = one task per item, unbounded)
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Interval between progress lines, in milliseconds (default: 2000)
    #[serde(default = "default_progress_interval", with = "millis_serde")]
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            validation: ValidationConfig::default(),
            output: OutputConfig::default(),
            max_concurrency: None,
            progress_interval: default_progress_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Check ranges and the base URL
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "max_attempts must be at least 1",
            ));
        }

        if self.max_concurrency == Some(0) {
            return Err(Error::config(
                "max_concurrency",
                "max_concurrency must be at least 1 (omit it for unbounded)",
            ));
        }

        if self.api.total_timeout.is_zero() {
            return Err(Error::config(
                "api.total_timeout",
                "total_timeout must be greater than zero",
            ));
        }

        if self.api.connect_timeout > self.api.total_timeout {
            return Err(Error::config(
                "api.connect_timeout",
                "connect_timeout must not exceed total_timeout",
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(Error::config(
                "progress_interval",
                "progress_interval must be greater than zero",
            ));
        }

        if self.validation.identity_field.is_empty() {
            return Err(Error::config(
                "validation.identity_field",
                "identity_field must not be empty",
            ));
        }

        let url = url::Url::parse(&self.api.base_url).map_err(|e| {
            Error::config(
                "api.base_url",
                format!("invalid base URL '{}': {}", self.api.base_url, e),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(
                "api.base_url",
                format!("unsupported URL scheme '{}'", url.scheme()),
            ));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(Error::config(
                "api.base_url",
                "base URL must not carry a query string or fragment",
            ));
        }

        Ok(())
    }
}

fn default_base_url() -> String {
    "https://pokeapi.co/api/v2/pokemon".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_total_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("dexfetch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_identity_field() -> String {
    "name".to_string()
}

fn default_required_fields() -> Vec<String> {
    vec!["id".to_string(), "name".to_string()]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_stale_partial_age() -> Duration {
    Duration::from_secs(3600)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(2)
}

// Duration serialization helper (whole seconds)
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

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.retry.backoff, BackoffKind::Fixed);
        assert_eq!(config.api.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.api.total_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrency, None, "default is one task per item");
        assert_eq!(config.validation.identity_field, "name");
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn empty_json_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.output.output_dir, PathBuf::from("./artifacts"));
        assert!(!config.output.skip_existing);
        assert_eq!(config.output.stale_partial_age, Duration::from_secs(3600));
    }

    #[test]
    fn partial_json_overrides_only_given_fields() {
        let json = r#"{
            "api": { "base_url": "http://localhost:8080/api", "total_timeout": 5 },
            "retry": { "max_attempts": 5, "base_delay": 250, "backoff": "exponential" },
            "max_concurrency": 4
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.api.total_timeout, Duration::from_secs(5));
        assert_eq!(config.api.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.backoff, BackoffKind::Exponential);
        assert_eq!(config.max_concurrency, Some(4));
    }

    #[test]
    fn serialization_round_trips_durations() {
        let mut config = Config::default();
        config.retry.base_delay = Duration::from_millis(1500);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.retry.base_delay, Duration::from_millis(1500));
        assert_eq!(back.api.total_timeout, config.api.total_timeout);
    }

    #[test]
    fn zero_max_attempts_is_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, Error::Config { key: Some(ref k), .. } if k == "retry.max_attempts"),
            "got {err:?}"
        );
    }

    #[test]
    fn zero_concurrency_is_rejected_but_unbounded_is_fine() {
        let mut config = Config::default();
        config.max_concurrency = Some(0);
        assert!(config.validate().is_err());

        config.max_concurrency = Some(1);
        assert!(config.validate().is_ok());

        config.max_concurrency = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_base_delay_is_allowed() {
        let mut config = Config::default();
        config.retry.base_delay = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base_url_must_be_http() {
        let mut config = Config::default();
        config.api.base_url = "ftp://example.com/records".into();
        assert!(config.validate().is_err());

        config.api.base_url = "not a url".into();
        assert!(config.validate().is_err());

        config.api.base_url = "http://example.com/records?x=1".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn connect_timeout_may_not_exceed_total() {
        let mut config = Config::default();
        config.api.connect_timeout = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn item_url_strips_trailing_slash() {
        let api = ApiConfig {
            base_url: "https://pokeapi.co/api/v2/pokemon/".into(),
            ..Default::default()
        };
        assert_eq!(
            api.item_url("ditto"),
            "https://pokeapi.co/api/v2/pokemon/ditto"
        );
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dexfetch.json");
        std::fs::write(&path, r#"{ "retry": { "max_attempts": 7 } }"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 7);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/dexfetch.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dexfetch.json"));
    }
}
