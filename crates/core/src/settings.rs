//! Settings for the mediation core.
//!
//! Settings are read from TOML and merged with environment variables prefixed
//! with `APEX_MEDIATION__`, using `__` as the section separator. For example,
//! `APEX_MEDIATION__AUCTION__API_KEY` overrides `auction.api_key`.

use std::str::FromStr;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use validator::{Validate, ValidationError};

use crate::error::MediationError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "APEX_MEDIATION";

const DEFAULT_SETTINGS_TOML: &str = include_str!("../../../apex-mediation.toml");

/// Auction endpoint, retry and cache parameters.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_backoff"))]
pub struct AuctionSettings {
    /// Base URL of the auction service; `/v1/auction` is appended.
    #[validate(url)]
    pub base_url: String,

    #[validate(length(min = 1))]
    pub api_key: String,

    #[validate(length(min = 1))]
    pub app_id: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-attempt timeout used when the caller does not pass one.
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub default_timeout_ms: u64,

    /// Total attempts per bid request, including the first.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 5))]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Upper bound of random jitter added to each backoff; `0` disables it.
    #[serde(default)]
    pub backoff_jitter_ms: u64,

    /// Longest `Retry-After` delay that will be honored.
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,

    /// Wall-time budget for all attempts of one request.
    #[serde(default = "default_total_budget_ms")]
    #[validate(range(min = 1))]
    pub total_budget_ms: u64,

    /// Cache lifetime when the server does not declare one.
    #[serde(default = "default_ttl_ms")]
    #[validate(range(min = 1))]
    pub default_ttl_ms: u64,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_half_open_max_attempts")]
    #[validate(range(min = 1))]
    pub half_open_max_attempts: u32,
}

/// Connectivity preflight parameters.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ConnectivitySettings {
    #[serde(default = "default_fast_fail_timeout_ms")]
    #[validate(range(min = 1))]
    pub fast_fail_timeout_ms: u64,

    #[serde(default = "default_normal_timeout_ms")]
    #[validate(range(min = 1))]
    pub normal_timeout_ms: u64,

    /// Skip the network entirely when offline or unvalidated.
    #[serde(default = "default_true")]
    pub fast_fail_offline: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub auction: AuctionSettings,

    #[serde(default)]
    #[validate(nested)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    #[validate(nested)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    #[validate(nested)]
    pub logging: LoggingSettings,
}

fn default_user_agent() -> String {
    format!("ApexMediation-Rust/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    120
}

fn default_backoff_cap_ms() -> u64 {
    1000
}

fn default_max_retry_after_ms() -> u64 {
    5000
}

fn default_total_budget_ms() -> u64 {
    15_000
}

fn default_ttl_ms() -> u64 {
    30 * 60 * 1000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_half_open_max_attempts() -> u32 {
    1
}

fn default_fast_fail_timeout_ms() -> u64 {
    100
}

fn default_normal_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn validate_backoff(settings: &AuctionSettings) -> Result<(), ValidationError> {
    if settings.backoff_cap_ms < settings.backoff_base_ms {
        return Err(ValidationError::new("backoff_cap_below_base"));
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    LevelFilter::from_str(level)
        .map(|_| ())
        .map_err(|_| ValidationError::new("unknown_log_level"))
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max_attempts: default_half_open_max_attempts(),
        }
    }
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            fast_fail_timeout_ms: default_fast_fail_timeout_ms(),
            normal_timeout_ms: default_normal_timeout_ms(),
            fast_fail_offline: default_true(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingSettings {
    /// Parsed level, falling back to `Info` for unknown names.
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::Info)
    }
}

impl Settings {
    /// Load the settings file bundled with the crate, plus env overrides.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the merged settings fail to parse or validate.
    pub fn new() -> Result<Self, Report<MediationError>> {
        Self::from_toml(DEFAULT_SETTINGS_TOML)
    }

    /// Parse, merge env overrides into, and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the TOML is malformed, required
    /// keys are missing, or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<MediationError>> {
        let environment = Environment::default().prefix(ENV_PREFIX).separator("__");

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(MediationError::Configuration {
                message: "failed to build settings".to_string(),
            })?;

        let settings: Self =
            config
                .try_deserialize()
                .change_context(MediationError::Configuration {
                    message: "failed to deserialize settings".to_string(),
                })?;

        settings
            .validate()
            .change_context(MediationError::Configuration {
                message: "settings validation failed".to_string(),
            })?;

        Ok(settings)
    }

    /// Serialize the effective settings in a stable TOML form.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if serialization fails.
    pub fn to_canonical_toml(&self) -> Result<String, Report<MediationError>> {
        toml::to_string(self).change_context(MediationError::Configuration {
            message: "failed to serialize settings".to_string(),
        })
    }
}

/// SHA-256 of a settings document as `sha256:<hex>`, CRLF-normalised.
#[must_use]
pub fn compute_settings_hash(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::crate_test_settings_str;

    #[test]
    fn bundled_settings_load() {
        let settings = Settings::new().expect("bundled settings should load");
        assert!(!settings.auction.base_url.is_empty());
        assert_eq!(settings.auction.max_attempts, 3);
        assert_eq!(settings.breaker.failure_threshold, 3);
        assert_eq!(settings.connectivity.fast_fail_timeout_ms, 100);
    }

    #[test]
    fn test_settings_parse_with_defaults() {
        let toml_str = r#"
            [auction]
            base_url = "https://auction.example.com"
            api_key = "key-123"
            app_id = "app-1"
            "#;

        let settings = Settings::from_toml(toml_str).expect("should parse minimal settings");
        assert_eq!(settings.auction.default_timeout_ms, 2000);
        assert_eq!(settings.auction.backoff_base_ms, 120);
        assert_eq!(settings.auction.backoff_cap_ms, 1000);
        assert_eq!(settings.auction.backoff_jitter_ms, 0);
        assert_eq!(settings.breaker.reset_timeout_ms, 30_000);
        assert_eq!(settings.breaker.half_open_max_attempts, 1);
        assert_eq!(settings.connectivity.normal_timeout_ms, 10_000);
        assert!(settings.connectivity.fast_fail_offline);
        assert_eq!(settings.logging.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn test_settings_missing_required_fields() {
        let toml_str = r#"
            [auction]
            base_url = "https://auction.example.com"
            # Missing api_key and app_id
            "#;
        assert!(Settings::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_settings_empty_toml() {
        assert!(Settings::from_toml("").is_err(), "Should fail with empty TOML");
    }

    #[test]
    fn test_settings_invalid_toml_syntax() {
        let toml_str = r#"
            [auction
            base_url = "https://auction.example.com"
            "#;
        assert!(Settings::from_toml(toml_str).is_err());
    }

    #[test]
    fn rejects_invalid_url_and_ranges() {
        let bad_url = r#"
            [auction]
            base_url = "not a url"
            api_key = "k"
            app_id = "a"
            "#;
        let too_many_attempts = r#"
            [auction]
            base_url = "https://auction.example.com"
            api_key = "k"
            app_id = "a"
            max_attempts = 9
            "#;
        let inverted_backoff = r#"
            [auction]
            base_url = "https://auction.example.com"
            api_key = "k"
            app_id = "a"
            backoff_base_ms = 500
            backoff_cap_ms = 100
            "#;
        let bad_level = r#"
            [auction]
            base_url = "https://auction.example.com"
            api_key = "k"
            app_id = "a"

            [logging]
            level = "loud"
            "#;

        for toml_str in [bad_url, too_many_attempts, inverted_backoff, bad_level] {
            assert!(
                Settings::from_toml(toml_str).is_err(),
                "should reject: {toml_str}"
            );
        }
    }

    #[test]
    fn test_set_env() {
        let toml_str = r#"
            [auction]
            base_url = "https://auction.example.com"
            # api_key will be set by env variable
            app_id = "app-1"
            "#;

        temp_env::with_var(
            "APEX_MEDIATION__AUCTION__API_KEY",
            Some("env-key"),
            || {
                let settings = Settings::from_toml(toml_str).expect("env should fill api_key");
                assert_eq!(settings.auction.api_key, "env-key");
            },
        );
    }

    #[test]
    fn test_override_env() {
        temp_env::with_var(
            "APEX_MEDIATION__AUCTION__USER_AGENT",
            Some("Override-Agent/2.0"),
            || {
                let settings =
                    Settings::from_toml(&crate_test_settings_str()).expect("should parse");
                assert_eq!(settings.auction.user_agent, "Override-Agent/2.0");
            },
        );
    }

    #[test]
    fn canonical_toml_round_trips() {
        let settings = Settings::from_toml(&crate_test_settings_str()).expect("should parse");
        let canonical = settings.to_canonical_toml().expect("should serialize");
        let reparsed = Settings::from_toml(&canonical).expect("canonical form should parse");
        assert_eq!(
            compute_settings_hash(&canonical),
            compute_settings_hash(
                &reparsed
                    .to_canonical_toml()
                    .expect("should serialize again")
            )
        );
    }

    #[test]
    fn test_hash_format_and_normalization() {
        let hash = compute_settings_hash("line1\nline2\n");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), 7 + 64);
        assert_eq!(hash, compute_settings_hash("line1\r\nline2\r\n"));
    }
}
