//! Static payload loading and engine settings.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::modules::resolver::{ResolverCandidate, default_candidates};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_RESOURCES: usize = 3;
pub const DEFAULT_PROBE_URL: &str = "https://example.com";
pub const DEFAULT_BEACON_ENDPOINT: &str = "https://www.google-analytics.com/collect";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path:?} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid url '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable payload shipped with the application (`config.json`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StaticConfig {
    #[serde(default)]
    pub blacklisted_urls: Vec<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            blacklisted_urls: Vec::new(),
            user_agents: Vec::new(),
            timeout: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl StaticConfig {
    pub fn from_json_str(payload: &str) -> Result<Self, ConfigError> {
        let config: StaticConfig = serde_json::from_str(payload)?;
        if config.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// Delay envelope for page cycles and subresource fetches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingConfig {
    pub base_page_delay: Duration,
    /// How far below the base a draw may fall.
    pub spread_below: Duration,
    /// How far above the base a draw may reach.
    pub spread_above: Duration,
    pub min_page_delay: Duration,
    pub max_page_delay: Duration,
    pub min_resource_delay: Duration,
    pub max_resource_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            base_page_delay: Duration::from_secs(10),
            spread_below: Duration::from_secs(2),
            spread_above: Duration::from_secs(5),
            min_page_delay: Duration::from_secs(3),
            max_page_delay: Duration::from_secs(25),
            min_resource_delay: Duration::from_millis(200),
            max_resource_delay: Duration::from_secs(2),
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_page_delay > self.max_page_delay {
            return Err(ConfigError::Invalid(format!(
                "min page delay {:?} exceeds max page delay {:?}",
                self.min_page_delay, self.max_page_delay
            )));
        }
        if self.min_resource_delay > self.max_resource_delay {
            return Err(ConfigError::Invalid(format!(
                "min resource delay {:?} exceeds max resource delay {:?}",
                self.min_resource_delay, self.max_resource_delay
            )));
        }
        Ok(())
    }
}

/// Probabilities for the per-cycle auxiliary requests.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryConfig {
    pub form_submit_probability: f64,
    pub beacon_probability: f64,
    pub beacon_endpoint: Url,
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            form_submit_probability: 0.1,
            beacon_probability: 0.15,
            beacon_endpoint: Url::parse(DEFAULT_BEACON_ENDPOINT)
                .expect("default beacon endpoint is a valid url"),
        }
    }
}

/// Engine settings exposed to the host.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub static_config: StaticConfig,
    pub timing: TimingConfig,
    pub auxiliary: AuxiliaryConfig,
    pub max_resources: usize,
    pub encrypted_resolution: bool,
    pub resolver_candidates: Vec<ResolverCandidate>,
    pub probe_url: Url,
    pub probe_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            static_config: StaticConfig::default(),
            timing: TimingConfig::default(),
            auxiliary: AuxiliaryConfig::default(),
            max_resources: DEFAULT_MAX_RESOURCES,
            encrypted_resolution: true,
            resolver_candidates: default_candidates(),
            probe_url: Url::parse(DEFAULT_PROBE_URL).expect("default probe url is a valid url"),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        for (name, value) in [
            ("form submit", self.auxiliary.form_submit_probability),
            ("beacon", self.auxiliary.beacon_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} probability {value} is outside [0, 1]"
                )));
            }
        }
        if self.auxiliary.beacon_endpoint.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                value: self.auxiliary.beacon_endpoint.to_string(),
                reason: "beacon endpoint must use https".into(),
            });
        }
        if self.static_config.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        self.static_config.request_timeout()
    }
}

/// Fluent builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn with_static_config(mut self, config: StaticConfig) -> Self {
        self.config.static_config = config;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn with_page_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.timing.min_page_delay = min;
        self.config.timing.max_page_delay = max;
        self
    }

    pub fn with_resource_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.timing.min_resource_delay = min;
        self.config.timing.max_resource_delay = max;
        self
    }

    pub fn with_form_submit_probability(mut self, probability: f64) -> Self {
        self.config.auxiliary.form_submit_probability = probability;
        self
    }

    pub fn with_beacon_probability(mut self, probability: f64) -> Self {
        self.config.auxiliary.beacon_probability = probability;
        self
    }

    pub fn with_beacon_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.config.auxiliary.beacon_endpoint =
            Url::parse(endpoint).map_err(|err| ConfigError::InvalidUrl {
                value: endpoint.to_string(),
                reason: err.to_string(),
            })?;
        Ok(self)
    }

    pub fn with_max_resources(mut self, max: usize) -> Self {
        self.config.max_resources = max;
        self
    }

    pub fn with_encrypted_resolution(mut self, enabled: bool) -> Self {
        self.config.encrypted_resolution = enabled;
        self
    }

    pub fn with_resolver_candidates(mut self, candidates: Vec<ResolverCandidate>) -> Self {
        self.config.resolver_candidates = candidates;
        self
    }

    pub fn with_probe_url(mut self, url: Url) -> Self {
        self.config.probe_url = url;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_static_payload() {
        let config = StaticConfig::from_json_str(
            r#"{"blacklisted_urls": ["ads."], "user_agents": ["UA1", "UA2"], "timeout": 5000}"#,
        )
        .unwrap();
        assert_eq!(config.blacklisted_urls, vec!["ads.".to_string()]);
        assert_eq!(config.user_agents.len(), 2);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn timeout_defaults_when_missing() {
        let config =
            StaticConfig::from_json_str(r#"{"blacklisted_urls": [], "user_agents": []}"#).unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err = StaticConfig::from_json_str("{\"user_agents\": [").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJson(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = StaticConfig::load("/definitely/not/here/config.json").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert!(path.ends_with("config.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn builder_rejects_inverted_bounds() {
        let result = EngineConfig::builder()
            .with_page_delay_bounds(Duration::from_secs(10), Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_out_of_range_probability() {
        let result = EngineConfig::builder().with_beacon_probability(1.5).build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
