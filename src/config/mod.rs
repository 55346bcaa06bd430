//! Settings and configuration module
//!
//! Provides:
//! - The static JSON payload (blacklist, user agents, request timeout)
//! - Engine settings with a builder pattern
//! - Granular timing and auxiliary-traffic options

pub mod settings;

pub use settings::{
    AuxiliaryConfig, ConfigError, EngineConfig, EngineConfigBuilder, StaticConfig, TimingConfig,
    DEFAULT_BEACON_ENDPOINT, DEFAULT_MAX_RESOURCES, DEFAULT_PROBE_URL, DEFAULT_TIMEOUT_MS,
};
