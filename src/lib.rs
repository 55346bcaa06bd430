//! # mocktraffic-rs
//!
//! A background traffic generator that simulates organic HTTPS browsing.
//!
//! The engine periodically visits a host-supplied set of URLs, fetches a
//! small random sample of each page's static assets, and now and then fires
//! form-like and beacon-like requests. Identity headers rotate per request and
//! name resolution goes through a negotiated DNS-over-HTTPS provider, falling
//! back to the system resolver when none is reachable.
//!
//! ## Features
//!
//! - Jittered page-level scheduling with bounded delays
//! - User-agent rotation and browser-plausible headers
//! - DNS-over-HTTPS negotiation with persisted provider preference
//! - Bounded, randomized subresource and CSS `@import` discovery
//! - Rolling visit log and request counter, observable through events
//!
//! ## Example
//!
//! ```no_run
//! use mocktraffic_rs::{EngineConfig, StaticConfig, TrafficEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let static_config = StaticConfig::load("config.json")?;
//!     let config = EngineConfig::builder()
//!         .with_static_config(static_config)
//!         .build()?;
//!     let engine = TrafficEngine::builder()
//!         .with_config(config)
//!         .with_targets(["https://example.com"])
//!         .build()?;
//!     engine.start_engine().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     engine.stop_engine().await;
//!     println!("{:?}", engine.stats());
//!     Ok(())
//! }
//! ```

mod engine;

pub mod config;
pub mod modules;

pub use crate::engine::{
    EngineError,
    EngineResult,
    ReconfigureSignal,
    TrafficEngine,
    TrafficEngineBuilder,
    TransportFactory,
};

pub use crate::config::{
    AuxiliaryConfig,
    ConfigError,
    EngineConfig,
    EngineConfigBuilder,
    StaticConfig,
    TimingConfig,
};

pub use crate::modules::{
    ActiveResolver,
    Blacklist,
    ChannelHandler,
    DispatchOutcome,
    EngineEvent,
    EventDispatcher,
    EventHandler,
    HttpTransport,
    InMemoryPreferences,
    InMemoryTargets,
    LoggingHandler,
    OutboundRequest,
    PreferenceStore,
    RedbPreferences,
    RequestError,
    RequestKind,
    ResolverCandidate,
    ResolverProbe,
    ResolverProbeError,
    RunState,
    StatsSnapshot,
    StopReason,
    TargetSource,
    TransportResponse,
    VisitRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
