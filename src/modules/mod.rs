//! Engine subsystems
//!
//! Target handling, identity rotation, resolver negotiation, request
//! orchestration, discovery, scheduling and stats.

pub mod blacklist;
pub mod discovery;
pub mod events;
pub mod identity;
pub mod orchestrator;
pub mod preferences;
pub mod resolver;
pub mod scheduler;
pub mod stats;
pub mod targets;
pub mod timing;

// Re-export commonly used types
pub use blacklist::Blacklist;
pub use discovery::{AssetKind, DiscoveredAsset, DiscoveryError, ResourceDiscovery, asset_kind};
pub use events::{
    ChannelHandler, EngineEvent, EventDispatcher, EventHandler, LoggingHandler,
    RequestCompletedEvent, RequestFailedEvent, ResolverSelectedEvent, StoppedEvent,
};
pub use identity::{AcceptProfile, FALLBACK_USER_AGENT, IdentityPool};
pub use orchestrator::{
    DispatchHandle, DispatchOutcome, HttpTransport, OutboundRequest, ReqwestTransport,
    RequestError, RequestKind, RequestOrchestrator, TransportResponse,
};
pub use preferences::{InMemoryPreferences, PreferenceError, PreferenceStore, RedbPreferences};
pub use resolver::{
    ActiveResolver, DohResolver, HttpsProbe, ResolverCandidate, ResolverNegotiator,
    ResolverProbe, ResolverProbeError, default_candidates,
};
pub use scheduler::{CycleOutcome, RunState, SchedulerError, SessionScheduler, StopReason};
pub use stats::{MAX_LAST_URLS, StatsReporter, StatsSnapshot, VisitRecord};
pub use targets::{InMemoryTargets, SharedTargets, TargetError, TargetSet, TargetSource};
pub use timing::JitterPolicy;
