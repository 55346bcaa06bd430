//! High level traffic engine.
//!
//! Wires the target set, resolver negotiation, request orchestration, the
//! session scheduler and stats reporting into one host-facing handle. The
//! host keeps ownership of its target list and preference storage and hands
//! them in through the builder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::config::{ConfigError, EngineConfig};
use crate::modules::blacklist::Blacklist;
use crate::modules::discovery::ResourceDiscovery;
use crate::modules::events::{
	EngineEvent, EventDispatcher, EventHandler, LoggingHandler, ResolverSelectedEvent,
};
use crate::modules::identity::IdentityPool;
use crate::modules::orchestrator::{
	HttpTransport, ReqwestTransport, RequestError, RequestOrchestrator,
};
use crate::modules::preferences::{InMemoryPreferences, PreferenceStore};
use crate::modules::resolver::{ActiveResolver, HttpsProbe, ResolverNegotiator, ResolverProbe};
use crate::modules::scheduler::{RunState, SchedulerError, SessionScheduler};
use crate::modules::stats::{StatsReporter, StatsSnapshot, VisitRecord};
use crate::modules::targets::{InMemoryTargets, SharedTargets, TargetSet, TargetSource};
use crate::modules::timing::JitterPolicy;

/// Result alias used by the engine façade.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to the host. Everything else is logged and absorbed.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("no eligible targets after filtering")]
	NoTargets,
	#[error("engine is already running")]
	AlreadyRunning,
	#[error("http client could not be built: {0}")]
	Transport(#[from] RequestError),
}

impl From<SchedulerError> for EngineError {
	fn from(err: SchedulerError) -> Self {
		match err {
			SchedulerError::NoTargets => EngineError::NoTargets,
			SchedulerError::AlreadyRunning => EngineError::AlreadyRunning,
		}
	}
}

/// Builds the transport used for every request once a resolver is chosen.
pub type TransportFactory = Arc<
	dyn Fn(&ActiveResolver, Duration) -> Result<Arc<dyn HttpTransport>, RequestError>
		+ Send
		+ Sync,
>;

fn reqwest_transport_factory() -> TransportFactory {
	Arc::new(|resolver: &ActiveResolver, timeout: Duration| {
		let transport = ReqwestTransport::new(resolver.clone(), timeout)?;
		Ok(Arc::new(transport) as Arc<dyn HttpTransport>)
	})
}

/// Fluent builder for [`TrafficEngine`].
pub struct TrafficEngineBuilder {
	config: EngineConfig,
	source: Option<Arc<dyn TargetSource>>,
	preferences: Option<Arc<dyn PreferenceStore>>,
	probe: Option<Arc<dyn ResolverProbe>>,
	transport_factory: Option<TransportFactory>,
	handlers: Vec<Arc<dyn EventHandler>>,
	log_events: bool,
}

impl TrafficEngineBuilder {
	pub fn new() -> Self {
		Self {
			config: EngineConfig::default(),
			source: None,
			preferences: None,
			probe: None,
			transport_factory: None,
			handlers: Vec::new(),
			log_events: true,
		}
	}

	pub fn with_config(mut self, config: EngineConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_target_source(mut self, source: Arc<dyn TargetSource>) -> Self {
		self.source = Some(source);
		self
	}

	/// Convenience for a fixed list; entries that fail validation are skipped.
	pub fn with_targets<I, S>(self, urls: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.with_target_source(Arc::new(InMemoryTargets::with_urls(urls)))
	}

	pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
		self.preferences = Some(preferences);
		self
	}

	pub fn with_resolver_probe(mut self, probe: Arc<dyn ResolverProbe>) -> Self {
		self.probe = Some(probe);
		self
	}

	pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
		self.transport_factory = Some(factory);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	/// Drops the built-in handler that mirrors events to `log`.
	pub fn disable_event_logging(mut self) -> Self {
		self.log_events = false;
		self
	}

	pub fn build(self) -> EngineResult<TrafficEngine> {
		TrafficEngine::with_parts(self)
	}
}

impl Default for TrafficEngineBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Fire-and-forget request to reload targets and renegotiate the resolver.
#[derive(Debug, Clone)]
pub struct ReconfigureSignal {
	sender: UnboundedSender<()>,
}

impl ReconfigureSignal {
	/// Queues one reconfiguration. Signals are handled one at a time, in order.
	pub fn notify(&self) {
		if self.sender.send(()).is_err() {
			log::debug!("reconfiguration worker is gone; signal dropped");
		}
	}
}

struct EngineInner {
	config: EngineConfig,
	blacklist: Arc<Blacklist>,
	source: Arc<dyn TargetSource>,
	preferences: Arc<dyn PreferenceStore>,
	targets: SharedTargets,
	stats: StatsReporter,
	orchestrator: Arc<RequestOrchestrator>,
	scheduler: Arc<SessionScheduler>,
	negotiator: ResolverNegotiator,
	transport_factory: TransportFactory,
	encrypted_resolution: AtomicBool,
	active_resolver: RwLock<Option<ActiveResolver>>,
	events: Arc<EventDispatcher>,
	reconfigure: Mutex<Option<ReconfigureSignal>>,
	lifecycle: tokio::sync::Mutex<()>,
}

/// Host-facing handle; clones share one engine.
#[derive(Clone)]
pub struct TrafficEngine {
	inner: Arc<EngineInner>,
}

impl TrafficEngine {
	pub fn builder() -> TrafficEngineBuilder {
		TrafficEngineBuilder::new()
	}

	fn with_parts(builder: TrafficEngineBuilder) -> EngineResult<Self> {
		let config = builder.config;
		config.validate()?;

		let mut events = EventDispatcher::new();
		if builder.log_events {
			events.register_handler(Arc::new(LoggingHandler));
		}
		for handler in builder.handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let preferences: Arc<dyn PreferenceStore> = builder
			.preferences
			.unwrap_or_else(|| Arc::new(InMemoryPreferences::new()));
		let initial_count = preferences.request_count().unwrap_or_else(|err| {
			log::warn!("could not read persisted request count: {err}");
			0
		});

		let blacklist = Arc::new(Blacklist::new(
			config.static_config.blacklisted_urls.iter(),
		));
		let identities = Arc::new(IdentityPool::new(config.static_config.user_agents.iter()));
		let targets = SharedTargets::default();
		let stats = StatsReporter::with_initial_count(events.clone(), initial_count);
		let jitter = JitterPolicy::new(config.timing);

		let orchestrator = Arc::new(RequestOrchestrator::new(
			identities,
			targets.clone(),
			ResourceDiscovery::new(config.max_resources, blacklist.clone()),
			jitter,
			stats.clone(),
			events.clone(),
		));
		let scheduler = Arc::new(SessionScheduler::new(
			targets.clone(),
			orchestrator.clone(),
			stats.clone(),
			jitter,
			config.auxiliary.clone(),
			events.clone(),
		));

		let probe: Arc<dyn ResolverProbe> = builder.probe.unwrap_or_else(|| {
			Arc::new(HttpsProbe::new(config.probe_url.clone(), config.probe_timeout))
		});
		let negotiator = ResolverNegotiator::new(
			config.resolver_candidates.clone(),
			probe,
			preferences.clone(),
		);

		Ok(Self {
			inner: Arc::new(EngineInner {
				encrypted_resolution: AtomicBool::new(config.encrypted_resolution),
				config,
				blacklist,
				source: builder
					.source
					.unwrap_or_else(|| Arc::new(InMemoryTargets::new())),
				preferences,
				targets,
				stats,
				orchestrator,
				scheduler,
				negotiator,
				transport_factory: builder
					.transport_factory
					.unwrap_or_else(reqwest_transport_factory),
				active_resolver: RwLock::new(None),
				events,
				reconfigure: Mutex::new(None),
				lifecycle: tokio::sync::Mutex::new(()),
			}),
		})
	}

	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	/// Loads targets, negotiates a resolver if none is bound, and starts cycling.
	pub async fn start_engine(&self) -> EngineResult<()> {
		let _guard = self.inner.lifecycle.lock().await;
		if self.inner.scheduler.is_running() {
			return Err(EngineError::AlreadyRunning);
		}

		if self.reload_targets().is_empty() {
			log::warn!("refusing to start: no eligible targets");
			return Err(EngineError::NoTargets);
		}
		if !self.inner.orchestrator.is_bound() {
			self.bind_resolver().await?;
		}
		self.inner.scheduler.start()?;
		Ok(())
	}

	/// Cancels the schedule, persists the counter and drops the binding. Idempotent.
	pub async fn stop_engine(&self) {
		let _guard = self.inner.lifecycle.lock().await;
		self.inner.scheduler.stop();
		self.inner.orchestrator.release_transport();
		*self
			.inner
			.active_resolver
			.write()
			.expect("resolver lock poisoned") = None;

		let count = self.inner.stats.request_count();
		if let Err(err) = self.inner.preferences.set_request_count(count) {
			log::warn!("could not persist request count: {err}");
		}
	}

	/// Reloads the target set and, while running, renegotiates the resolver.
	pub async fn reconfigure(&self) -> EngineResult<()> {
		let _guard = self.inner.lifecycle.lock().await;
		let loaded = self.reload_targets();
		log::info!("reconfigured with {} target(s)", loaded.len());

		if self.inner.scheduler.is_running() {
			self.bind_resolver().await?;
		} else {
			// Next start negotiates afresh.
			self.inner.orchestrator.release_transport();
			*self
				.inner
				.active_resolver
				.write()
				.expect("resolver lock poisoned") = None;
		}
		Ok(())
	}

	/// Signal handle backed by a worker task. Must be called inside a tokio runtime.
	pub fn reconfigure_signal(&self) -> ReconfigureSignal {
		let mut slot = self
			.inner
			.reconfigure
			.lock()
			.expect("reconfigure lock poisoned");
		if let Some(signal) = slot.as_ref() {
			return signal.clone();
		}

		let (sender, mut receiver) = mpsc::unbounded_channel::<()>();
		let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
		tokio::spawn(async move {
			while receiver.recv().await.is_some() {
				let Some(inner) = weak.upgrade() else {
					break;
				};
				let engine = TrafficEngine { inner };
				if let Err(err) = engine.reconfigure().await {
					log::warn!("reconfiguration failed: {err}");
				}
			}
			log::debug!("reconfiguration worker finished");
		});

		let signal = ReconfigureSignal { sender };
		*slot = Some(signal.clone());
		signal
	}

	/// Toggles encrypted resolution; a running engine renegotiates in the background.
	pub fn set_encrypted_resolution(&self, enabled: bool) {
		let previous = self
			.inner
			.encrypted_resolution
			.swap(enabled, Ordering::SeqCst);
		if previous != enabled && self.inner.scheduler.is_running() {
			self.reconfigure_signal().notify();
		}
	}

	pub fn encrypted_resolution(&self) -> bool {
		self.inner.encrypted_resolution.load(Ordering::SeqCst)
	}

	/// `None` until a start has negotiated a resolver.
	pub fn active_resolver(&self) -> Option<ActiveResolver> {
		self.inner
			.active_resolver
			.read()
			.expect("resolver lock poisoned")
			.clone()
	}

	pub fn state(&self) -> RunState {
		self.inner.scheduler.state()
	}

	pub fn is_running(&self) -> bool {
		self.inner.scheduler.is_running()
	}

	pub fn stats(&self) -> StatsSnapshot {
		self.inner.stats.snapshot()
	}

	pub fn visits(&self) -> Vec<VisitRecord> {
		self.inner.stats.visits()
	}

	pub fn request_count(&self) -> u64 {
		self.inner.stats.request_count()
	}

	/// Currently effective (filtered) targets.
	pub fn targets(&self) -> Vec<String> {
		self.inner.targets.snapshot().urls().to_vec()
	}

	pub fn blacklist(&self) -> &Blacklist {
		&self.inner.blacklist
	}

	fn reload_targets(&self) -> Arc<TargetSet> {
		let set = TargetSet::load(self.inner.source.targets(), &self.inner.blacklist);
		self.inner.targets.replace(set);
		self.inner.targets.snapshot()
	}

	async fn bind_resolver(&self) -> EngineResult<()> {
		let resolver = self
			.inner
			.negotiator
			.negotiate(self.encrypted_resolution())
			.await;
		let transport =
			(self.inner.transport_factory)(&resolver, self.inner.config.request_timeout())?;
		self.inner.orchestrator.bind_transport(transport);
		*self
			.inner
			.active_resolver
			.write()
			.expect("resolver lock poisoned") = Some(resolver.clone());

		self.inner
			.events
			.dispatch(EngineEvent::ResolverSelected(ResolverSelectedEvent {
				resolver,
				timestamp: Utc::now(),
			}));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::StaticConfig;

	fn config(blacklist: &[&str]) -> EngineConfig {
		EngineConfig::builder()
			.with_static_config(StaticConfig {
				blacklisted_urls: blacklist.iter().map(|s| s.to_string()).collect(),
				user_agents: vec!["UA1".into()],
				timeout: 1_000,
			})
			.with_encrypted_resolution(false)
			.build()
			.unwrap()
	}

	#[tokio::test]
	async fn start_fails_without_eligible_targets() {
		let engine = TrafficEngine::builder()
			.with_config(config(&["blocked"]))
			.with_targets(["https://blocked.test", "http://plain.test"])
			.build()
			.unwrap();
		assert!(matches!(engine.start_engine().await, Err(EngineError::NoTargets)));
		assert_eq!(engine.state(), RunState::Idle);
		assert!(engine.active_resolver().is_none());
	}

	#[tokio::test]
	async fn blacklist_filters_effective_targets() {
		let engine = TrafficEngine::builder()
			.with_config(config(&["b.test"]))
			.with_targets(["https://a.test", "https://b.test"])
			.build()
			.unwrap();
		engine.start_engine().await.unwrap();
		assert_eq!(engine.targets(), vec!["https://a.test".to_string()]);
		assert_eq!(engine.active_resolver(), Some(ActiveResolver::System));
		assert!(matches!(engine.start_engine().await, Err(EngineError::AlreadyRunning)));
		engine.stop_engine().await;
		engine.stop_engine().await;
		assert_eq!(engine.state(), RunState::Idle);
		assert!(engine.active_resolver().is_none());
	}

	#[test]
	fn invalid_config_is_rejected_at_build() {
		let mut config = EngineConfig::default();
		config.auxiliary.beacon_probability = 2.0;
		let result = TrafficEngine::builder().with_config(config).build();
		assert!(matches!(result, Err(EngineError::Config(_))));
	}
}
