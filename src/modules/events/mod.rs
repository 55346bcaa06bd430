//! Event system for the engine.
//!
//! Provides hooks for the host (stats display, termination signal) and for
//! logging around scheduler and request activity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use super::orchestrator::RequestKind;
use super::resolver::ActiveResolver;
use super::scheduler::StopReason;
use super::stats::StatsSnapshot;

/// A request finished with a 2xx status.
#[derive(Debug, Clone)]
pub struct RequestCompletedEvent {
    pub url: Url,
    pub kind: RequestKind,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// A request failed (transport error, timeout or non-2xx status).
#[derive(Debug, Clone)]
pub struct RequestFailedEvent {
    pub url: String,
    pub kind: RequestKind,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResolverSelectedEvent {
    pub resolver: ActiveResolver,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoppedEvent {
    pub reason: StopReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started { targets: usize, timestamp: DateTime<Utc> },
    Stats(StatsSnapshot),
    RequestCompleted(RequestCompletedEvent),
    RequestFailed(RequestFailedEvent),
    ResolverSelected(ResolverSelectedEvent),
    Stopped(StoppedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EngineEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: EngineEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Started { targets, .. } => {
                log::info!("traffic engine started with {targets} target(s)");
            }
            EngineEvent::Stats(stats) => {
                log::debug!(
                    "stats: {} request(s), last urls {:?}",
                    stats.request_count,
                    stats.last_urls
                );
            }
            EngineEvent::RequestCompleted(done) => {
                log::debug!(
                    "<- {:?} {} -> {} ({:.2}s)",
                    done.kind,
                    done.url,
                    done.status,
                    done.latency.as_secs_f64()
                );
            }
            EngineEvent::RequestFailed(failed) => {
                log::debug!("{:?} {} failed: {}", failed.kind, failed.url, failed.error);
            }
            EngineEvent::ResolverSelected(selected) => {
                log::info!("resolver selected: {}", selected.resolver);
            }
            EngineEvent::Stopped(stopped) => {
                log::info!("traffic engine stopped: {}", stopped.reason);
            }
        }
    }
}

/// Forwards every event into a tokio channel, for hosts that poll.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: UnboundedSender<EngineEvent>,
}

impl ChannelHandler {
    pub fn new(sender: UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }
}

impl EventHandler for ChannelHandler {
    fn handle(&self, event: &EngineEvent) {
        // A closed receiver just means the host stopped listening.
        let _ = self.sender.send(event.clone());
    }
}
