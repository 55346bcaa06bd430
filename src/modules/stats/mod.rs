//! Visit history and request counter.
//!
//! The reporter is the single writer of the rolling "recently visited" log
//! and the cumulative success counter. Both live under one mutex. A second
//! lock orders notifications so listeners see snapshots in append order,
//! and listeners run with the state lock released so they may read it back.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use super::events::{EngineEvent, EventDispatcher};

/// Number of visits kept in the rolling log.
pub const MAX_LAST_URLS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRecord {
    pub url: String,
    pub address: Option<IpAddr>,
    pub visited_at: DateTime<Utc>,
}

/// Payload delivered to the host on every visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub request_count: u64,
    pub last_urls: Vec<String>,
}

#[derive(Debug)]
struct StatsState {
    request_count: u64,
    visits: VecDeque<VisitRecord>,
}

impl StatsState {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            request_count: self.request_count,
            last_urls: self.visits.iter().map(|visit| visit.url.clone()).collect(),
        }
    }
}

/// Thread-safe reporter shared by the scheduler and request completions.
#[derive(Clone)]
pub struct StatsReporter {
    inner: Arc<Mutex<StatsState>>,
    notify: Arc<Mutex<()>>,
    events: Arc<EventDispatcher>,
}

impl StatsReporter {
    pub fn new(events: Arc<EventDispatcher>) -> Self {
        Self::with_initial_count(events, 0)
    }

    /// Starts the counter from a previously persisted value.
    pub fn with_initial_count(events: Arc<EventDispatcher>, request_count: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsState {
                request_count,
                visits: VecDeque::with_capacity(MAX_LAST_URLS + 1),
            })),
            notify: Arc::new(Mutex::new(())),
            events,
        }
    }

    /// Appends a visit, evicts beyond capacity, and notifies listeners.
    pub fn record_visit(&self, url: &str) {
        let _ordering = self.notify.lock().expect("stats notify lock poisoned");
        let snapshot = {
            let mut guard = self.inner.lock().expect("stats lock poisoned");
            guard.visits.push_back(VisitRecord {
                url: url.to_string(),
                address: None,
                visited_at: Utc::now(),
            });
            while guard.visits.len() > MAX_LAST_URLS {
                guard.visits.pop_front();
            }
            guard.snapshot()
        };
        self.events.dispatch(EngineEvent::Stats(snapshot));
    }

    /// Fills in the peer address on the newest matching visit that lacks one.
    pub fn annotate_address(&self, url: &str, address: IpAddr) {
        let mut guard = self.inner.lock().expect("stats lock poisoned");
        if let Some(visit) = guard
            .visits
            .iter_mut()
            .rev()
            .find(|visit| visit.url == url && visit.address.is_none())
        {
            visit.address = Some(address);
        }
    }

    /// Counts one confirmed successful response.
    pub fn record_success(&self) -> u64 {
        let mut guard = self.inner.lock().expect("stats lock poisoned");
        guard.request_count = guard.request_count.saturating_add(1);
        guard.request_count
    }

    pub fn request_count(&self) -> u64 {
        self.inner.lock().expect("stats lock poisoned").request_count
    }

    pub fn visits(&self) -> Vec<VisitRecord> {
        self.inner
            .lock()
            .expect("stats lock poisoned")
            .visits
            .iter()
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().expect("stats lock poisoned").snapshot()
    }
}
