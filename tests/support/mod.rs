#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mocktraffic_rs::modules::ResolverCandidate;
use mocktraffic_rs::{
    ActiveResolver, EngineConfig, EngineEvent, EventHandler, HttpTransport, OutboundRequest,
    RequestError, ResolverProbe, ResolverProbeError, StaticConfig, TimingConfig,
    TransportFactory, TransportResponse,
};

/// In-process transport answering by URL path.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: HashMap<String, (u16, String)>,
    content_types: HashMap<String, String>,
    fail_all: bool,
    seen: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn route(mut self, path: &str, status: u16, body: impl Into<String>) -> Self {
        self.routes.insert(path.to_string(), (status, body.into()));
        self
    }

    pub fn content_type(mut self, path: &str, content_type: &str) -> Self {
        self.content_types
            .insert(path.to_string(), content_type.to_string());
        self
    }

    pub fn seen_paths(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }

    pub fn seen(&self) -> Vec<OutboundRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, RequestError> {
        let url = request.url.clone();
        let capture = request.capture_body;
        self.seen.lock().unwrap().push(request);
        if self.fail_all {
            return Err(RequestError::Transport("connection refused".into()));
        }
        let (status, body) = self
            .routes
            .get(url.path())
            .cloned()
            .unwrap_or((200, String::new()));
        let content_type = self.content_types.get(url.path()).cloned();
        Ok(TransportResponse {
            status,
            url,
            remote_addr: Some("192.0.2.7:443".parse().unwrap()),
            content_length: Some(body.len() as u64),
            content_type,
            body: capture.then(|| Bytes::from(body)),
        })
    }
}

/// Factory handing out one shared scripted transport regardless of resolver.
pub fn factory_for(transport: Arc<ScriptedTransport>) -> TransportFactory {
    Arc::new(move |_resolver: &ActiveResolver, _timeout: Duration| {
        Ok(transport.clone() as Arc<dyn HttpTransport>)
    })
}

/// Probe that only passes for the named candidates.
pub struct NamedProbe {
    pub healthy: Vec<&'static str>,
    pub asked: Mutex<Vec<String>>,
}

impl NamedProbe {
    pub fn new(healthy: Vec<&'static str>) -> Self {
        Self {
            healthy,
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ResolverProbe for NamedProbe {
    async fn probe(&self, candidate: &ResolverCandidate) -> Result<(), ResolverProbeError> {
        self.asked.lock().unwrap().push(candidate.name.clone());
        if self.healthy.contains(&candidate.name.as_str()) {
            Ok(())
        } else {
            Err(ResolverProbeError::Transport("unreachable".into()))
        }
    }
}

/// Collects every event for later inspection.
#[derive(Default)]
pub struct Recorder(pub Mutex<Vec<EngineEvent>>);

impl EventHandler for Recorder {
    fn handle(&self, event: &EngineEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        base_page_delay: Duration::from_millis(20),
        spread_below: Duration::ZERO,
        spread_above: Duration::ZERO,
        min_page_delay: Duration::from_millis(10),
        max_page_delay: Duration::from_millis(30),
        min_resource_delay: Duration::ZERO,
        max_resource_delay: Duration::from_millis(5),
    }
}

/// Quiet, fast config with no auxiliary traffic.
pub fn engine_config(blacklist: &[&str], encrypted: bool) -> EngineConfig {
    EngineConfig::builder()
        .with_static_config(StaticConfig {
            blacklisted_urls: blacklist.iter().map(|s| s.to_string()).collect(),
            user_agents: vec!["UA1".into()],
            timeout: 1_000,
        })
        .with_timing(fast_timing())
        .with_form_submit_probability(0.0)
        .with_beacon_probability(0.0)
        .with_encrypted_resolution(encrypted)
        .build()
        .unwrap()
}
