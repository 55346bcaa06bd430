//! Request orchestration.
//!
//! Builds one outbound request per dispatch with a freshly rotated identity,
//! sends it through the currently bound transport and classifies the result.
//! Successful primary fetches feed resource discovery; successful stylesheet
//! fetches feed one pass of `@import` discovery. Failures are logged and
//! swallowed here so the scheduler never sees them.

pub mod transport;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use http::header::{CONTENT_TYPE, HeaderValue, REFERER};
use http::Method;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;
use url::form_urlencoded;

use super::discovery::{AssetKind, DiscoveredAsset, ResourceDiscovery, asset_kind};
use super::events::{EngineEvent, EventDispatcher, RequestCompletedEvent, RequestFailedEvent};
use super::identity::{AcceptProfile, IdentityPool};
use super::stats::StatsReporter;
use super::targets::SharedTargets;
use super::timing::JitterPolicy;

pub use transport::{
    HttpTransport, MAX_BODY_BYTES, MAX_DOCUMENT_BYTES, OutboundRequest, ReqwestTransport,
    RequestError, TransportResponse,
};

const SEARCH_REFERRERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://duckduckgo.com/",
];

const FORM_WORDS: &[&str] = &[
    "hello", "question", "pricing", "support", "feedback", "newsletter", "order", "demo",
];

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// What a dispatch is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Primary,
    Resource,
    FormSubmit,
    Beacon,
}

/// Result of one dispatch. Only ever observed, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded { status: u16 },
    Failed(RequestError),
    Rejected(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Succeeded { .. })
    }
}

/// Handle to a dispatched request. Dropping it does not cancel the request.
pub type DispatchHandle = JoinHandle<DispatchOutcome>;

/// Dispatches primary, derived and auxiliary requests.
pub struct RequestOrchestrator {
    transport: RwLock<Option<Arc<dyn HttpTransport>>>,
    identities: Arc<IdentityPool>,
    targets: SharedTargets,
    discovery: ResourceDiscovery,
    jitter: JitterPolicy,
    stats: StatsReporter,
    events: Arc<EventDispatcher>,
}

impl RequestOrchestrator {
    pub fn new(
        identities: Arc<IdentityPool>,
        targets: SharedTargets,
        discovery: ResourceDiscovery,
        jitter: JitterPolicy,
        stats: StatsReporter,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            transport: RwLock::new(None),
            identities,
            targets,
            discovery,
            jitter,
            stats,
            events,
        }
    }

    /// Replaces the transport wholesale; in-flight requests keep the old one.
    pub fn bind_transport(&self, transport: Arc<dyn HttpTransport>) {
        *self.transport.write().expect("transport lock poisoned") = Some(transport);
    }

    pub fn release_transport(&self) {
        *self.transport.write().expect("transport lock poisoned") = None;
    }

    pub fn is_bound(&self) -> bool {
        self.transport.read().expect("transport lock poisoned").is_some()
    }

    fn current_transport(&self) -> Option<Arc<dyn HttpTransport>> {
        self.transport.read().expect("transport lock poisoned").clone()
    }

    /// Fire-and-forget dispatch on the tokio runtime.
    pub fn dispatch(self: &Arc<Self>, url: &str, kind: RequestKind) -> DispatchHandle {
        let this = Arc::clone(self);
        let url = url.to_string();
        tokio::spawn(async move { this.execute(&url, kind).await })
    }

    /// Runs one dispatch to completion.
    pub async fn execute(self: &Arc<Self>, url: &str, kind: RequestKind) -> DispatchOutcome {
        self.execute_with(url, kind, None, true).await
    }

    /// `asset` is what the referring document declared a resource to be.
    async fn execute_with(
        self: &Arc<Self>,
        url: &str,
        kind: RequestKind,
        asset: Option<AssetKind>,
        scan_imports: bool,
    ) -> DispatchOutcome {
        if !url.starts_with("https://") {
            log::debug!("rejecting non-https {kind:?} request to {url}");
            return DispatchOutcome::Rejected(format!("not https: {url}"));
        }
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::debug!("rejecting malformed {kind:?} url {url}: {err}");
                return DispatchOutcome::Rejected(format!("malformed url {url}: {err}"));
            }
        };
        let Some(transport) = self.current_transport() else {
            return self.fail(url, kind, RequestError::NotBound);
        };

        let asset = asset.or_else(|| asset_kind(&parsed));
        let request = self.build_request(parsed, kind, asset);
        let started = Instant::now();
        let response = match transport.send(request).await {
            Ok(response) => response,
            Err(err) => return self.fail(url, kind, err),
        };
        if !response.is_success() {
            return self.fail(url, kind, RequestError::Status(response.status));
        }

        let count = self.stats.record_success();
        log::trace!("{kind:?} {url} succeeded; {count} successful request(s)");
        self.events
            .dispatch(EngineEvent::RequestCompleted(RequestCompletedEvent {
                url: response.url.clone(),
                kind,
                status: response.status,
                latency: started.elapsed(),
                timestamp: Utc::now(),
            }));

        match kind {
            RequestKind::Primary => {
                if let Some(addr) = response.remote_addr {
                    self.stats.annotate_address(url, addr.ip());
                }
                if let Some(body) = &response.body {
                    let html = String::from_utf8_lossy(body);
                    let found = self.discovery.discover(&response.url, &html);
                    log::debug!("{} follow-up resource(s) from {url}", found.len());
                    for resource in found {
                        self.schedule_resource(resource, true);
                    }
                }
            }
            RequestKind::Resource if scan_imports => {
                if let Some(body) = &response.body
                    && (asset == Some(AssetKind::Stylesheet) || serves_css(&response))
                {
                    let css = String::from_utf8_lossy(body);
                    for import in self.discovery.discover_imports(&response.url, &css) {
                        self.schedule_resource(import, false);
                    }
                }
            }
            _ => {}
        }

        DispatchOutcome::Succeeded {
            status: response.status,
        }
    }

    fn fail(&self, url: &str, kind: RequestKind, error: RequestError) -> DispatchOutcome {
        log::debug!("{kind:?} request to {url} failed: {error}");
        self.events
            .dispatch(EngineEvent::RequestFailed(RequestFailedEvent {
                url: url.to_string(),
                kind,
                error: error.to_string(),
                timestamp: Utc::now(),
            }));
        DispatchOutcome::Failed(error)
    }

    /// Derived fetch after its own resource-level delay. Re-validated first.
    fn schedule_resource(self: &Arc<Self>, asset: DiscoveredAsset, scan_imports: bool) {
        let DiscoveredAsset { url, kind } = asset;
        if !self.discovery.is_eligible(&url) {
            log::debug!("skipping ineligible resource {url}");
            return;
        }
        let delay = self.jitter.resource_delay();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            sleep(delay).await;
            this.execute_with(url.as_str(), RequestKind::Resource, Some(kind), scan_imports)
                .await;
        });
    }

    fn build_request(
        &self,
        url: Url,
        kind: RequestKind,
        asset: Option<AssetKind>,
    ) -> OutboundRequest {
        let mut rng = rand::thread_rng();
        match kind {
            RequestKind::Primary => {
                let mut headers = self.identities.headers(AcceptProfile::Document);
                let referrer = SEARCH_REFERRERS
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or(SEARCH_REFERRERS[0]);
                headers.insert(REFERER, HeaderValue::from_static(referrer));
                OutboundRequest {
                    method: Method::GET,
                    url,
                    headers,
                    body: None,
                    capture_body: true,
                    body_limit: MAX_DOCUMENT_BYTES,
                }
            }
            RequestKind::Resource => {
                let profile = AcceptProfile::for_asset(asset);
                OutboundRequest {
                    method: Method::GET,
                    headers: self.identities.headers(profile),
                    // Unknown resources are kept so their content type can decide.
                    capture_body: matches!(profile, AcceptProfile::Stylesheet | AcceptProfile::Any),
                    url,
                    body: None,
                    body_limit: MAX_BODY_BYTES,
                }
            }
            RequestKind::FormSubmit => {
                let mut headers = self.identities.headers(AcceptProfile::Document);
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
                let referrer = self
                    .targets
                    .snapshot()
                    .choose()
                    .map(str::to_string)
                    .unwrap_or_else(|| url.to_string());
                if let Ok(value) = HeaderValue::from_str(&referrer) {
                    headers.insert(REFERER, value);
                }
                OutboundRequest {
                    method: Method::POST,
                    url,
                    headers,
                    body: Some(form_body(&mut rng)),
                    capture_body: false,
                    body_limit: MAX_BODY_BYTES,
                }
            }
            RequestKind::Beacon => {
                let mut headers = self.identities.headers(AcceptProfile::Any);
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
                let page = self.targets.snapshot().choose().map(str::to_string);
                OutboundRequest {
                    method: Method::POST,
                    url,
                    headers,
                    body: Some(beacon_body(&mut rng, page.as_deref())),
                    capture_body: false,
                    body_limit: MAX_BODY_BYTES,
                }
            }
        }
    }
}

fn serves_css(response: &TransportResponse) -> bool {
    response
        .content_type
        .as_deref()
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/css"))
}

fn random_word<R: Rng>(rng: &mut R) -> &'static str {
    FORM_WORDS.choose(rng).copied().unwrap_or("hello")
}

fn form_body<R: Rng>(rng: &mut R) -> Bytes {
    let name = format!("{}{}", random_word(rng), rng.gen_range(10..1000));
    let message = format!("{} {}", random_word(rng), random_word(rng));
    let body = form_urlencoded::Serializer::new(String::new())
        .append_pair("name", &name)
        .append_pair("email", &format!("{name}@example.com"))
        .append_pair("message", &message)
        .append_pair("submit", "Send")
        .finish();
    Bytes::from(body)
}

/// Random client id in the usual `xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx` shape.
fn client_id<R: Rng>(rng: &mut R) -> String {
    let bytes: [u8; 16] = rng.r#gen();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-4{}-{:x}{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[13..16],
        8 + (bytes[8] & 0x3),
        &hex[17..20],
        &hex[20..32]
    )
}

fn beacon_body<R: Rng>(rng: &mut R, page: Option<&str>) -> Bytes {
    let tracking_id = format!("UA-{}-1", rng.gen_range(100_000..1_000_000));
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer
        .append_pair("v", "1")
        .append_pair("tid", &tracking_id)
        .append_pair("cid", &client_id(rng))
        .append_pair("t", "pageview");
    if let Some(page) = page {
        serializer.append_pair("dl", page);
        if let Ok(parsed) = Url::parse(page) {
            serializer.append_pair("dp", parsed.path());
        }
    }
    Bytes::from(serializer.finish())
}
