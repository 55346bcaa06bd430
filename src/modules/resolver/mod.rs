//! Name-resolution channel negotiation.
//!
//! Probes each DNS-over-HTTPS candidate in preference order and keeps the
//! first one that can carry a real HTTPS request end to end. When every
//! candidate fails, or encrypted resolution is turned off, the system
//! resolver is used instead.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::preferences::PreferenceStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DNS_JSON: &str = "application/dns-json";
const RECORD_A: u16 = 1;
const RECORD_AAAA: u16 = 28;

/// Named DNS-over-HTTPS endpoint speaking the JSON API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverCandidate {
    pub name: String,
    pub endpoint: Url,
}

impl ResolverCandidate {
    pub fn new(name: impl Into<String>, endpoint: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            name: name.into(),
            endpoint: Url::parse(endpoint)?,
        })
    }
}

/// Google, Cloudflare and Quad9, in that order.
pub fn default_candidates() -> Vec<ResolverCandidate> {
    [
        ("Google DNS", "https://dns.google/resolve"),
        ("Cloudflare DNS", "https://cloudflare-dns.com/dns-query"),
        ("Quad9 DNS", "https://dns.quad9.net:5053/dns-query"),
    ]
    .into_iter()
    .filter_map(|(name, endpoint)| ResolverCandidate::new(name, endpoint).ok())
    .collect()
}

/// Resolution channel currently used by outbound requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveResolver {
    #[default]
    System,
    Encrypted(ResolverCandidate),
}

impl ActiveResolver {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, ActiveResolver::Encrypted(_))
    }

    pub fn candidate_name(&self) -> Option<&str> {
        match self {
            ActiveResolver::System => None,
            ActiveResolver::Encrypted(candidate) => Some(candidate.name.as_str()),
        }
    }
}

impl fmt::Display for ActiveResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveResolver::System => write!(f, "system resolver"),
            ActiveResolver::Encrypted(candidate) => {
                write!(f, "{} ({})", candidate.name, candidate.endpoint)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DohError {
    #[error("doh transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("doh endpoint answered http {0}")]
    HttpStatus(u16),
    #[error("doh response could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("dns status {status} for {host}")]
    DnsStatus { host: String, status: u32 },
    #[error("no addresses found for {0}")]
    NoAddresses(String),
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Extracts A/AAAA addresses from a JSON DoH answer. CNAME hops are skipped.
fn parse_answers(host: &str, body: &[u8]) -> Result<Vec<IpAddr>, DohError> {
    let response: DohResponse = serde_json::from_slice(body)?;
    if response.status != 0 {
        return Err(DohError::DnsStatus {
            host: host.to_string(),
            status: response.status,
        });
    }
    Ok(response
        .answer
        .iter()
        .filter(|answer| answer.record_type == RECORD_A || answer.record_type == RECORD_AAAA)
        .filter_map(|answer| answer.data.trim().parse::<IpAddr>().ok())
        .collect())
}

struct DohInner {
    candidate: ResolverCandidate,
    bootstrap: reqwest::Client,
}

/// `reqwest` resolver that sends every lookup through a DoH endpoint.
///
/// The endpoint itself is reached through the bootstrap client, which uses
/// the system resolver.
#[derive(Clone)]
pub struct DohResolver {
    inner: Arc<DohInner>,
}

impl DohResolver {
    pub fn new(candidate: ResolverCandidate, bootstrap: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(DohInner { candidate, bootstrap }),
        }
    }

    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DohError> {
        let mut addresses = self.query(host, "A").await?;
        if addresses.is_empty() {
            addresses = self.query(host, "AAAA").await?;
        }
        if addresses.is_empty() {
            return Err(DohError::NoAddresses(host.to_string()));
        }
        Ok(addresses)
    }

    async fn query(&self, host: &str, record: &str) -> Result<Vec<IpAddr>, DohError> {
        let response = self
            .inner
            .bootstrap
            .get(self.inner.candidate.endpoint.clone())
            .query(&[("name", host), ("type", record)])
            .header(ACCEPT, DNS_JSON)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DohError::HttpStatus(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        parse_answers(host, &body)
    }

    async fn lookup_addrs(self, host: String) -> Result<Addrs, BoxError> {
        let addresses = self.lookup(&host).await?;
        log::trace!("{} resolved {host} -> {addresses:?}", self.inner.candidate.name);
        // Port 0 is replaced by the connector with the request's port.
        let addrs: Addrs = Box::new(
            addresses
                .into_iter()
                .map(|ip| SocketAddr::new(ip, 0)),
        );
        Ok(addrs)
    }
}

impl Resolve for DohResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(resolver.lookup_addrs(name.as_str().to_string()))
    }
}

/// Builds the HTTP client bound to a resolution channel.
pub fn http_client_for(
    active: &ActiveResolver,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .cookie_store(true)
        .timeout(timeout);

    if let ActiveResolver::Encrypted(candidate) = active {
        let bootstrap = reqwest::Client::builder().timeout(timeout).build()?;
        builder = builder.dns_resolver(Arc::new(DohResolver::new(candidate.clone(), bootstrap)));
    }

    builder.build()
}

/// Why a candidate was judged unusable.
#[derive(Debug, Error)]
pub enum ResolverProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe transport error: {0}")]
    Transport(String),
    #[error("probe answered http {0}")]
    Status(u16),
    #[error("probe client could not be built: {0}")]
    Client(String),
}

/// Checks whether a candidate can carry traffic.
#[async_trait]
pub trait ResolverProbe: Send + Sync {
    async fn probe(&self, candidate: &ResolverCandidate) -> Result<(), ResolverProbeError>;
}

/// Issues a GET to a well-known HTTPS host through the candidate.
#[derive(Debug, Clone)]
pub struct HttpsProbe {
    probe_url: Url,
    timeout: Duration,
}

impl HttpsProbe {
    pub fn new(probe_url: Url, timeout: Duration) -> Self {
        Self { probe_url, timeout }
    }
}

#[async_trait]
impl ResolverProbe for HttpsProbe {
    async fn probe(&self, candidate: &ResolverCandidate) -> Result<(), ResolverProbeError> {
        let client = http_client_for(&ActiveResolver::Encrypted(candidate.clone()), self.timeout)
            .map_err(|err| ResolverProbeError::Client(err.to_string()))?;

        let response = tokio::time::timeout(self.timeout, client.get(self.probe_url.clone()).send())
            .await
            .map_err(|_| ResolverProbeError::Timeout(self.timeout))?
            .map_err(|err| {
                if err.is_timeout() {
                    ResolverProbeError::Timeout(self.timeout)
                } else {
                    ResolverProbeError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ResolverProbeError::Status(status.as_u16()))
        }
    }
}

/// Selects the active resolver.
pub struct ResolverNegotiator {
    candidates: Vec<ResolverCandidate>,
    probe: Arc<dyn ResolverProbe>,
    preferences: Arc<dyn PreferenceStore>,
}

impl ResolverNegotiator {
    pub fn new(
        candidates: Vec<ResolverCandidate>,
        probe: Arc<dyn ResolverProbe>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            candidates,
            probe,
            preferences,
        }
    }

    pub fn candidates(&self) -> &[ResolverCandidate] {
        &self.candidates
    }

    /// Preferred candidate first (if it is still known), then list order.
    pub fn preference_order(&self, preferred: Option<&str>) -> Vec<&ResolverCandidate> {
        let mut ordered: Vec<&ResolverCandidate> = Vec::with_capacity(self.candidates.len());
        if let Some(name) = preferred
            && let Some(candidate) = self.candidates.iter().find(|c| c.name == name)
        {
            ordered.push(candidate);
        }
        for candidate in &self.candidates {
            if !ordered.iter().any(|c| c.name == candidate.name) {
                ordered.push(candidate);
            }
        }
        ordered
    }

    /// Never fails: an exhausted candidate list yields the system resolver.
    pub async fn negotiate(&self, encrypted_resolution: bool) -> ActiveResolver {
        if !encrypted_resolution {
            log::debug!("encrypted resolution disabled; using system resolver");
            return ActiveResolver::System;
        }

        let preferred = match self.preferences.preferred_resolver() {
            Ok(preferred) => preferred,
            Err(err) => {
                log::warn!("could not read preferred resolver: {err}");
                None
            }
        };

        for candidate in self.preference_order(preferred.as_deref()) {
            match self.probe.probe(candidate).await {
                Ok(()) => {
                    log::info!("resolver {} passed its probe", candidate.name);
                    if let Err(err) = self.preferences.set_preferred_resolver(&candidate.name) {
                        log::warn!("could not persist preferred resolver: {err}");
                    }
                    return ActiveResolver::Encrypted(candidate.clone());
                }
                Err(err) => {
                    log::warn!("resolver {} unusable: {err}", candidate.name);
                }
            }
        }

        log::warn!("no encrypted resolver available; falling back to system resolver");
        ActiveResolver::System
    }
}
