//! Target set management.
//!
//! The host owns the list of URLs to visit (see [`TargetSource`]); the engine
//! only ever reads a filtered [`TargetSet`] snapshot built at load time.

mod shared;

use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;
use thiserror::Error;
use url::Url;

use super::blacklist::Blacklist;

pub use shared::SharedTargets;

/// Reasons a host-supplied URL is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("'{0}' is not a well-formed url")]
    Malformed(String),
    #[error("'{0}' does not use https")]
    NotHttps(String),
    #[error("'{0}' has no host")]
    MissingHost(String),
    #[error("'{0}' is already present")]
    Duplicate(String),
}

/// Checks that `raw` is a well-formed HTTPS URL with a host.
pub fn validate_https_url(raw: &str) -> Result<Url, TargetError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("https://") {
        return Err(TargetError::NotHttps(trimmed.to_string()));
    }
    let url = Url::parse(trimmed).map_err(|_| TargetError::Malformed(trimmed.to_string()))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(TargetError::MissingHost(trimmed.to_string())),
    }
}

/// Filtered, de-duplicated, ordered collection of fetchable URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    urls: Vec<String>,
}

impl TargetSet {
    /// Keeps only `https://` entries that the blacklist allows, in order.
    pub fn load<I, S>(raw: I, blacklist: &Blacklist) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut urls: Vec<String> = Vec::new();
        for candidate in raw {
            let candidate = candidate.as_ref().trim();
            if !candidate.starts_with("https://") {
                log::debug!("dropping non-https target {candidate}");
                continue;
            }
            if blacklist.is_blacklisted(candidate) {
                log::debug!("dropping blacklisted target {candidate}");
                continue;
            }
            if urls.iter().any(|existing| existing == candidate) {
                continue;
            }
            urls.push(candidate.to_string());
        }
        Self { urls }
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.iter().any(|existing| existing == url)
    }

    /// Uniform random pick.
    pub fn choose(&self) -> Option<&str> {
        self.urls
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }
}

/// Host-side provider of the raw target list, read on every reload.
pub trait TargetSource: Send + Sync {
    fn targets(&self) -> Vec<String>;
}

/// Simple host store with validated mutation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTargets {
    inner: Arc<RwLock<Vec<String>>>,
}

impl InMemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store, silently skipping entries that fail validation.
    pub fn with_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for url in urls {
            if let Err(err) = store.add(url.as_ref()) {
                log::debug!("skipping target: {err}");
            }
        }
        store
    }

    pub fn add(&self, raw: &str) -> Result<(), TargetError> {
        let url = validate_https_url(raw)?;
        let trimmed = raw.trim().to_string();
        let mut guard = self.inner.write().expect("targets lock poisoned");
        if guard.iter().any(|existing| *existing == trimmed) {
            return Err(TargetError::Duplicate(url.to_string()));
        }
        guard.push(trimmed);
        Ok(())
    }

    pub fn remove(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        let mut guard = self.inner.write().expect("targets lock poisoned");
        let before = guard.len();
        guard.retain(|existing| existing != trimmed);
        guard.len() != before
    }

    pub fn clear(&self) {
        self.inner.write().expect("targets lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("targets lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TargetSource for InMemoryTargets {
    fn targets(&self) -> Vec<String> {
        self.inner.read().expect("targets lock poisoned").clone()
    }
}
