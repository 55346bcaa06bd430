//! Client identity rotation.
//!
//! Samples a user agent per request from the configured pool and builds the
//! browser-plausible header set that accompanies it.

use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderName, HeaderValue,
    USER_AGENT,
};
use rand::seq::SliceRandom;

use super::discovery::AssetKind;

/// Identity used when the pool is empty.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0";

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "en-US,en;q=0.8,es;q=0.6",
    "en-US,en;q=0.9,de;q=0.7",
    "en-US,en;q=0.9,fr;q=0.8",
];

/// Every listed coding has a matching reqwest decoder enabled.
const ACCEPT_ENCODING_VALUE: &str = "gzip, deflate, br";

/// What kind of content a request asks for; drives the `accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptProfile {
    Document,
    Stylesheet,
    Image,
    Script,
    Any,
}

impl AcceptProfile {
    /// Profile for a subresource; unknown kinds accept anything.
    pub fn for_asset(kind: Option<AssetKind>) -> Self {
        match kind {
            Some(AssetKind::Stylesheet) => AcceptProfile::Stylesheet,
            Some(AssetKind::Image) => AcceptProfile::Image,
            Some(AssetKind::Script) => AcceptProfile::Script,
            None => AcceptProfile::Any,
        }
    }

    pub fn accept_value(self) -> &'static str {
        match self {
            AcceptProfile::Document => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
            }
            AcceptProfile::Stylesheet => "text/css,*/*;q=0.1",
            AcceptProfile::Image => "image/avif,image/webp,image/*,*/*;q=0.8",
            AcceptProfile::Script | AcceptProfile::Any => "*/*",
        }
    }
}

/// Pool of user-agent strings loaded once from the static payload.
#[derive(Debug, Clone, Default)]
pub struct IdentityPool {
    user_agents: Vec<String>,
}

impl IdentityPool {
    pub fn new<I, S>(user_agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let user_agents = user_agents
            .into_iter()
            .map(Into::into)
            .filter(|ua: &String| !ua.trim().is_empty() && HeaderValue::from_str(ua).is_ok())
            .collect();
        Self { user_agents }
    }

    pub fn len(&self) -> usize {
        self.user_agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_agents.is_empty()
    }

    /// Uniformly sampled user agent, or [`FALLBACK_USER_AGENT`].
    pub fn sample(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }

    /// Header set for one request. The user agent is re-sampled on every call.
    pub fn headers(&self, profile: AcceptProfile) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(self.sample())
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_USER_AGENT));
        headers.insert(USER_AGENT, user_agent);
        headers.insert(ACCEPT, HeaderValue::from_static(profile.accept_value()));
        let language = ACCEPT_LANGUAGES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(ACCEPT_LANGUAGES[0]);
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(language));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING_VALUE));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        if profile == AcceptProfile::Document {
            headers.insert(
                HeaderName::from_static("upgrade-insecure-requests"),
                HeaderValue::from_static("1"),
            );
        }
        headers
    }
}
