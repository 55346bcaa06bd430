//! Subresource discovery.
//!
//! Turns a fetched page into a small, shuffled set of static assets worth
//! fetching next, and a fetched stylesheet into its `@import` targets. Every
//! candidate is re-checked against the scheme rule and the blacklist because
//! the URLs come straight from page content.

use std::sync::Arc;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use super::blacklist::Blacklist;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];

static CSS_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?"#)
        .case_insensitive(true)
        .build()
        .expect("invalid css import regex")
});

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("selector could not be built: {0}")]
    Selector(String),
    #[error("base url {0} cannot anchor relative links")]
    UnusableBase(Url),
}

/// Asset families that are eligible for follow-up fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Image,
    Script,
}

/// A follow-up fetch together with what the page declared it to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAsset {
    pub url: Url,
    pub kind: AssetKind,
}

fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Classifies a URL by its path extension.
pub fn asset_kind(url: &Url) -> Option<AssetKind> {
    match extension(url)?.as_str() {
        "css" => Some(AssetKind::Stylesheet),
        "js" => Some(AssetKind::Script),
        ext if IMAGE_EXTENSIONS.contains(&ext) => Some(AssetKind::Image),
        _ => None,
    }
}

fn is_stylesheet_rel(rel: Option<&str>) -> bool {
    rel.map(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("stylesheet"))
    })
    .unwrap_or(false)
}

/// Bounded, randomized subresource selection.
#[derive(Debug, Clone)]
pub struct ResourceDiscovery {
    max_resources: usize,
    blacklist: Arc<Blacklist>,
}

impl ResourceDiscovery {
    pub fn new(max_resources: usize, blacklist: Arc<Blacklist>) -> Self {
        Self {
            max_resources,
            blacklist,
        }
    }

    pub fn max_resources(&self) -> usize {
        self.max_resources
    }

    /// `https://` and not blacklisted.
    pub fn is_eligible(&self, url: &Url) -> bool {
        url.scheme() == "https" && !self.blacklist.is_blacklisted(url.as_str())
    }

    /// Never fails; a parse problem yields an empty set.
    pub fn discover(&self, base: &Url, html: &str) -> Vec<DiscoveredAsset> {
        match self.try_discover(base, html) {
            Ok(found) => found,
            Err(err) => {
                log::debug!("discovery skipped for {base}: {err}");
                Vec::new()
            }
        }
    }

    pub fn try_discover(
        &self,
        base: &Url,
        html: &str,
    ) -> Result<Vec<DiscoveredAsset>, DiscoveryError> {
        if base.cannot_be_a_base() {
            return Err(DiscoveryError::UnusableBase(base.clone()));
        }

        let document = Html::parse_document(html);
        let base = effective_base(&document, base);

        let selector = Selector::parse("link[href], img[src], script[src]")
            .map_err(|err| DiscoveryError::Selector(err.to_string()))?;

        let mut candidates: Vec<DiscoveredAsset> = Vec::new();
        for element in document.select(&selector) {
            let node = element.value();
            let (raw, stylesheet_link) = match node.name() {
                "link" => (node.attr("href"), is_stylesheet_rel(node.attr("rel"))),
                _ => (node.attr("src"), false),
            };
            let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
                continue;
            };
            let Ok(resolved) = base.join(raw) else {
                continue;
            };

            // A stylesheet link is a stylesheet whatever its path looks like.
            let kind = match (node.name(), asset_kind(&resolved)) {
                ("link", _) if stylesheet_link => AssetKind::Stylesheet,
                ("link", Some(AssetKind::Stylesheet)) => AssetKind::Stylesheet,
                ("img", Some(AssetKind::Image)) => AssetKind::Image,
                ("script", Some(AssetKind::Script)) => AssetKind::Script,
                _ => continue,
            };
            if self.is_eligible(&resolved) && !candidates.iter().any(|c| c.url == resolved) {
                candidates.push(DiscoveredAsset {
                    url: resolved,
                    kind,
                });
            }
        }

        Ok(self.sample(candidates))
    }

    /// `@import` targets of a stylesheet, resolved against its own URL.
    pub fn discover_imports(&self, stylesheet_url: &Url, css: &str) -> Vec<DiscoveredAsset> {
        let mut candidates: Vec<DiscoveredAsset> = Vec::new();
        for capture in CSS_IMPORT_RE.captures_iter(css) {
            let Some(raw) = capture.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let Ok(resolved) = stylesheet_url.join(raw) else {
                continue;
            };
            if self.is_eligible(&resolved) && !candidates.iter().any(|c| c.url == resolved) {
                candidates.push(DiscoveredAsset {
                    url: resolved,
                    kind: AssetKind::Stylesheet,
                });
            }
        }
        self.sample(candidates)
    }

    fn sample(&self, mut candidates: Vec<DiscoveredAsset>) -> Vec<DiscoveredAsset> {
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(self.max_resources);
        candidates
    }
}

/// Honours `<base href>` the way a browser would.
fn effective_base(document: &Html, fallback: &Url) -> Url {
    if let Ok(selector) = Selector::parse("base[href]")
        && let Some(element) = document.select(&selector).next()
        && let Some(href) = element.value().attr("href")
        && let Ok(joined) = fallback.join(href.trim())
    {
        return joined;
    }
    fallback.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(max: usize, blacklist: &[&str]) -> ResourceDiscovery {
        ResourceDiscovery::new(max, Arc::new(Blacklist::new(blacklist.iter().copied())))
    }

    fn base() -> Url {
        Url::parse("https://example.com/blog/post.html").unwrap()
    }

    #[test]
    fn caps_twenty_images_at_three() {
        let html: String = (0..20)
            .map(|i| format!("<img src=\"/img/photo{i}.jpg\">"))
            .collect();
        let found = discovery(3, &[]).discover(&base(), &html);
        assert_eq!(found.len(), 3);
        for asset in &found {
            assert!(asset.url.as_str().starts_with("https://example.com/img/photo"));
            assert_eq!(asset.kind, AssetKind::Image);
        }
    }

    #[test]
    fn resolves_relative_and_filters_ineligible() {
        let html = r#"
            <link rel="stylesheet" href="theme">
            <link rel="icon" href="favicon.ico">
            <link rel="alternate" href="feed.xml">
            <img src="http://insecure.test/a.png">
            <img src="https://ads.tracker.test/pixel.gif">
            <img src="data:image/png;base64,AAAA">
            <img src="images/ok.PNG">
            <script src="/static/app.js"></script>
            <script src="/api/config"></script>
        "#;
        let mut found: Vec<String> = discovery(10, &["tracker"])
            .discover(&base(), html)
            .into_iter()
            .map(|asset| asset.url.to_string())
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                "https://example.com/blog/images/ok.PNG".to_string(),
                "https://example.com/blog/theme".to_string(),
                "https://example.com/static/app.js".to_string(),
            ]
        );
    }

    #[test]
    fn stylesheet_links_keep_their_kind_without_css_extension() {
        let html = r#"
            <link rel="stylesheet" href="https://fonts.example.org/css2?family=Roboto">
            <link rel="preload stylesheet" href="/bundle">
            <link href="/legacy/site.css">
            <link rel="icon" href="/favicon.ico">
        "#;
        let mut found: Vec<(String, AssetKind)> = discovery(10, &[])
            .discover(&base(), html)
            .into_iter()
            .map(|asset| (asset.url.to_string(), asset.kind))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            found,
            vec![
                ("https://example.com/bundle".to_string(), AssetKind::Stylesheet),
                ("https://example.com/legacy/site.css".to_string(), AssetKind::Stylesheet),
                (
                    "https://fonts.example.org/css2?family=Roboto".to_string(),
                    AssetKind::Stylesheet
                ),
            ]
        );
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let html = "<html><img src=\"a.png\"<<<>>><link href=/x.css";
        let found = discovery(3, &[]).discover(&base(), html);
        assert!(found.len() <= 3);
    }

    #[test]
    fn unusable_base_yields_empty_set() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        let d = discovery(3, &[]);
        assert!(d.try_discover(&base, "<img src=\"a.png\">").is_err());
        assert!(d.discover(&base, "<img src=\"a.png\">").is_empty());
    }

    #[test]
    fn base_element_changes_resolution() {
        let html = r#"<base href="https://cdn.example.net/assets/"><img src="logo.png">"#;
        let found = discovery(3, &[]).discover(&base(), html);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url.as_str(), "https://cdn.example.net/assets/logo.png");
    }

    #[test]
    fn duplicates_are_collapsed() {
        let html = r#"<img src="/a.png"><img src="/a.png"><img src="https://example.com/a.png">"#;
        assert_eq!(discovery(5, &[]).discover(&base(), html).len(), 1);
    }

    #[test]
    fn extracts_css_imports() {
        let css = r#"
            @import "reset.css";
            @import url('https://fonts.example.org/font.css');
            @IMPORT url(print.css) print;
            @import url("http://insecure.test/x.css");
            @import "https://blocked.test/y.css";
            body { color: red; }
        "#;
        let sheet = Url::parse("https://example.com/css/main.css").unwrap();
        let mut found: Vec<String> = discovery(10, &["blocked.test"])
            .discover_imports(&sheet, css)
            .into_iter()
            .map(|asset| asset.url.to_string())
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                "https://example.com/css/print.css".to_string(),
                "https://example.com/css/reset.css".to_string(),
                "https://fonts.example.org/font.css".to_string(),
            ]
        );
    }

    #[test]
    fn css_imports_respect_cap() {
        let css: String = (0..10).map(|i| format!("@import \"s{i}.css\";\n")).collect();
        let sheet = Url::parse("https://example.com/main.css").unwrap();
        assert_eq!(discovery(2, &[]).discover_imports(&sheet, &css).len(), 2);
    }

    #[test]
    fn classifies_assets() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(asset_kind(&url("https://a.test/x/y.css?v=1")), Some(AssetKind::Stylesheet));
        assert_eq!(asset_kind(&url("https://a.test/y.JPEG")), Some(AssetKind::Image));
        assert_eq!(asset_kind(&url("https://a.test/app.js")), Some(AssetKind::Script));
        assert_eq!(asset_kind(&url("https://a.test/")), None);
        assert_eq!(asset_kind(&url("https://a.test/page.html")), None);
    }
}
