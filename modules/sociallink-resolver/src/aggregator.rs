//! Link-in-bio aggregator pages: detection, social-link extraction, and the
//! ownership check used by verification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use scraper::{Html, Selector};
use sociallink_common::{AggregatorBits, FileConfig, ResolveError, Result, SocialKey};
use tracing::{debug, info};
use url::Url;

use crate::http::PageFetcher;
use crate::normalize::{
    coerce_url, domain_matches, force_https, handle_of, host_of, normalize_profile_url,
    url_on_domain,
};

/// Networks without an enrichment key. Links to them are neither socials
/// nor website candidates.
const OTHER_NETWORK_HOSTS: &[&str] = &[
    "instagram.com",
    "facebook.com",
    "fb.com",
    "tiktok.com",
    "threads.net",
    "twitch.tv",
    "spotify.com",
    "open.spotify.com",
    "soundcloud.com",
    "patreon.com",
    "pinterest.com",
    "snapchat.com",
    "whatsapp.com",
    "wa.me",
    "apps.apple.com",
    "play.google.com",
];

/// Anchors and fallback site link from one aggregator page.
#[derive(Debug, Clone, Default)]
struct AggregatorPage {
    url: String,
    /// Absolute https outbound links, document order, unique.
    links: Vec<String>,
    /// `link[rel=canonical]` or `og:url`.
    declared_site: Option<String>,
    /// Lower-cased raw markup, for the weak handle check.
    text: String,
}

fn parse_page(html: &str, page_url: &str) -> AggregatorPage {
    let doc = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let anchors = Selector::parse("a[href]").expect("valid selector");
    let declared = Selector::parse("link[rel='canonical'][href], meta[property='og:url'][content]")
        .expect("valid selector");

    let mut links: Vec<String> = Vec::new();
    for a in doc.select(&anchors) {
        let href = a.value().attr("href").unwrap_or_default().trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let resolved = match Url::parse(&force_https(href)) {
            Ok(u) => u,
            Err(_) => match base.as_ref().and_then(|b| b.join(href).ok()) {
                Some(u) => u,
                None => continue,
            },
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let link = force_https(resolved.as_str());
        if !links.contains(&link) {
            links.push(link);
        }
    }

    let declared_site = doc
        .select(&declared)
        .filter_map(|el| el.value().attr("href").or_else(|| el.value().attr("content")))
        .map(|u| force_https(&coerce_url(u)))
        .find(|u| u.starts_with("https://"));

    AggregatorPage {
        url: page_url.to_string(),
        links,
        declared_site,
        text: html.to_lowercase(),
    }
}

/// `https://host/path` formatted by the URL parser, so a bare host gains its
/// trailing slash.
fn output_url(link: &str) -> Option<String> {
    Url::parse(&force_https(link)).ok().map(|u| u.to_string())
}

/// True when `url` is a profile or status URL for `handle`.
pub fn link_references_handle(url: &str, handle: &str) -> bool {
    handle_of(url).is_some_and(|h| h.eq_ignore_ascii_case(handle))
}

fn text_references_handle(text: &str, handle: &str) -> bool {
    let pattern = format!(
        r"(?i)(?:x|twitter)\.com/{}(?:[^A-Za-z0-9_]|$)",
        regex::escape(handle)
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(text))
}

pub struct AggregatorResolver {
    domains: Vec<String>,
    allowed: Vec<SocialKey>,
    pages: Arc<dyn PageFetcher>,
    cache: Mutex<HashMap<String, Arc<AggregatorPage>>>,
}

impl AggregatorResolver {
    /// Both allow-lists must be non-empty.
    pub fn new(domains: Vec<String>, allowed: &[SocialKey], pages: Arc<dyn PageFetcher>) -> Result<Self> {
        let mut normalized: Vec<String> = Vec::new();
        for d in domains {
            let d = d.trim().trim_matches('.').to_ascii_lowercase();
            let d = d.strip_prefix("www.").unwrap_or(&d).to_string();
            if !d.is_empty() && !normalized.contains(&d) {
                normalized.push(d);
            }
        }
        if normalized.is_empty() {
            return Err(ResolveError::Config(
                "aggregator domain allow-list is empty".to_string(),
            ));
        }
        if allowed.is_empty() {
            return Err(ResolveError::Config("social key allow-list is empty".to_string()));
        }
        Ok(Self {
            domains: normalized,
            allowed: allowed.to_vec(),
            pages,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &FileConfig, pages: Arc<dyn PageFetcher>) -> Result<Self> {
        Self::new(
            config.aggregators.normalized_domains()?,
            config.socials.allowed()?,
            pages,
        )
    }

    pub fn is_aggregator(&self, url: &str) -> bool {
        let host = host_of(url);
        self.domains.iter().any(|d| domain_matches(&host, d))
    }

    /// Aggregator links among `links`, in order.
    pub fn find_aggregators<'a>(&self, links: &'a [String]) -> Vec<&'a str> {
        links
            .iter()
            .filter(|l| self.is_aggregator(l))
            .map(String::as_str)
            .collect()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    async fn page(&self, url: &str) -> Result<Arc<AggregatorPage>> {
        let url = force_https(&coerce_url(url));
        let key = url.trim_end_matches('/').to_string();
        if let Some(page) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key).cloned() {
            return Ok(page);
        }

        let html = self.pages.get(&url, &[]).await?.into_html()?;
        let page = Arc::new(parse_page(&html, &url));
        debug!(url = url.as_str(), links = page.links.len(), "Aggregator page fetched");
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&page));
        Ok(page)
    }

    /// Social links and best-guess website from an aggregator page.
    pub async fn extract(&self, url: &str) -> Result<AggregatorBits> {
        let page = self.page(url).await?;
        Ok(self.bits_from(&page))
    }

    /// True when the page links to `target_domain` or to `handle`'s
    /// profile (raw markup as a weaker fallback). Bits are empty on false.
    pub async fn verify_belongs(
        &self,
        aggregator_url: &str,
        target_domain: &str,
        handle: &str,
    ) -> Result<(bool, AggregatorBits)> {
        let page = self.page(aggregator_url).await?;

        let on_domain = page.links.iter().any(|l| url_on_domain(l, target_domain));
        let names_handle = page.links.iter().any(|l| link_references_handle(l, handle))
            || text_references_handle(&page.text, handle);

        if on_domain || names_handle {
            info!(
                aggregator = page.url.as_str(),
                domain = target_domain,
                handle,
                on_domain,
                names_handle,
                "Aggregator belongs to identity"
            );
            return Ok((true, self.bits_from(&page)));
        }
        Ok((false, AggregatorBits::default()))
    }

    fn bits_from(&self, page: &AggregatorPage) -> AggregatorBits {
        let self_host = host_of(&page.url);
        let mut bits = AggregatorBits::default();

        for link in &page.links {
            let host = host_of(link);
            if host.is_empty() || domain_matches(&host, &self_host) || self.is_aggregator(link) {
                continue;
            }
            match SocialKey::from_host(&host) {
                Some(key) => {
                    if !self.allowed.contains(&key) || bits.socials.contains_key(&key) {
                        continue;
                    }
                    let value = if key == SocialKey::Twitter {
                        Some(normalize_profile_url(link)).filter(|u| !u.is_empty())
                    } else {
                        output_url(link)
                    };
                    if let Some(value) = value {
                        bits.socials.insert(key, value);
                    }
                }
                None => {
                    if bits.website.is_none() && !is_other_network(&host) {
                        bits.website = output_url(link);
                    }
                }
            }
        }

        if bits.website.is_none() {
            bits.website = page
                .declared_site
                .as_deref()
                .filter(|u| {
                    let host = host_of(u);
                    !host.is_empty()
                        && !domain_matches(&host, &self_host)
                        && !self.is_aggregator(u)
                        && SocialKey::from_host(&host).is_none()
                        && !is_other_network(&host)
                })
                .and_then(output_url);
        }
        bits
    }
}

fn is_other_network(host: &str) -> bool {
    OTHER_NETWORK_HOSTS.iter().any(|d| domain_matches(host, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPageFetcher;

    const LINKTREE: &str = r#"
        <html><head><meta property="og:url" content="https://linktr.ee/foo"></head><body>
          <a href="/s/about">About Linktree</a>
          <a href="https://twitter.com/foo?lang=en">Twitter</a>
          <a href="https://www.instagram.com/foo">Instagram</a>
          <a href="http://foo.com">Website</a>
          <a href="https://shop.example.org/foo">Shop</a>
          <a href="https://github.com/foo-org">GitHub</a>
          <a href="https://discord.gg/abc">Discord</a>
          <a href="mailto:hi@foo.com">Mail</a>
        </body></html>
    "#;

    fn resolver(pages: Arc<MockPageFetcher>) -> AggregatorResolver {
        AggregatorResolver::new(
            vec!["Linktr.ee".to_string(), "www.beacons.ai".to_string()],
            &[SocialKey::Twitter, SocialKey::Github, SocialKey::Website],
            pages,
        )
        .unwrap()
    }

    #[test]
    fn empty_allow_lists_are_config_errors() {
        let pages = Arc::new(MockPageFetcher::new());
        let err = AggregatorResolver::new(vec![" ".to_string()], &[SocialKey::Twitter], pages.clone())
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(AggregatorResolver::new(vec!["linktr.ee".to_string()], &[], pages).is_err());
    }

    #[test]
    fn aggregator_detection_uses_label_boundaries() {
        let r = resolver(Arc::new(MockPageFetcher::new()));
        assert!(r.is_aggregator("https://linktr.ee/foo"));
        assert!(r.is_aggregator("https://www.linktr.ee/foo"));
        assert!(r.is_aggregator("beacons.ai/foo"));
        assert!(!r.is_aggregator("https://notlinktr.ee/foo"));
        let links = vec!["https://foo.com".to_string(), "https://linktr.ee/foo".to_string()];
        assert_eq!(r.find_aggregators(&links), vec!["https://linktr.ee/foo"]);
    }

    #[tokio::test]
    async fn extract_classifies_and_picks_first_website() {
        let pages = Arc::new(MockPageFetcher::new().on_page("https://linktr.ee/foo", 200, LINKTREE));
        let r = resolver(pages.clone());
        let bits = r.extract("linktr.ee/foo").await.unwrap();

        assert_eq!(bits.socials.get(&SocialKey::Twitter).map(String::as_str), Some("https://x.com/foo"));
        assert_eq!(bits.socials.get(&SocialKey::Github).map(String::as_str), Some("https://github.com/foo-org"));
        assert!(!bits.socials.contains_key(&SocialKey::Discord));
        assert_eq!(bits.website.as_deref(), Some("https://foo.com/"));

        r.extract("https://linktr.ee/foo/").await.unwrap();
        assert_eq!(pages.calls_for("https://linktr.ee/foo"), 1);
    }

    #[tokio::test]
    async fn declared_site_is_fallback_only_when_external() {
        let html = r#"<link rel="canonical" href="https://acme.io/"><a href="https://github.com/acme">gh</a>"#;
        let pages = Arc::new(MockPageFetcher::new().on_page("https://beacons.ai/acme", 200, html));
        let r = resolver(pages);
        let bits = r.extract("https://beacons.ai/acme").await.unwrap();
        assert_eq!(bits.website.as_deref(), Some("https://acme.io/"));

        let pages = Arc::new(MockPageFetcher::new().on_page("https://linktr.ee/x", 200, r#"<meta property="og:url" content="https://linktr.ee/x">"#));
        let bits = resolver(pages).extract("https://linktr.ee/x").await.unwrap();
        assert!(bits.is_empty());
    }

    #[tokio::test]
    async fn verify_belongs_by_domain_handle_or_text() {
        let pages = Arc::new(
            MockPageFetcher::new()
                .on_page("https://linktr.ee/foo", 200, LINKTREE)
                .on_page("https://linktr.ee/text", 200, "<p>follow x.com/Foo_Bar for news</p>")
                .on_page("https://linktr.ee/other", 200, r#"<a href="https://elsewhere.net">e</a>"#),
        );
        let r = resolver(pages);

        let (ok, bits) = r.verify_belongs("https://linktr.ee/foo", "foo.com", "nobody").await.unwrap();
        assert!(ok);
        assert!(!bits.is_empty());

        let (ok, _) = r.verify_belongs("https://linktr.ee/foo", "unrelated.io", "foo").await.unwrap();
        assert!(ok);

        let (ok, _) = r.verify_belongs("https://linktr.ee/text", "unrelated.io", "foo_bar").await.unwrap();
        assert!(ok);
        let (ok, _) = r.verify_belongs("https://linktr.ee/text", "unrelated.io", "foo").await.unwrap();
        assert!(!ok);

        let (ok, bits) = r.verify_belongs("https://linktr.ee/other", "foo.com", "foo").await.unwrap();
        assert!(!ok);
        assert!(bits.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let pages = Arc::new(MockPageFetcher::new().on_page("https://linktr.ee/down", 503, "busy"));
        let r = resolver(pages.clone());
        assert!(r.extract("https://linktr.ee/down").await.is_err());
        assert!(r.extract("https://linktr.ee/down").await.is_err());
        assert_eq!(pages.calls_for("https://linktr.ee/down"), 2);
    }
}
