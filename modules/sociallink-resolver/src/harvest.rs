//! Candidate harvesting and selection for one target domain.
//!
//! Candidates come from the known-socials map and from the page markup.
//! One candidate is verified inline; several race on spawned tasks under a
//! semaphore and the first confirmed result wins. Losing tasks are not
//! aborted; they finish in the background and their results are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use scraper::{Html, Selector};
use sociallink_common::{ProfileCandidate, Resolution, Result, VerificationResult};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::normalize::{force_https, handle_of, normalize_profile_url, normalize_socials, site_domain};
use crate::verify::VerificationEngine;

static BARE_PROFILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.|mobile\.)?(?:x|twitter)\.com/([A-Za-z0-9_]{1,15})")
        .expect("valid regex")
});

static PROFILE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([A-Za-z0-9_]{1,15})/?$").expect("valid regex"));

const PROFILE_HOSTS: &[&str] = &[
    "x.com",
    "www.x.com",
    "mobile.x.com",
    "twitter.com",
    "www.twitter.com",
    "mobile.twitter.com",
];

/// Keys in a known-socials map that may hold a profile.
const PROFILE_KEYS: &[&str] = &["twitter", "x"];

/// Confirmed resolutions per target domain for one run.
#[derive(Default)]
pub struct VerificationCache {
    entries: Mutex<HashMap<String, Resolution>>,
}

impl VerificationCache {
    pub fn get(&self, domain: &str) -> Option<Resolution> {
        self.lock().get(domain).cloned()
    }

    pub fn insert(&self, domain: &str, resolution: Resolution) {
        self.lock().insert(domain.to_string(), resolution);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Resolution>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Profile-shaped anchors and bare profile URLs in `html`, document order.
fn scan_html(html: &str, page_url: Option<&str>) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let base = page_url.and_then(|u| Url::parse(&force_https(u)).ok());
    {
        let doc = Html::parse_document(html);
        let anchors = Selector::parse("a[href]").expect("valid selector");
        for a in doc.select(&anchors) {
            let href = a.value().attr("href").unwrap_or_default().trim();
            let parsed = match Url::parse(&force_https(href)) {
                Ok(u) => u,
                Err(_) => match base.as_ref().and_then(|b| b.join(href).ok()) {
                    Some(u) => u,
                    None => continue,
                },
            };
            let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
            if PROFILE_HOSTS.contains(&host.as_str()) && PROFILE_PATH_RE.is_match(parsed.path()) {
                found.push(href.to_string());
            }
        }
    }

    for caps in BARE_PROFILE_RE.captures_iter(html) {
        let Some(m) = caps.get(0) else { continue };
        // A longer handle or a deeper path (status, media) is not a profile.
        let next = html[m.end()..].chars().next();
        if next.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/') {
            continue;
        }
        found.push(m.as_str().to_string());
    }
    found
}

pub struct CandidateSelector {
    engine: Arc<VerificationEngine>,
    cache: VerificationCache,
    max_parallel: usize,
}

impl CandidateSelector {
    pub fn new(engine: Arc<VerificationEngine>, max_parallel: usize) -> Self {
        Self {
            engine,
            cache: VerificationCache::default(),
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    /// Forget confirmed resolutions. `full` also clears fetched profiles,
    /// mirror pages, and aggregator pages.
    pub fn reset(&self, full: bool) {
        self.cache.clear();
        self.engine.reset(full);
    }

    /// Unique candidates, known socials first, then page order.
    pub fn harvest_candidates(
        &self,
        known: &BTreeMap<String, String>,
        html: Option<&str>,
        page_url: Option<&str>,
    ) -> Vec<ProfileCandidate> {
        let known = normalize_socials(known);
        let mut raw: Vec<String> = PROFILE_KEYS
            .iter()
            .filter_map(|k| known.get(*k))
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        if let Some(html) = html {
            raw.extend(scan_html(html, page_url));
        }

        let mut out: Vec<ProfileCandidate> = Vec::new();
        for raw_url in raw {
            let normalized_url = normalize_profile_url(&raw_url);
            if normalized_url.is_empty()
                || out
                    .iter()
                    .any(|c| c.normalized_url.eq_ignore_ascii_case(&normalized_url))
            {
                continue;
            }
            let Some(handle) = handle_of(&normalized_url) else {
                continue;
            };
            out.push(ProfileCandidate {
                raw_url,
                normalized_url,
                handle,
            });
        }
        debug!(count = out.len(), "Candidates harvested");
        out
    }

    /// The verified identity for `target_domain`, or an empty resolution.
    /// Only configuration errors are returned as `Err`.
    pub async fn select_verified(
        &self,
        target_domain: &str,
        known: &BTreeMap<String, String>,
        html: Option<&str>,
        page_url: Option<&str>,
    ) -> Result<Resolution> {
        let domain = site_domain(target_domain);
        if domain.is_empty() {
            return Ok(Resolution::default());
        }
        if let Some(hit) = self.cache.get(&domain) {
            debug!(domain = domain.as_str(), "Resolution cache hit");
            return Ok(hit);
        }

        let candidates = self.harvest_candidates(known, html, page_url);
        let winner = if candidates.len() > 1 {
            self.race(candidates, &domain).await?
        } else if let Some(c) = candidates.into_iter().next() {
            let result = self.engine.verify(&c.handle, &domain).await?;
            Some((c, result))
        } else {
            None
        };

        let Some((candidate, result)) = winner.filter(|(_, r)| r.confirmed) else {
            info!(domain = domain.as_str(), "No candidate verified");
            return Ok(Resolution::default());
        };

        let avatar_url = match self.engine.profiles().profile(&candidate.handle, true).await {
            Ok(p) => p.avatar_url,
            Err(e) => {
                warn!(handle = candidate.handle.as_str(), error = %e, "Avatar lookup failed");
                String::new()
            }
        };

        let resolution = Resolution {
            confirmed_url: candidate.normalized_url,
            enrichment: result.enrichment.to_string_map(),
            aggregator_url: result.aggregator_url,
            avatar_url,
        };
        info!(
            domain = domain.as_str(),
            url = resolution.confirmed_url.as_str(),
            keys = resolution.enrichment.len(),
            "Identity verified"
        );
        self.cache.insert(&domain, resolution.clone());
        Ok(resolution)
    }

    async fn race(
        &self,
        candidates: Vec<ProfileCandidate>,
        domain: &str,
    ) -> Result<Option<(ProfileCandidate, VerificationResult)>> {
        let permits = self.max_parallel.min(candidates.len());
        let semaphore = Arc::new(Semaphore::new(permits));
        let (tx, mut rx) = mpsc::channel(candidates.len());
        info!(domain, candidates = candidates.len(), permits, "Verifying candidates in parallel");

        for candidate in candidates {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let domain = domain.to_string();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = engine.verify(&candidate.handle, &domain).await;
                // The receiver is gone once a winner was found.
                let _ = tx.send((candidate, result)).await;
            });
        }
        drop(tx);

        while let Some((candidate, result)) = rx.recv().await {
            match result {
                Ok(r) if r.confirmed => return Ok(Some((candidate, r))),
                Ok(_) => debug!(handle = candidate.handle.as_str(), "Candidate not confirmed"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(handle = candidate.handle.as_str(), error = %e, "Candidate failed"),
            }
        }
        Ok(None)
    }
}
