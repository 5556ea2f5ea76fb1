//! Does a handle belong to a target domain?
//!
//! Direct evidence (a bio link on the domain) confirms immediately. Otherwise
//! each aggregator in the bio gets a hard check (the page links back to the
//! domain or the handle), then a soft check on its extracted links, then,
//! if enabled, the permissive soft policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sociallink_common::{
    AggregatorBits, Enrichment, ProfileData, ResolveError, Result, SocialKey, VerificationResult,
};
use tracing::{debug, info, warn};

use crate::aggregator::{link_references_handle, AggregatorResolver};
use crate::normalize::{site_domain, to_canonical_host, url_on_domain};
use crate::traits::ProfileSource;

pub struct VerificationEngine {
    profiles: Arc<dyn ProfileSource>,
    aggregators: Arc<AggregatorResolver>,
    allowed: Vec<SocialKey>,
    soft_policy: bool,
    /// `(handle, domain)` → result, for the current run.
    memo: Mutex<HashMap<(String, String), VerificationResult>>,
}

impl VerificationEngine {
    pub fn new(
        profiles: Arc<dyn ProfileSource>,
        aggregators: Arc<AggregatorResolver>,
        allowed: &[SocialKey],
        soft_policy: bool,
    ) -> Result<Self> {
        if allowed.is_empty() {
            return Err(ResolveError::Config("social key allow-list is empty".to_string()));
        }
        Ok(Self {
            profiles,
            aggregators,
            allowed: allowed.to_vec(),
            soft_policy,
            memo: Mutex::new(HashMap::new()),
        })
    }

    pub fn profiles(&self) -> Arc<dyn ProfileSource> {
        Arc::clone(&self.profiles)
    }

    /// Forget memoized results. `full` also drops fetched pages and profiles.
    pub fn reset(&self, full: bool) {
        self.memo.lock().unwrap_or_else(|e| e.into_inner()).clear();
        if full {
            self.aggregators.clear_cache();
            self.profiles.clear_cache();
        }
    }

    /// Only configuration errors are returned as `Err`. A failed profile
    /// lookup, or an unconfirmed result where some aggregator could not be
    /// fetched, has `lookup_failed` set and is not memoized.
    pub async fn verify(&self, handle: &str, target_domain: &str) -> Result<VerificationResult> {
        let handle = handle.trim().trim_start_matches('@');
        let domain = site_domain(target_domain);
        if handle.is_empty() || domain.is_empty() {
            return Ok(VerificationResult::default());
        }
        let key = (handle.to_lowercase(), domain.clone());

        if let Some(hit) = self.memo.lock().unwrap_or_else(|e| e.into_inner()).get(&key).cloned() {
            debug!(handle, domain = domain.as_str(), "Verification memo hit");
            return Ok(hit);
        }

        let profile = match self.profiles.profile(handle, false).await {
            Ok(p) => p,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                info!(handle, domain = domain.as_str(), error = %e, "Profile lookup failed");
                return Ok(VerificationResult::failed());
            }
        };

        let result = self.decide(handle, &domain, &profile).await?;
        if result.lookup_failed {
            info!(handle, domain = domain.as_str(), "Aggregator lookups failed, not memoized");
            return Ok(result);
        }
        info!(
            handle,
            domain = domain.as_str(),
            confirmed = result.confirmed,
            aggregator = result.aggregator_url.as_str(),
            keys = result.enrichment.len(),
            "Verification finished"
        );
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, result.clone());
        Ok(result)
    }

    async fn decide(&self, handle: &str, domain: &str, profile: &ProfileData) -> Result<VerificationResult> {
        if profile.bio_links.is_empty() {
            return Ok(VerificationResult::unconfirmed(String::new()));
        }
        if profile.bio_links.iter().any(|l| url_on_domain(l, domain)) {
            return Ok(VerificationResult::confirmed(Enrichment::default(), String::new()));
        }

        let aggregators = self.aggregators.find_aggregators(&profile.bio_links);
        let mut unreachable = 0usize;
        for agg in &aggregators {
            match self.aggregators.verify_belongs(agg, domain, handle).await {
                Ok((true, bits)) => {
                    return Ok(VerificationResult::confirmed(self.enrich(bits, domain), agg.to_string()));
                }
                Ok((false, _)) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    info!(aggregator = *agg, error = %e, "Aggregator unavailable");
                    unreachable += 1;
                    continue;
                }
            }

            let bits = match self.aggregators.extract(agg).await {
                Ok(bits) => bits,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    info!(aggregator = *agg, error = %e, "Aggregator extraction failed");
                    unreachable += 1;
                    continue;
                }
            };

            let soft_domain = bits.urls().any(|u| url_on_domain(u, domain));
            let soft_handle = bits
                .socials
                .get(&SocialKey::Twitter)
                .is_some_and(|u| link_references_handle(u, handle));
            if soft_domain || soft_handle {
                debug!(aggregator = *agg, soft_domain, soft_handle, "Aggregator passed soft check");
                return Ok(VerificationResult::confirmed(self.enrich(bits, domain), agg.to_string()));
            }

            // The aggregator came from the bio itself, so it is listed there.
            if self.soft_policy && !bits.is_empty() {
                warn!(aggregator = *agg, handle, domain, "Aggregator accepted under soft policy");
                return Ok(VerificationResult::confirmed(self.enrich(bits, domain), agg.to_string()));
            }
        }

        let mut result = VerificationResult::unconfirmed(
            aggregators.first().map(|a| a.to_string()).unwrap_or_default(),
        );
        // An unreachable aggregator is not evidence of absence.
        result.lookup_failed = unreachable > 0;
        Ok(result)
    }

    fn enrich(&self, mut bits: AggregatorBits, domain: &str) -> Enrichment {
        if bits.website.is_none() && bits.urls().any(|u| url_on_domain(u, domain)) {
            bits.website = Some(format!("https://{domain}/"));
        }
        let mut enrichment = bits.to_enrichment(&self.allowed);
        if let Some(twitter) = enrichment.get(SocialKey::Twitter).map(to_canonical_host) {
            enrichment.insert(SocialKey::Twitter, twitter);
        }
        enrichment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPageFetcher, MockProfileSource};

    fn engine(
        profiles: Arc<MockProfileSource>,
        pages: Arc<MockPageFetcher>,
        soft_policy: bool,
    ) -> VerificationEngine {
        let aggregators = AggregatorResolver::new(
            vec!["linktr.ee".to_string()],
            &[SocialKey::Twitter, SocialKey::Github, SocialKey::Website],
            pages,
        )
        .unwrap();
        VerificationEngine::new(
            profiles,
            Arc::new(aggregators),
            &[SocialKey::Twitter, SocialKey::Github, SocialKey::Website],
            soft_policy,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn repo_path_equal_to_handle_is_not_evidence() {
        let html = r#"<a href="https://github.com/bigcorp/acme">gh</a>"#;
        let profiles = Arc::new(MockProfileSource::new().on_links("acme", &["https://linktr.ee/acme"]));
        let pages = Arc::new(MockPageFetcher::new().on_page("https://linktr.ee/acme", 200, html));
        let e = engine(profiles, pages, false);

        let r = e.verify("acme", "acme.dev").await.unwrap();
        assert!(!r.confirmed);
        assert!(r.enrichment.is_empty());
        assert!(!r.lookup_failed);
    }

    #[tokio::test]
    async fn unreachable_aggregator_is_a_failed_lookup_and_retried() {
        let profiles = Arc::new(MockProfileSource::new().on_links("acme", &["https://linktr.ee/acme"]));
        let pages = Arc::new(MockPageFetcher::new().on_page("https://linktr.ee/acme", 503, "down"));
        let e = engine(profiles, pages.clone(), true);

        let first = e.verify("acme", "acme.dev").await.unwrap();
        assert!(!first.confirmed);
        assert!(first.lookup_failed);
        assert_eq!(first.aggregator_url, "https://linktr.ee/acme");

        e.verify("acme", "acme.dev").await.unwrap();
        assert_eq!(pages.calls_for("https://linktr.ee/acme"), 2, "second call refetches");
    }

    #[tokio::test]
    async fn soft_policy_toggle() {
        let html = r#"<a href="https://github.com/someone">gh</a>"#;
        let profiles = Arc::new(MockProfileSource::new().on_links("acme", &["https://linktr.ee/acme"]));
        let pages = Arc::new(MockPageFetcher::new().on_page("https://linktr.ee/acme", 200, html));

        let strict = engine(profiles.clone(), pages.clone(), false);
        let r = strict.verify("acme", "acme.dev").await.unwrap();
        assert!(!r.confirmed);
        assert_eq!(r.aggregator_url, "https://linktr.ee/acme");

        let permissive = engine(profiles, pages, true);
        let r = permissive.verify("acme", "acme.dev").await.unwrap();
        assert!(r.confirmed);
        assert_eq!(r.enrichment.get(SocialKey::Github), Some("https://github.com/someone"));
    }

    #[tokio::test]
    async fn lookup_failure_is_flagged_and_retried() {
        let profiles = Arc::new(MockProfileSource::new().on_failure("acme"));
        let e = engine(profiles.clone(), Arc::new(MockPageFetcher::new()), true);

        let r = e.verify("acme", "acme.dev").await.unwrap();
        assert!(!r.confirmed);
        assert!(r.lookup_failed);
        e.verify("acme", "acme.dev").await.unwrap();
        assert_eq!(profiles.calls().len(), 2);
    }

    #[tokio::test]
    async fn results_are_memoized_per_handle_and_domain() {
        let profiles = Arc::new(MockProfileSource::new().on_links("acme", &["https://acme.dev"]));
        let e = engine(profiles.clone(), Arc::new(MockPageFetcher::new()), true);

        assert!(e.verify("Acme", "https://www.acme.dev/").await.unwrap().confirmed);
        assert!(e.verify("acme", "acme.dev").await.unwrap().confirmed);
        assert_eq!(profiles.calls().len(), 1);

        assert!(!e.verify("acme", "other.dev").await.unwrap().confirmed);
        assert_eq!(profiles.calls().len(), 2);

        e.reset(false);
        e.verify("acme", "acme.dev").await.unwrap();
        assert_eq!(profiles.calls().len(), 3);
    }
}
