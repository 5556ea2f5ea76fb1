//! Multi-tier profile fetcher.
//!
//! Tiers run in order and the first sufficient answer wins:
//! 1. structured API (guest token, one forced refresh on auth failure)
//! 2. mirror network (rendered mirror pages, blocked mirrors banned)
//! 3. browser render of the canonical host
//!
//! Partial answers are kept and merged so a later tier only fills gaps.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use render_client::{RenderOptions, RenderResult, Renderer, WaitUntil};
use sociallink_common::{FileConfig, ProfileData, ProxyConfig, ResolveError, Result, Tweet};
use tracing::{debug, info, warn};

use crate::error::{from_api, from_render};
use crate::guest_token::GuestTokenManager;
use crate::http::{PageFetcher, UserAgentPool};
use crate::markup;
use crate::mirrors::MirrorSelector;
use crate::normalize::{
    extract_urls_from_text, force_https, host_of, is_valid_handle, normalize_avatar_url,
    strip_query_params, CANONICAL_HOST,
};
use crate::traits::{ProfileSource, XApi};

const SHORTENER_HOSTS: &[&str] = &[
    "t.co",
    "bit.ly",
    "tinyurl.com",
    "ow.ly",
    "buff.ly",
    "t.ly",
    "shorturl.at",
];

/// Mirror responses with these statuses mean the mirror is refusing us.
const BLOCK_STATUSES: &[u16] = &[0, 403, 429, 503];

pub fn is_short_link(url: &str) -> bool {
    SHORTENER_HOSTS.contains(&host_of(url).as_str())
}

fn strip_link_tracking(url: &str) -> String {
    strip_query_params(url, |k| {
        k.starts_with("utm_") || matches!(k, "ref" | "source" | "s")
    })
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub mirrors_enabled: bool,
    pub max_mirrors: usize,
    pub mirror_timeout: Duration,
    pub render_timeout: Duration,
    pub tweet_count_floor: u32,
    pub expand_short_links: bool,
    /// Proxy descriptor handed to the render boundary.
    pub render_proxy: Option<serde_json::Value>,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            mirrors_enabled: true,
            max_mirrors: 3,
            mirror_timeout: Duration::from_secs(20),
            render_timeout: Duration::from_secs(30),
            tweet_count_floor: 50,
            expand_short_links: true,
            render_proxy: None,
        }
    }
}

impl FetcherSettings {
    pub fn from_config(config: &FileConfig) -> Self {
        Self {
            mirrors_enabled: config.mirrors.enabled,
            max_mirrors: config.mirrors.max_per_request.max(1),
            mirror_timeout: config.mirrors.timeout(),
            render_timeout: config.render.timeout(),
            tweet_count_floor: config.api.tweet_count_floor,
            expand_short_links: config.http.expand_short_links,
            render_proxy: config.active_proxy().and_then(ProxyConfig::render_json),
        }
    }
}

struct ApiTier {
    client: Arc<dyn XApi>,
    tokens: GuestTokenManager,
}

impl ApiTier {
    /// Run `call` with a guest token; on an auth rejection force one token
    /// refresh and retry once. A second rejection is a network failure.
    async fn with_token<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = xapi_client::Result<T>>,
    {
        let token = self
            .tokens
            .get(false)
            .await
            .ok_or_else(|| ResolveError::Network("no guest token".to_string()))?;

        match call(token).await.map_err(from_api) {
            Err(ResolveError::Auth { status }) => {
                info!(status, "API rejected guest token, refreshing once");
                let token = self
                    .tokens
                    .get(true)
                    .await
                    .ok_or_else(|| ResolveError::Network("no guest token".to_string()))?;
                call(token).await.map_err(from_api).map_err(|e| match e {
                    ResolveError::Auth { status } => {
                        ResolveError::Network(format!("API auth rejected after refresh ({status})"))
                    }
                    other => other,
                })
            }
            other => other,
        }
    }

    async fn user(&self, handle: &str) -> Result<xapi_client::UserResult> {
        self.with_token(|token| {
            let client = Arc::clone(&self.client);
            let handle = handle.to_string();
            async move { client.user_by_screen_name(&handle, &token).await }
        })
        .await
    }
}

/// What a mirror answer means for the mirror.
enum MirrorVerdict {
    Page,
    Ban(&'static str),
    Skip(&'static str),
}

fn judge_mirror(result: &RenderResult, handle: &str) -> MirrorVerdict {
    if BLOCK_STATUSES.contains(&result.status) {
        return MirrorVerdict::Ban("blocking status");
    }
    if result.blocked() {
        return MirrorVerdict::Ban("anti-bot flagged");
    }
    if !(200..300).contains(&result.status) {
        return MirrorVerdict::Skip("non-success status");
    }
    if result.html.trim().is_empty() {
        return MirrorVerdict::Ban("empty page");
    }
    if markup::looks_antibot(&result.html) {
        return MirrorVerdict::Ban("challenge page");
    }
    if !markup::html_matches_handle(&result.html, handle) {
        return MirrorVerdict::Ban("page does not match handle");
    }
    MirrorVerdict::Page
}

pub struct ProfileFetcher {
    api: Option<ApiTier>,
    mirrors: MirrorSelector,
    renderer: Arc<dyn Renderer>,
    pages: Arc<dyn PageFetcher>,
    agents: UserAgentPool,
    settings: FetcherSettings,
    profiles: Mutex<HashMap<String, ProfileData>>,
    /// `instance|handle` → page markup, for this run.
    mirror_html: Mutex<HashMap<String, String>>,
}

impl ProfileFetcher {
    pub fn new(
        mirrors: MirrorSelector,
        renderer: Arc<dyn Renderer>,
        pages: Arc<dyn PageFetcher>,
        agents: UserAgentPool,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            api: None,
            mirrors,
            renderer,
            pages,
            agents,
            settings,
            profiles: Mutex::new(HashMap::new()),
            mirror_html: Mutex::new(HashMap::new()),
        }
    }

    /// Enable the structured-API tier.
    pub fn with_api(mut self, client: Arc<dyn XApi>, tokens: GuestTokenManager) -> Self {
        self.api = Some(ApiTier { client, tokens });
        self
    }

    pub fn page_fetcher(&self) -> Arc<dyn PageFetcher> {
        Arc::clone(&self.pages)
    }

    pub fn mirrors(&self) -> &MirrorSelector {
        &self.mirrors
    }

    /// Drop the per-run profile and mirror page caches.
    pub fn clear_caches(&self) {
        lock(&self.profiles).clear();
        lock(&self.mirror_html).clear();
    }

    /// Profile for `handle`. `Ok` with an empty profile is a confirmed
    /// absence; `Err` means every tier failed.
    pub async fn fetch_profile(&self, handle: &str, want_avatar: bool) -> Result<ProfileData> {
        let handle = handle.trim().trim_start_matches('@');
        if !is_valid_handle(handle) {
            return Err(ResolveError::Parse(format!("invalid handle: {handle:?}")));
        }
        let key = handle.to_lowercase();

        let cached = lock(&self.profiles).get(&key).cloned();
        if let Some(cached) = &cached {
            if !want_avatar || !cached.avatar_url.is_empty() {
                debug!(handle, "Profile served from run cache");
                return Ok(cached.clone());
            }
        }

        let mut best = cached.unwrap_or_default();
        let mut answered = false;
        let mut last_err: Option<ResolveError> = None;

        if let Some(api) = &self.api {
            match self.api_profile(api, handle).await {
                Ok(p) => {
                    info!(handle, tier = "api", links = p.bio_links.len(), "Profile fetched");
                    answered = true;
                    best.absorb(p);
                }
                Err(e) => {
                    info!(handle, tier = "api", error = %e, "Tier failed");
                    last_err = Some(e);
                }
            }
        }

        if !best.is_sufficient(want_avatar) {
            match self.mirror_profile(handle).await {
                Ok(p) => {
                    info!(handle, tier = "mirror", links = p.bio_links.len(), "Profile fetched");
                    answered = true;
                    best.absorb(p);
                }
                Err(e) => {
                    info!(handle, tier = "mirror", error = %e, "Tier failed");
                    last_err = Some(e);
                }
            }
        }

        if !best.is_sufficient(want_avatar) {
            match self.browser_profile(handle, want_avatar).await {
                Ok(p) => {
                    info!(handle, tier = "browser", links = p.bio_links.len(), "Profile fetched");
                    answered = true;
                    best.absorb(p);
                }
                Err(e) => {
                    info!(handle, tier = "browser", error = %e, "Tier failed");
                    last_err = Some(e);
                }
            }
        }

        if !answered {
            return Err(last_err
                .unwrap_or_else(|| ResolveError::Network("no fetch tier available".to_string())));
        }

        if self.settings.expand_short_links {
            best.bio_links = self.expand_short_links(std::mem::take(&mut best.bio_links)).await;
        }
        lock(&self.profiles).insert(key, best.clone());
        Ok(best)
    }

    async fn api_profile(&self, api: &ApiTier, handle: &str) -> Result<ProfileData> {
        let user = api.user(handle).await?;
        let legacy = user.legacy;

        let mut profile = ProfileData::default();
        for url in legacy.bio_urls() {
            profile.add_link(force_https(&url).trim_end_matches('/'));
        }
        for url in extract_urls_from_text(&legacy.description) {
            profile.add_link(url);
        }
        profile.avatar_url = legacy
            .profile_image_url_https
            .as_deref()
            .map(normalize_avatar_url)
            .unwrap_or_default();
        profile.display_name = legacy.name.trim().to_string();
        Ok(profile)
    }

    async fn mirror_profile(&self, handle: &str) -> Result<ProfileData> {
        let (base, html) = self.mirror_page(handle).await?;
        Ok(markup::parse_mirror_profile(&html, &base, handle))
    }

    /// First sampled mirror that serves a genuine page for `handle`.
    async fn mirror_page(&self, handle: &str) -> Result<(String, String)> {
        if !self.settings.mirrors_enabled || self.mirrors.is_empty() {
            return Err(ResolveError::Network("mirror tier disabled".to_string()));
        }
        let instances = self.mirrors.sample(self.settings.max_mirrors);
        if instances.is_empty() {
            return Err(ResolveError::Network("no alive mirrors".to_string()));
        }

        for base in instances {
            let cache_key = format!("{base}|{}", handle.to_lowercase());
            if let Some(html) = lock(&self.mirror_html).get(&cache_key).cloned() {
                return Ok((base, html));
            }

            let url = format!("{base}/{handle}");
            let options = self.render_options(self.settings.mirror_timeout, WaitUntil::DomContentLoaded);
            let result = match self.renderer.render(&url, &options).await {
                Ok(r) => r,
                Err(e) => {
                    // No usable envelope counts as status 0.
                    warn!(instance = base.as_str(), handle, error = %from_render(e), "Mirror render failed");
                    self.mirrors.ban(&base);
                    continue;
                }
            };

            match judge_mirror(&result, handle) {
                MirrorVerdict::Page => {
                    debug!(instance = base.as_str(), handle, bytes = result.html.len(), "Mirror page accepted");
                    lock(&self.mirror_html).insert(cache_key, result.html.clone());
                    return Ok((base, result.html));
                }
                MirrorVerdict::Ban(reason) => {
                    info!(instance = base.as_str(), handle, status = result.status, reason, "Mirror refused request");
                    self.mirrors.ban(&base);
                }
                MirrorVerdict::Skip(reason) => {
                    info!(instance = base.as_str(), handle, status = result.status, reason, "Mirror page unusable");
                }
            }
        }
        Err(ResolveError::Network("all sampled mirrors failed".to_string()))
    }

    async fn browser_profile(&self, handle: &str, want_avatar: bool) -> Result<ProfileData> {
        let url = format!("https://{CANONICAL_HOST}/{handle}");
        let html = self.render_canonical(&url, WaitUntil::DomContentLoaded).await?;
        let mut profile = markup::parse_x_profile(&html, &url);

        if want_avatar && profile.avatar_url.is_empty() {
            let photo_url = format!("{url}/photo");
            match self.render_canonical(&photo_url, WaitUntil::DomContentLoaded).await {
                Ok(photo) => profile.avatar_url = markup::parse_x_profile(&photo, &url).avatar_url,
                Err(e) => debug!(handle, error = %e, "Avatar photo page unavailable"),
            }
        }
        Ok(profile)
    }

    async fn render_canonical(&self, url: &str, wait: WaitUntil) -> Result<String> {
        let options = self.render_options(self.settings.render_timeout, wait);
        let result = self.renderer.render(url, &options).await.map_err(from_render)?;
        if result.blocked() {
            return Err(ResolveError::Network(format!(
                "anti-bot page ({}) at {url}",
                result.anti_bot.kind
            )));
        }
        if !(200..300).contains(&result.status) || result.html.trim().is_empty() {
            return Err(ResolveError::Network(format!(
                "render status {} at {url}",
                result.status
            )));
        }
        Ok(result.html)
    }

    fn render_options(&self, timeout: Duration, wait: WaitUntil) -> RenderOptions {
        RenderOptions {
            wait,
            timeout,
            user_agent: Some(self.agents.next()),
            proxy: self.settings.render_proxy.clone(),
            cookies: None,
        }
    }

    /// Resolve shortener links by following redirects. Shortener links that
    /// do not resolve elsewhere are dropped; other links pass through.
    pub async fn expand_short_links(&self, links: Vec<String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for link in links {
            let resolved = if is_short_link(&link) {
                match self.pages.get(&link, &[]).await {
                    Ok(page) if !page.url.is_empty() && !is_short_link(&page.url) => {
                        let target = strip_link_tracking(&force_https(&page.url));
                        Some(target.trim_end_matches('/').to_string())
                    }
                    Ok(_) => {
                        debug!(link = link.as_str(), "Short link did not resolve");
                        None
                    }
                    Err(e) => {
                        debug!(link = link.as_str(), error = %e, "Short link expansion failed");
                        None
                    }
                }
            } else {
                Some(link)
            };
            if let Some(url) = resolved {
                if !url.is_empty() && !out.contains(&url) {
                    out.push(url);
                }
            }
        }
        out
    }

    /// Recent posts for `handle`, newest first as the source lists them.
    /// `oldest_days` drops dated posts older than that; undated posts stay.
    pub async fn fetch_tweets(
        &self,
        handle: &str,
        limit: usize,
        oldest_days: Option<u32>,
    ) -> Result<Vec<Tweet>> {
        let handle = handle.trim().trim_start_matches('@');
        if !is_valid_handle(handle) {
            return Err(ResolveError::Parse(format!("invalid handle: {handle:?}")));
        }
        let limit = limit.max(1);
        let mut last_err: Option<ResolveError> = None;
        let mut answered = false;

        if let Some(api) = &self.api {
            match self.api_tweets(api, handle, limit).await {
                Ok(tweets) if !tweets.is_empty() => {
                    info!(handle, tier = "api", count = tweets.len(), "Tweets fetched");
                    return Ok(finish_tweets(tweets, limit, oldest_days));
                }
                Ok(_) => answered = true,
                Err(e) => {
                    info!(handle, tier = "api", error = %e, "Tier failed");
                    last_err = Some(e);
                }
            }
        }

        match self.mirror_page(handle).await {
            Ok((base, html)) => {
                let tweets = markup::parse_mirror_tweets(&html, &base, handle, limit);
                if !tweets.is_empty() {
                    info!(handle, tier = "mirror", count = tweets.len(), "Tweets fetched");
                    return Ok(finish_tweets(tweets, limit, oldest_days));
                }
                answered = true;
            }
            Err(e) => {
                info!(handle, tier = "mirror", error = %e, "Tier failed");
                last_err = Some(e);
            }
        }

        let url = format!("https://{CANONICAL_HOST}/{handle}");
        match self.render_canonical(&url, WaitUntil::NetworkIdle).await {
            Ok(html) => {
                let tweets = markup::parse_x_tweets(&html, handle, limit);
                info!(handle, tier = "browser", count = tweets.len(), "Tweets fetched");
                Ok(finish_tweets(tweets, limit, oldest_days))
            }
            Err(_) if answered => Ok(Vec::new()),
            Err(e) => {
                info!(handle, tier = "browser", error = %e, "Tier failed");
                Err(last_err.unwrap_or(e))
            }
        }
    }

    async fn api_tweets(&self, api: &ApiTier, handle: &str, limit: usize) -> Result<Vec<Tweet>> {
        let user = api.user(handle).await?;
        let user_id = user
            .rest_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ResolveError::Parse("user has no rest_id".to_string()))?;

        let wanted = u32::try_from(limit.saturating_mul(5)).unwrap_or(u32::MAX);
        let count = self.settings.tweet_count_floor.max(wanted);
        let timeline = api
            .with_token(|token| {
                let client = Arc::clone(&api.client);
                let user_id = user_id.clone();
                async move { client.user_tweets(&user_id, count, limit, &token).await }
            })
            .await?;

        Ok(timeline
            .into_iter()
            .map(|t| {
                let datetime = t.created_at_rfc3339();
                Tweet::new(handle, &t.id, datetime, t.text, t.media)
            })
            .collect())
    }

    /// Tweets for several handles, merged newest first and deduped by
    /// `(handle, id)`. Handles that fail are logged and skipped.
    pub async fn fetch_tweets_bulk(
        &self,
        handles: &[String],
        limit: usize,
        oldest_days: Option<u32>,
    ) -> Vec<Tweet> {
        let results = join_all(
            handles
                .iter()
                .map(|h| async move { (h, self.fetch_tweets(h, limit, oldest_days).await) }),
        )
        .await;

        let mut merged: Vec<Tweet> = Vec::new();
        for (handle, result) in results {
            match result {
                Ok(tweets) => merged.extend(tweets),
                Err(e) => warn!(handle = handle.as_str(), error = %e, "Tweet fetch failed"),
            }
        }

        merged.sort_by(|a, b| b.parsed_datetime().cmp(&a.parsed_datetime()));
        let mut seen: HashSet<(String, String)> = HashSet::new();
        merged.retain(|t| seen.insert((t.handle.to_lowercase(), t.id.clone())));
        merged
    }
}

fn finish_tweets(mut tweets: Vec<Tweet>, limit: usize, oldest_days: Option<u32>) -> Vec<Tweet> {
    if let Some(days) = oldest_days {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        tweets.retain(|t| t.parsed_datetime()
                .map_or(true, |dt| dt.with_timezone(&Utc) >= cutoff));
    }
    tweets.truncate(limit);
    tweets
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ProfileSource for ProfileFetcher {
    async fn profile(&self, handle: &str, want_avatar: bool) -> Result<ProfileData> {
        self.fetch_profile(handle, want_avatar).await
    }

    fn clear_cache(&self) {
        self.clear_caches();
    }
}
