//! Wiring: build every component from a `FileConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use render_client::{BrowserlessRenderer, Renderer, SubprocessRenderer};
use sociallink_common::{
    FileConfig, ProfileData, ProxyConfig, RenderBackend, ResolveError, Resolution, Result, Tweet,
};
use tracing::info;
use xapi_client::{XApiClient, DEFAULT_BEARER};

use crate::aggregator::AggregatorResolver;
use crate::avatar;
use crate::error::from_api;
use crate::fetcher::{FetcherSettings, ProfileFetcher};
use crate::guest_token::GuestTokenManager;
use crate::harvest::CandidateSelector;
use crate::http::{build_proxy, HttpPageFetcher, PageFetcher, UserAgentPool};
use crate::mirrors::MirrorSelector;
use crate::traits::{ProfileSource, XApi};
use crate::verify::VerificationEngine;

pub struct SocialLinkResolver {
    fetcher: Arc<ProfileFetcher>,
    selector: CandidateSelector,
}

impl SocialLinkResolver {
    pub fn from_config(config: &FileConfig) -> Result<Self> {
        let proxy = build_proxy(config.active_proxy().and_then(ProxyConfig::url))?;
        let pages: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new(
            config.http.timeout(),
            UserAgentPool::from_config(&config.http),
            proxy.clone(),
        )?);
        let renderer = build_renderer(config)?;

        let mut fetcher = ProfileFetcher::new(
            MirrorSelector::from_config(&config.mirrors),
            renderer,
            Arc::clone(&pages),
            UserAgentPool::from_config(&config.http),
            FetcherSettings::from_config(config),
        );
        if config.api.enabled {
            let bearer = config.api.bearer.as_deref().unwrap_or(DEFAULT_BEARER);
            let user_agent = UserAgentPool::from_config(&config.http).next();
            let client: Arc<dyn XApi> = Arc::new(
                XApiClient::new(bearer, &user_agent, config.api.timeout(), proxy).map_err(from_api)?,
            );
            let tokens = GuestTokenManager::new(
                Arc::clone(&client),
                &config.api.guest_cache_dir,
                config.api.token_ttl(),
            );
            fetcher = fetcher.with_api(client, tokens);
        }

        Self::assemble(config, Arc::new(fetcher), pages)
    }

    /// Build the verification stack over an existing fetcher.
    pub fn assemble(
        config: &FileConfig,
        fetcher: Arc<ProfileFetcher>,
        pages: Arc<dyn PageFetcher>,
    ) -> Result<Self> {
        let allowed = config.socials.allowed()?;
        let aggregators = Arc::new(AggregatorResolver::from_config(config, pages)?);
        let profiles: Arc<dyn ProfileSource> = fetcher.clone();
        let engine = Arc::new(VerificationEngine::new(
            profiles,
            aggregators,
            allowed,
            config.verification.soft_policy,
        )?);
        info!(
            keys = allowed.len(),
            soft_policy = config.verification.soft_policy,
            max_parallel = config.verification.max_parallel,
            "Resolver ready"
        );
        Ok(Self {
            fetcher,
            selector: CandidateSelector::new(engine, config.verification.max_parallel),
        })
    }

    pub fn fetcher(&self) -> &ProfileFetcher {
        &self.fetcher
    }

    pub fn selector(&self) -> &CandidateSelector {
        &self.selector
    }

    pub async fn resolve(
        &self,
        target_domain: &str,
        known: &BTreeMap<String, String>,
        html: Option<&str>,
        page_url: Option<&str>,
    ) -> Result<Resolution> {
        self.selector
            .select_verified(target_domain, known, html, page_url)
            .await
    }

    pub async fn profile(&self, handle: &str, want_avatar: bool) -> Result<ProfileData> {
        self.fetcher.fetch_profile(handle, want_avatar).await
    }

    pub async fn tweets(&self, handles: &[String], limit: usize, oldest_days: Option<u32>) -> Vec<Tweet> {
        self.fetcher.fetch_tweets_bulk(handles, limit, oldest_days).await
    }

    pub async fn download_avatar(
        &self,
        avatar_url: &str,
        profile_url: &str,
        dir: &Path,
        stem: &str,
    ) -> Option<PathBuf> {
        let pages = self.fetcher.page_fetcher();
        avatar::download_avatar(
            self.fetcher.as_ref(),
            pages.as_ref(),
            avatar_url,
            profile_url,
            dir,
            stem,
        )
        .await
    }

    /// Start a new run. `full` also drops page and profile caches.
    pub fn reset(&self, full: bool) {
        self.selector.reset(full);
    }
}

fn build_renderer(config: &FileConfig) -> Result<Arc<dyn Renderer>> {
    match config.render.backend {
        RenderBackend::Subprocess => Ok(Arc::new(SubprocessRenderer::new(
            &config.render.command,
            config.render.args.clone(),
        ))),
        RenderBackend::Browserless => {
            let url = config
                .render
                .browserless_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    ResolveError::Config("render.browserless_url is required".to_string())
                })?;
            let renderer = BrowserlessRenderer::new(url, config.render.browserless_token.as_deref())
                .map_err(|e| ResolveError::Config(format!("browserless renderer: {e}")))?;
            Ok(Arc::new(renderer))
        }
    }
}
