use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sociallink_common::config::HttpConfig;
use sociallink_common::{ResolveError, Result, UaStrategy};
use tracing::debug;

/// Used when no user agents are configured.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// One HTTP response, redirects already followed.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body text, or a network error for non-2xx responses.
    pub fn into_html(self) -> Result<String> {
        if !self.is_success() {
            return Err(ResolveError::Network(format!(
                "HTTP {} from {}",
                self.status, self.url
            )));
        }
        Ok(self.text())
    }
}

/// Plain GET with redirects. Any HTTP status is `Ok`; only transport
/// failures are errors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchedPage>;
}

/// Picks a user agent per request from the configured pool.
pub struct UserAgentPool {
    agents: Vec<String>,
    strategy: UaStrategy,
    cursor: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>, strategy: UaStrategy) -> Self {
        let agents: Vec<String> = agents
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        Self {
            agents,
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(config.user_agents.clone(), config.ua_strategy)
    }

    pub fn next(&self) -> String {
        if self.agents.is_empty() {
            return DEFAULT_USER_AGENT.to_string();
        }
        let idx = match self.strategy {
            UaStrategy::Single => 0,
            UaStrategy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len(),
            UaStrategy::Random => rand::rng().random_range(0..self.agents.len()),
        };
        self.agents[idx].clone()
    }
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
    agents: UserAgentPool,
}

impl HttpPageFetcher {
    pub fn new(
        timeout: Duration,
        agents: UserAgentPool,
        proxy: Option<reqwest::Proxy>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            client: builder.build()?,
            agents,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchedPage> {
        let mut req = self
            .client
            .get(url)
            .header("User-Agent", self.agents.next())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            );
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.bytes().await?.to_vec();

        debug!(url, final_url = final_url.as_str(), status, bytes = body.len(), "GET");
        Ok(FetchedPage {
            url: final_url,
            status,
            content_type,
            body,
        })
    }
}

/// Build the outbound proxy from a configured URL. A malformed URL is a
/// config error.
pub fn build_proxy(url: Option<String>) -> Result<Option<reqwest::Proxy>> {
    url.map(|u| {
        reqwest::Proxy::all(&u).map_err(|e| ResolveError::Config(format!("invalid proxy: {e}")))
    })
    .transpose()
}
