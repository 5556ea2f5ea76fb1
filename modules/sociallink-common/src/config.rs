use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ResolveError;
use crate::types::SocialKey;

const MIN_BAN_TTL: Duration = Duration::from_secs(60);
const MAX_BAN_TTL: Duration = Duration::from_secs(86_400);

/// Mirror bans last between a minute and a day.
pub fn clamp_ban_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_BAN_TTL, MAX_BAN_TTL)
}

/// TOML-backed configuration loaded from disk.
/// Secrets (bearer, proxy password, browserless token) may come from env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub socials: SocialsConfig,
    pub aggregators: AggregatorsConfig,
    pub mirrors: MirrorsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocialsConfig {
    pub keys: Vec<SocialKey>,
}

impl SocialsConfig {
    /// The allow-list, or a config error when it is empty.
    pub fn allowed(&self) -> std::result::Result<&[SocialKey], ResolveError> {
        if self.keys.is_empty() {
            return Err(ResolveError::Config("socials.keys is empty".to_string()));
        }
        Ok(&self.keys)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorsConfig {
    pub domains: Vec<String>,
}

impl AggregatorsConfig {
    /// Lower-cased, `www.`-stripped domains. Empty is a config error.
    pub fn normalized_domains(&self) -> std::result::Result<Vec<String>, ResolveError> {
        let mut out: Vec<String> = Vec::new();
        for d in &self.domains {
            let d = d.trim().to_lowercase();
            let d = d.strip_prefix("www.").unwrap_or(&d).trim_matches('.').to_string();
            if !d.is_empty() && !out.contains(&d) {
                out.push(d);
            }
        }
        if out.is_empty() {
            return Err(ResolveError::Config(
                "aggregators.domains must not be empty".to_string(),
            ));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStrategy {
    #[default]
    Random,
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default = "default_ban_ttl_secs")]
    pub ban_ttl_secs: u64,
    #[serde(default = "default_max_per_request")]
    pub max_per_request: usize,
    #[serde(default)]
    pub strategy: MirrorStrategy,
    #[serde(default = "default_mirror_timeout_secs")]
    pub timeout_secs: u64,
}

impl MirrorsConfig {
    /// Ban duration clamped to the 60 s floor and one-day ceiling.
    pub fn ban_ttl(&self) -> Duration {
        clamp_ban_ttl(Duration::from_secs(self.ban_ttl_secs))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for MirrorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instances: Vec::new(),
            ban_ttl_secs: default_ban_ttl_secs(),
            max_per_request: default_max_per_request(),
            strategy: MirrorStrategy::default(),
            timeout_secs: default_mirror_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bearer: Option<String>,
    #[serde(default = "default_guest_cache_dir")]
    pub guest_cache_dir: PathBuf,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_tweet_count_floor")]
    pub tweet_count_floor: u32,
}

impl ApiConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bearer: None,
            guest_cache_dir: default_guest_cache_dir(),
            token_ttl_secs: default_token_ttl_secs(),
            timeout_secs: default_api_timeout_secs(),
            tweet_count_floor: default_tweet_count_floor(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UaStrategy {
    #[default]
    Single,
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub ua_strategy: UaStrategy,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub expand_short_links: bool,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agents: Vec::new(),
            ua_strategy: UaStrategy::default(),
            timeout_secs: default_http_timeout_secs(),
            expand_short_links: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderBackend {
    #[default]
    Subprocess,
    Browserless,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default)]
    pub backend: RenderBackend,
    #[serde(default = "default_render_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub browserless_url: Option<String>,
    /// Filled from `BROWSERLESS_TOKEN`, never from the file.
    #[serde(skip)]
    pub browserless_token: Option<String>,
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: RenderBackend::default(),
            command: default_render_command(),
            args: Vec::new(),
            timeout_secs: default_render_timeout_secs(),
            browserless_url: None,
            browserless_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// `scheme://host:port`, present only when all three parts are set.
    pub fn server(&self) -> Option<String> {
        let scheme = self.scheme.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let host = self.host.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let port = self.port?;
        Some(format!("{scheme}://{host}:{port}"))
    }

    /// Proxy URL with credentials inlined, for HTTP clients.
    pub fn url(&self) -> Option<String> {
        let server = self.server()?;
        let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) else {
            return Some(server);
        };
        let (scheme, rest) = server.split_once("://")?;
        let pass = self.password.as_deref().unwrap_or_default();
        Some(format!("{scheme}://{user}:{pass}@{rest}"))
    }

    /// `{server, username?, password?}` as handed to the render helper.
    pub fn render_json(&self) -> Option<serde_json::Value> {
        let server = self.server()?;
        let mut value = serde_json::json!({ "server": server });
        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            value["username"] = user.into();
        }
        if let Some(pass) = self.password.as_deref().filter(|p| !p.is_empty()) {
            value["password"] = pass.into();
        }
        Some(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    /// Accept an aggregator that merely appears in the bio and yields bits.
    #[serde(default = "default_true")]
    pub soft_policy: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            soft_policy: true,
            max_parallel: default_max_parallel(),
        }
    }
}

impl FileConfig {
    /// Overlay secrets from the environment (and `.env`, if present).
    pub fn apply_env(&mut self) {
        dotenvy::dotenv().ok();

        if let Some(bearer) = env_nonempty("SOCIALLINK_X_BEARER") {
            self.api.bearer = Some(bearer);
        }
        if let Some(password) = env_nonempty("SOCIALLINK_PROXY_PASSWORD") {
            if let Some(proxy) = self.proxy.as_mut() {
                proxy.password = Some(password);
            }
        }
        self.render.browserless_token = env_nonempty("BROWSERLESS_TOKEN");

        tracing::debug!(
            bearer_set = self.api.bearer.is_some(),
            proxy = self.proxy.as_ref().and_then(ProxyConfig::server).unwrap_or_default(),
            browserless_token_set = self.render.browserless_token.is_some(),
            "Environment secrets applied"
        );
    }

    /// The configured proxy, if it is complete enough to use.
    pub fn active_proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref().filter(|p| p.server().is_some())
    }
}

/// Load and parse a TOML config file, then apply environment secrets.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.apply_env();
    Ok(config)
}

/// Parse TOML text without touching the environment.
pub fn parse_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content)?;
    Ok(config)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_true() -> bool {
    true
}
fn default_ban_ttl_secs() -> u64 {
    900
}
fn default_max_per_request() -> usize {
    3
}
fn default_mirror_timeout_secs() -> u64 {
    20
}
fn default_guest_cache_dir() -> PathBuf {
    PathBuf::from(".cache/sociallink")
}
fn default_token_ttl_secs() -> u64 {
    10_800
}
fn default_api_timeout_secs() -> u64 {
    15
}
fn default_tweet_count_floor() -> u32 {
    50
}
fn default_http_timeout_secs() -> u64 {
    15
}
fn default_render_command() -> String {
    "node".to_string()
}
fn default_render_timeout_secs() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [socials]
        keys = ["twitter", "discord", "website"]

        [aggregators]
        domains = ["Linktr.ee", "www.beacons.ai"]

        [mirrors]
        instances = ["https://nitter.example"]
        ban_ttl_secs = 5
        strategy = "round_robin"

        [http]
        user_agents = ["UA/1"]
    "#;

    #[test]
    fn parses_minimal_file_with_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.socials.keys,
            vec![SocialKey::Twitter, SocialKey::Discord, SocialKey::Website]
        );
        assert_eq!(config.mirrors.strategy, MirrorStrategy::RoundRobin);
        assert_eq!(config.mirrors.max_per_request, 3);
        assert_eq!(config.api.token_ttl_secs, 10_800);
        assert_eq!(config.api.tweet_count_floor, 50);
        assert_eq!(config.http.ua_strategy, UaStrategy::Single);
        assert_eq!(config.render.backend, RenderBackend::Subprocess);
        assert!(config.verification.soft_policy);
        assert_eq!(config.verification.max_parallel, 4);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn ban_ttl_is_clamped() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.mirrors.ban_ttl(), Duration::from_secs(60));

        let long = MirrorsConfig {
            ban_ttl_secs: 10_000_000,
            ..MirrorsConfig::default()
        };
        assert_eq!(long.ban_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn aggregator_domains_are_normalized() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.aggregators.normalized_domains().unwrap(),
            vec!["linktr.ee".to_string(), "beacons.ai".to_string()]
        );
    }

    #[test]
    fn empty_allow_lists_are_config_errors() {
        let aggregators = AggregatorsConfig { domains: vec![" ".to_string()] };
        assert!(matches!(
            aggregators.normalized_domains(),
            Err(ResolveError::Config(_))
        ));

        let socials = SocialsConfig { keys: Vec::new() };
        assert!(socials.allowed().unwrap_err().is_fatal());
    }

    #[test]
    fn missing_throttle_block_fails_to_parse() {
        let without_http = MINIMAL.replace("[http]", "").replace("user_agents = [\"UA/1\"]", "");
        assert!(parse_config(&without_http).is_err());
    }

    #[test]
    fn unknown_social_key_fails_to_parse() {
        let bad = MINIMAL.replace("\"discord\"", "\"myspace\"");
        assert!(parse_config(&bad).is_err());
    }

    #[test]
    fn proxy_needs_scheme_host_and_port() {
        let partial = ProxyConfig {
            host: Some("proxy.local".to_string()),
            port: Some(8080),
            ..ProxyConfig::default()
        };
        assert!(partial.server().is_none());
        assert!(partial.render_json().is_none());

        let full = ProxyConfig {
            scheme: Some("http".to_string()),
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            ..partial
        };
        assert_eq!(full.server().as_deref(), Some("http://proxy.local:8080"));
        assert_eq!(full.url().as_deref(), Some("http://u:p@proxy.local:8080"));
        let json = full.render_json().unwrap();
        assert_eq!(json["server"], "http://proxy.local:8080");
        assert_eq!(json["username"], "u");
        assert_eq!(json["password"], "p");
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sociallink.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.mirrors.instances, vec!["https://nitter.example"]);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/sociallink.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
