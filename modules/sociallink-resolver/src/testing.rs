// Test mocks for the resolver.
//
// One mock per trait boundary, each counting its calls so tests can assert
// on network traffic:
// - MockXApi (XApi): queued guest tokens, handle→user, user_id→tweets
// - MockPageFetcher (PageFetcher): URL→response
// - MockRenderer (Renderer): URL→RenderResult
// - MockProfileSource (ProfileSource): handle→ProfileData or failure

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use render_client::{RenderError, RenderOptions, RenderResult, Renderer};
use sociallink_common::{ProfileData, ResolveError, Result};
use xapi_client::{TimelineTweet, UrlEntity, UrlRef, UserEntities, UserLegacy, UserResult, XApiError};

use crate::http::{FetchedPage, PageFetcher};
use crate::traits::{ProfileSource, XApi};

fn record(calls: &Mutex<Vec<String>>, value: &str) {
    calls
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(value.to_string());
}

fn snapshot(calls: &Mutex<Vec<String>>) -> Vec<String> {
    calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

// ---------------------------------------------------------------------------
// MockXApi
// ---------------------------------------------------------------------------

/// Guest tokens are handed out in registration order; activation fails once
/// they run out. Builder: `.with_guest_tokens()`, `.on_user()`,
/// `.on_tweets()`, `.fail_auth()`, `.fail_with()`.
pub struct MockXApi {
    guest_tokens: Mutex<VecDeque<String>>,
    users: HashMap<String, UserResult>,
    tweets: HashMap<String, Vec<TimelineTweet>>,
    failures: Mutex<VecDeque<XApiError>>,
    activations: AtomicUsize,
    user_calls: Mutex<Vec<String>>,
    tweet_calls: Mutex<Vec<String>>,
}

impl MockXApi {
    pub fn new() -> Self {
        Self {
            guest_tokens: Mutex::new(VecDeque::new()),
            users: HashMap::new(),
            tweets: HashMap::new(),
            failures: Mutex::new(VecDeque::new()),
            activations: AtomicUsize::new(0),
            user_calls: Mutex::new(Vec::new()),
            tweet_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_guest_tokens(self, tokens: &[&str]) -> Self {
        self.guest_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tokens.iter().map(|t| t.to_string()));
        self
    }

    pub fn on_user(mut self, handle: &str, user: UserResult) -> Self {
        self.users.insert(handle.to_lowercase(), user);
        self
    }

    pub fn on_tweets(mut self, user_id: &str, tweets: Vec<TimelineTweet>) -> Self {
        self.tweets.insert(user_id.to_string(), tweets);
        self
    }

    /// The next `n` user or tweet lookups fail with a 403.
    pub fn fail_auth(mut self, n: usize) -> Self {
        for _ in 0..n {
            self = self.fail_with(XApiError::Auth { status: 403 });
        }
        self
    }

    /// Queue `err` for the next user or tweet lookup.
    pub fn fail_with(self, err: XApiError) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(err);
        self
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// `handle@guest_token` per user lookup.
    pub fn user_calls(&self) -> Vec<String> {
        snapshot(&self.user_calls)
    }

    pub fn tweet_calls(&self) -> Vec<String> {
        snapshot(&self.tweet_calls)
    }

    fn take_failure(&self) -> Option<XApiError> {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

impl Default for MockXApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XApi for MockXApi {
    async fn activate_guest(&self) -> xapi_client::Result<String> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.guest_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| XApiError::MissingField("guest_token"))
    }

    async fn user_by_screen_name(
        &self,
        handle: &str,
        guest_token: &str,
    ) -> xapi_client::Result<UserResult> {
        record(&self.user_calls, &format!("{handle}@{guest_token}"));
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.users
            .get(&handle.to_lowercase())
            .cloned()
            .ok_or(XApiError::MissingField("data.user.result"))
    }

    async fn user_tweets(
        &self,
        user_id: &str,
        _count: u32,
        limit: usize,
        guest_token: &str,
    ) -> xapi_client::Result<Vec<TimelineTweet>> {
        record(&self.tweet_calls, &format!("{user_id}@{guest_token}"));
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut tweets = self.tweets.get(user_id).cloned().unwrap_or_default();
        tweets.truncate(limit);
        Ok(tweets)
    }
}

/// A `UserByScreenName` result with a website link and description links.
pub fn api_user(
    rest_id: &str,
    handle: &str,
    name: &str,
    website: Option<&str>,
    description_links: &[&str],
    avatar: Option<&str>,
) -> UserResult {
    let url_ref = |u: &str| UrlRef {
        expanded_url: Some(u.to_string()),
        url: Some(format!("https://t.co/{}", u.len())),
    };
    UserResult {
        rest_id: Some(rest_id.to_string()),
        legacy: UserLegacy {
            name: name.to_string(),
            screen_name: handle.to_string(),
            description: String::new(),
            profile_image_url_https: avatar.map(str::to_string),
            entities: UserEntities {
                url: website.map(|w| UrlEntity {
                    urls: vec![url_ref(w)],
                }),
                description: Some(UrlEntity {
                    urls: description_links.iter().map(|u| url_ref(u)).collect(),
                }),
            },
        },
    }
}

// ---------------------------------------------------------------------------
// MockPageFetcher
// ---------------------------------------------------------------------------

/// URL→response map. Unregistered URLs fail with a network error.
/// Builder: `.on_page()`, `.on_image()`, `.on_redirect()`.
pub struct MockPageFetcher {
    pages: HashMap<String, FetchedPage>,
    calls: Mutex<Vec<String>>,
    headers_seen: Mutex<Vec<(String, String, String)>>,
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            headers_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn on_page(mut self, url: &str, status: u16, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                url: url.to_string(),
                status,
                content_type: "text/html; charset=utf-8".to_string(),
                body: body.as_bytes().to_vec(),
            },
        );
        self
    }

    pub fn on_image(mut self, url: &str, content_type: &str, body: &[u8]) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                url: url.to_string(),
                status: 200,
                content_type: content_type.to_string(),
                body: body.to_vec(),
            },
        );
        self
    }

    /// `url` answers 200 after redirecting to `final_url`.
    pub fn on_redirect(mut self, url: &str, final_url: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                url: final_url.to_string(),
                status: 200,
                content_type: "text/html".to_string(),
                body: Vec::new(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        snapshot(&self.calls)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| *c == url).count()
    }

    /// `(url, header, value)` for every header passed in.
    pub fn headers_seen(&self) -> Vec<(String, String, String)> {
        self.headers_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for MockPageFetcher {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<FetchedPage> {
        record(&self.calls, url);
        {
            let mut seen = self.headers_seen.lock().unwrap_or_else(|e| e.into_inner());
            for (name, value) in headers {
                seen.push((url.to_string(), name.to_string(), value.to_string()));
            }
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ResolveError::Network(format!("MockPageFetcher: no page registered for {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// URL→render result. Unregistered URLs fail like an unreachable browser.
pub struct MockRenderer {
    results: HashMap<String, RenderResult>,
    calls: Mutex<Vec<String>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_render(mut self, url: &str, result: RenderResult) -> Self {
        self.results.insert(url.to_string(), result);
        self
    }

    /// A successful 200 render of `html`.
    pub fn on_html(self, url: &str, html: &str) -> Self {
        self.on_render(url, rendered(200, html))
    }

    pub fn calls(&self) -> Vec<String> {
        snapshot(&self.calls)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| *c == url).count()
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render(&self, url: &str, _options: &RenderOptions) -> render_client::Result<RenderResult> {
        record(&self.calls, url);
        self.results
            .get(url)
            .cloned()
            .ok_or_else(|| RenderError::Network(format!("MockRenderer: no render registered for {url}")))
    }
}

pub fn rendered(status: u16, html: &str) -> RenderResult {
    RenderResult {
        ok: (200..300).contains(&status),
        html: html.to_string(),
        status,
        anti_bot: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// MockProfileSource
// ---------------------------------------------------------------------------

/// Handle→profile. Unregistered handles read as an empty profile;
/// `.on_failure()` handles fail the lookup outright.
pub struct MockProfileSource {
    profiles: HashMap<String, ProfileData>,
    failures: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockProfileSource {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
            failures: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_profile(mut self, handle: &str, profile: ProfileData) -> Self {
        self.profiles.insert(handle.to_lowercase(), profile);
        self
    }

    /// Shorthand for a profile with only bio links.
    pub fn on_links(self, handle: &str, links: &[&str]) -> Self {
        let mut profile = ProfileData::default();
        for link in links {
            profile.add_link(*link);
        }
        self.on_profile(handle, profile)
    }

    pub fn on_failure(mut self, handle: &str) -> Self {
        self.failures.insert(handle.to_lowercase());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        snapshot(&self.calls)
    }
}

impl Default for MockProfileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileSource for MockProfileSource {
    async fn profile(&self, handle: &str, _want_avatar: bool) -> Result<ProfileData> {
        record(&self.calls, handle);
        let key = handle.to_lowercase();
        if self.failures.contains(&key) {
            return Err(ResolveError::Network(format!("MockProfileSource: {handle} unreachable")));
        }
        Ok(self.profiles.get(&key).cloned().unwrap_or_default())
    }
}
