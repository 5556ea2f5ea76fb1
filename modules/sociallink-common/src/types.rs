use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

// --- Social keys ---

/// Closed set of enrichment keys a configuration may allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialKey {
    Twitter,
    Discord,
    Telegram,
    Youtube,
    Linkedin,
    Reddit,
    Medium,
    Github,
    Website,
}

/// Host suffixes that identify each social network.
const HOST_RULES: &[(SocialKey, &[&str])] = &[
    (SocialKey::Twitter, &["x.com", "twitter.com"]),
    (SocialKey::Discord, &["discord.gg", "discord.com", "discordapp.com"]),
    (SocialKey::Telegram, &["t.me", "telegram.me"]),
    (SocialKey::Youtube, &["youtube.com", "youtu.be"]),
    (SocialKey::Linkedin, &["linkedin.com"]),
    (SocialKey::Reddit, &["reddit.com"]),
    (SocialKey::Medium, &["medium.com"]),
    (SocialKey::Github, &["github.com"]),
];

impl SocialKey {
    pub const ALL: [SocialKey; 9] = [
        SocialKey::Twitter,
        SocialKey::Discord,
        SocialKey::Telegram,
        SocialKey::Youtube,
        SocialKey::Linkedin,
        SocialKey::Reddit,
        SocialKey::Medium,
        SocialKey::Github,
        SocialKey::Website,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialKey::Twitter => "twitter",
            SocialKey::Discord => "discord",
            SocialKey::Telegram => "telegram",
            SocialKey::Youtube => "youtube",
            SocialKey::Linkedin => "linkedin",
            SocialKey::Reddit => "reddit",
            SocialKey::Medium => "medium",
            SocialKey::Github => "github",
            SocialKey::Website => "website",
        }
    }

    pub fn parse(s: &str) -> Option<SocialKey> {
        let s = s.trim().to_ascii_lowercase();
        SocialKey::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Classify a lower-cased host. `Website` is never returned: any host
    /// that is not a known network is a website candidate.
    pub fn from_host(host: &str) -> Option<SocialKey> {
        let host = host.trim_start_matches("www.");
        HOST_RULES.iter().find_map(|(key, suffixes)| {
            suffixes
                .iter()
                .any(|s| host == *s || host.ends_with(&format!(".{s}")))
                .then_some(*key)
        })
    }
}

impl fmt::Display for SocialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Profiles ---

/// A not-yet-verified identity reference harvested from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCandidate {
    pub raw_url: String,
    pub normalized_url: String,
    pub handle: String,
}

/// What a fetch tier learned about a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileData {
    /// Outbound bio URLs, https, in discovery order, unique.
    pub bio_links: Vec<String>,
    pub avatar_url: String,
    pub display_name: String,
}

impl ProfileData {
    pub fn add_link(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.bio_links.contains(&url) {
            self.bio_links.push(url);
        }
    }

    /// Good enough to stop falling through tiers.
    pub fn is_sufficient(&self, want_avatar: bool) -> bool {
        !self.bio_links.is_empty() && (!want_avatar || !self.avatar_url.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.bio_links.is_empty() && self.avatar_url.is_empty() && self.display_name.is_empty()
    }

    /// Fill gaps in `self` from `other` without replacing anything present.
    pub fn absorb(&mut self, other: ProfileData) {
        for link in other.bio_links {
            self.add_link(link);
        }
        if self.avatar_url.is_empty() {
            self.avatar_url = other.avatar_url;
        }
        if self.display_name.is_empty() {
            self.display_name = other.display_name;
        }
    }
}

// --- Tweets ---

const TITLE_MAX: usize = 120;
const TITLE_CUT: usize = 117;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tweet {
    pub id: String,
    pub status_url: String,
    pub handle: String,
    /// RFC 3339, when the source exposed a timestamp.
    pub datetime: Option<String>,
    pub text: String,
    pub title: String,
    pub media: Vec<String>,
}

impl Tweet {
    pub fn new(
        handle: &str,
        id: &str,
        datetime: Option<String>,
        text: String,
        media: Vec<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            status_url: format!("https://x.com/{handle}/status/{id}"),
            handle: handle.to_string(),
            datetime,
            title: title_from(&text),
            text,
            media,
        }
    }

    pub fn parsed_datetime(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(self.datetime.as_deref()?).ok()
    }
}

/// Text shortened to 117 chars plus an ellipsis when longer than 120.
pub fn title_from(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX {
        return text.to_string();
    }
    let mut title: String = text.chars().take(TITLE_CUT).collect();
    title.push('…');
    title
}

// --- Enrichment ---

/// Social links pulled from one aggregator page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorBits {
    pub socials: BTreeMap<SocialKey, String>,
    pub website: Option<String>,
}

impl AggregatorBits {
    pub fn is_empty(&self) -> bool {
        self.socials.is_empty() && self.website.is_none()
    }

    /// Every URL the bits carry, website last.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.socials
            .values()
            .map(String::as_str)
            .chain(self.website.as_deref())
    }

    /// Flatten into an enrichment map limited to `allowed`.
    pub fn to_enrichment(&self, allowed: &[SocialKey]) -> Enrichment {
        let mut out = Enrichment::default();
        for (key, url) in &self.socials {
            out.insert(*key, url.clone());
        }
        if let Some(website) = &self.website {
            out.insert(SocialKey::Website, website.clone());
        }
        out.retain_allowed(allowed);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Enrichment(BTreeMap<SocialKey, String>);

impl Enrichment {
    pub fn get(&self, key: SocialKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Empty values are ignored.
    pub fn insert(&mut self, key: SocialKey, url: String) {
        if !url.is_empty() {
            self.0.insert(key, url);
        }
    }

    pub fn contains(&self, key: SocialKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocialKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn retain_allowed(&mut self, allowed: &[SocialKey]) {
        self.0.retain(|k, _| allowed.contains(k));
    }

    /// Inverse of `to_string_map`; unknown keys are dropped.
    pub fn from_string_map(map: &BTreeMap<String, String>) -> Self {
        let mut e = Self::default();
        for (key, url) in map {
            if let Some(key) = SocialKey::parse(key) {
                e.insert(key, url.clone());
            }
        }
        e
    }

    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
            .collect()
    }

    /// Copy entries into `target` only where it has no non-empty value.
    pub fn merge_missing_into(&self, target: &mut BTreeMap<String, String>) {
        for (key, url) in &self.0 {
            let slot = target.entry(key.as_str().to_string()).or_default();
            if slot.is_empty() {
                *slot = url.clone();
            }
        }
    }
}

// --- Verification ---

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub confirmed: bool,
    pub enrichment: Enrichment,
    /// The aggregator that confirmed, or the first one seen (diagnostics).
    pub aggregator_url: String,
    /// The profile lookup itself failed; absence was not established.
    pub lookup_failed: bool,
}

impl VerificationResult {
    pub fn confirmed(enrichment: Enrichment, aggregator_url: String) -> Self {
        Self {
            confirmed: true,
            enrichment,
            aggregator_url,
            lookup_failed: false,
        }
    }

    pub fn unconfirmed(aggregator_url: String) -> Self {
        Self {
            aggregator_url,
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            lookup_failed: true,
            ..Self::default()
        }
    }
}

/// The value handed to collaborators for one target domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub confirmed_url: String,
    pub enrichment: BTreeMap<String, String>,
    pub aggregator_url: String,
    pub avatar_url: String,
}

impl Resolution {
    pub fn is_confirmed(&self) -> bool {
        !self.confirmed_url.is_empty()
    }

    /// Fill the caller's empty or missing social keys from the enrichment.
    pub fn merge_missing_into(&self, known: &mut BTreeMap<String, String>) {
        Enrichment::from_string_map(&self.enrichment).merge_missing_into(known);
    }

    pub fn into_tuple(self) -> (String, BTreeMap<String, String>, String, String) {
        (
            self.confirmed_url,
            self.enrichment,
            self.aggregator_url,
            self.avatar_url,
        )
    }
}
