//! Pure URL canonicalization: profile URLs, handles, avatars, bio links.
//!
//! Nothing here touches the network or fails loudly. Invalid input yields an
//! empty string (or `None` for lookups that return an option).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Canonical host for profile URLs.
pub const CANONICAL_HOST: &str = "x.com";
const LEGACY_HOST: &str = "twitter.com";
const CDN_HOST: &str = "pbs.twimg.com";

/// First path segments that are site features, not profiles.
const RESERVED_PATHS: &[&str] = &[
    "i",
    "home",
    "intent",
    "share",
    "search",
    "hashtag",
    "explore",
    "messages",
    "notifications",
    "settings",
    "login",
    "signup",
    "tos",
    "privacy",
];

static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("valid regex"));

static BARE_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.-]+\.[A-Za-z]{2,}(?:[/?#].*)?$").expect("valid regex")
});

static LOW_RES_AVATAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)_(?:normal|bigger|mini|200x200)\.(jpg|png)$").expect("valid regex")
});

static TEXT_URL_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)https?://[^\s<>\]]+").expect("valid regex"),
        Regex::new(r"(?i)\bwww\.[^\s<>\]]+").expect("valid regex"),
        Regex::new(r"(?i)\b[A-Za-z0-9.-]+\.[A-Za-z]{2,}/[^\s<>\]]+").expect("valid regex"),
    ]
});

pub fn is_valid_handle(handle: &str) -> bool {
    HANDLE_RE.is_match(handle) && !RESERVED_PATHS.contains(&handle.to_ascii_lowercase().as_str())
}

/// `//host` and `http://` become `https://`; anything else is only trimmed.
pub fn force_https(url: &str) -> String {
    let u = url.trim();
    if let Some(rest) = u.strip_prefix("//") {
        return format!("https://{rest}");
    }
    if starts_with_ci(u, "http://") {
        return format!("https://{}", &u[7..]);
    }
    u.to_string()
}

fn starts_with_ci(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Give a scheme to `www.host/...` and `domain.tld/...`.
pub fn coerce_url(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }
    if starts_with_ci(s, "http://") || starts_with_ci(s, "https://") || s.starts_with("//") {
        return force_https(s);
    }
    if starts_with_ci(s, "www.") || BARE_DOMAIN_RE.is_match(s) {
        return format!("https://{s}");
    }
    s.to_string()
}

/// Lower-cased host without `www.`, or empty.
pub fn host_of(url: &str) -> String {
    Url::parse(&coerce_url(url))
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .map(|h| strip_www(&h).to_string())
        .unwrap_or_default()
}

/// Domain of a site URL or a bare domain, lower-cased, without `www.`.
pub fn site_domain(input: &str) -> String {
    let host = host_of(input);
    if !host.is_empty() {
        return host;
    }
    strip_www(&input.trim().trim_matches('.').to_ascii_lowercase()).to_string()
}

/// Suffix match on label boundaries: `shop.acme.io` matches `acme.io`,
/// `notacme.io` does not.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim().trim_matches('.').to_ascii_lowercase();
    let host = strip_www(&host);
    let domain = strip_www(&domain);
    if host.is_empty() || domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// True when `url`'s host suffix-matches `domain`.
pub fn url_on_domain(url: &str, domain: &str) -> bool {
    domain_matches(&host_of(url), domain)
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn canonical_profile(handle: &str) -> String {
    format!("https://{CANONICAL_HOST}/{handle}")
}

/// Canonicalize a handle or profile URL to `https://x.com/<handle>`.
///
/// Accepts `@name`, `name`, and decorated URLs on either host (query,
/// fragment, trailing slash, `/status/<id>`, `/media`, ...). Returns an
/// empty string when no valid handle can be recovered.
pub fn normalize_profile_url(input: &str) -> String {
    let s = input.trim();
    if s.is_empty() {
        return String::new();
    }

    let bare = s.strip_prefix('@').unwrap_or(s);
    if is_valid_handle(bare) {
        return canonical_profile(bare);
    }

    let Ok(parsed) = Url::parse(&coerce_url(s)) else {
        return String::new();
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("mobile."))
        .unwrap_or(&host);
    if host != CANONICAL_HOST && host != LEGACY_HOST {
        return String::new();
    }

    let first = parsed
        .path_segments()
        .and_then(|mut segs| segs.find(|seg| !seg.is_empty()))
        .unwrap_or_default();
    if is_valid_handle(first) {
        canonical_profile(first)
    } else {
        String::new()
    }
}

/// The handle of a profile URL (or bare handle), if one can be recovered.
pub fn handle_of(input: &str) -> Option<String> {
    let url = normalize_profile_url(input);
    url.rsplit('/').next().filter(|h| !h.is_empty()).map(String::from)
}

/// Rewrite a legacy-host URL to the canonical host; other URLs pass through.
pub fn to_canonical_host(url: &str) -> String {
    let u = force_https(url);
    let Ok(mut parsed) = Url::parse(&u) else {
        return u;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if strip_www(&host) == LEGACY_HOST && parsed.set_host(Some(CANONICAL_HOST)).is_ok() {
        return parsed.to_string();
    }
    u
}

/// Canonicalize an avatar URL: decode mirror `/pic/` proxy paths to the CDN,
/// force https, drop query and fragment, and upscale small CDN variants to
/// `_400x400`.
pub fn normalize_avatar_url(input: &str) -> String {
    let s = input.trim();
    if s.is_empty() {
        return String::new();
    }

    let mut u = match s.find("/pic/") {
        Some(idx) => decode_pic_path(&s[idx + "/pic/".len()..]),
        None => force_https(s),
    };
    if u.starts_with(&format!("{CDN_HOST}/")) {
        u = format!("https://{u}");
    }
    if let Some(cut) = u.find(['?', '#']) {
        u.truncate(cut);
    }
    if host_of(&u).ends_with(CDN_HOST) {
        u = LOW_RES_AVATAR_RE.replace(&u, "_400x400.$1").into_owned();
    }
    u
}

/// Decode the percent-encoded tail of a mirror `/pic/<encoded>` path.
fn decode_pic_path(encoded: &str) -> String {
    let decoded = urlencoding::decode(encoded)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| encoded.to_string());
    let d = decoded.trim();

    if d.starts_with("//") || starts_with_ci(d, "http://") {
        return force_https(d);
    }
    if starts_with_ci(d, "https://") {
        return d.to_string();
    }

    // `orig/` is the mirror's size flag; the CDN path follows it.
    let path = d.trim_start_matches('/');
    let path = path.strip_prefix("orig/").unwrap_or(path);
    let lower = path.to_ascii_lowercase();
    if lower.starts_with("media/") || lower.starts_with("profile_images/") {
        return format!("https://{CDN_HOST}/{path}");
    }
    format!("https://{path}")
}

/// Remove query parameters whose lower-cased name matches `drop`.
pub fn strip_query_params(url: &str, drop: impl Fn(&str) -> bool) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !drop(&k.to_ascii_lowercase()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    ["utm_", "fbclid", "gclid", "yclid", "mc_"]
        .iter()
        .any(|p| key.starts_with(p))
}

/// Clean a known-socials map: https, tracking parameters removed, no
/// trailing slash. Blank values stay blank.
pub fn normalize_socials(socials: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    socials
        .iter()
        .map(|(key, value)| {
            let v = value.trim();
            let cleaned = if v.is_empty() {
                String::new()
            } else {
                let u = strip_query_params(&force_https(v), is_tracking_param);
                u.trim_end_matches('/').to_string()
            };
            (key.clone(), cleaned)
        })
        .collect()
}

/// URLs written as plain text: `https://...`, `www....`, `domain.tld/path`.
/// Coerced to https, trailing punctuation and slash trimmed, deduped.
pub fn extract_urls_from_text(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut covered: Vec<(usize, usize)> = Vec::new();

    for re in TEXT_URL_RES.iter() {
        for m in re.find_iter(text) {
            // A later pattern must not re-match inside an earlier match.
            if covered.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
                continue;
            }
            covered.push((m.start(), m.end()));

            let raw = m.as_str().trim_end_matches(['.', ',', ';', ')', '!', '"', '\'']);
            let url = force_https(&coerce_url(raw)).trim_end_matches('/').to_string();
            if !url.is_empty() && !out.contains(&url) {
                out.push(url);
            }
        }
    }
    out
}
