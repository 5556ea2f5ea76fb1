//! Profile and timeline extraction from rendered markup.
//!
//! Two layouts are understood: mirror front-ends (`.profile-card`,
//! `.timeline-item`) and the canonical site (`data-testid` attributes,
//! `<article>` timeline). Both produce the same `ProfileData` / `Tweet`
//! shapes with the same normalization.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sociallink_common::{ProfileData, Tweet};
use url::Url;

use crate::normalize::{extract_urls_from_text, force_https, host_of, normalize_avatar_url};

const MIRROR_LINK_AREAS: &[&str] = &[
    ".profile-card .profile-website a",
    ".profile-card .profile-bio a",
    ".profile-website a",
    ".profile-bio a",
    ".profile-card-extra a",
    r#"a[rel="me"]"#,
];

const ANTIBOT_NEEDLES: &[&str] = &[
    "captcha",
    "verify",
    "are you human",
    "access denied",
    "rate limit",
    "please enable javascript",
    "just a moment",
    "checking your browser",
];

/// Pages shorter than this are treated as challenge or error stubs.
const MIN_REAL_PAGE_LEN: usize = 400;

static STATUS_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/status/(\d+)").expect("valid regex"));

static MIRROR_AVATAR_LINK: LazyLock<Selector> =
    LazyLock::new(|| sel(".profile-card a.profile-card-avatar[href]"));
static MIRROR_AVATAR_IMG: LazyLock<Selector> = LazyLock::new(|| {
    sel(".profile-card a.profile-card-avatar img, a.profile-card-avatar img, \
         .profile-card img.avatar, img[src*='pbs.twimg.com/profile_images/']")
});
static MIRROR_AVATAR_META: LazyLock<Selector> = LazyLock::new(|| {
    sel("meta[property='og:image'], meta[name='og:image'], meta[property='twitter:image:src']")
});
static MIRROR_MEDIA: LazyLock<Selector> = LazyLock::new(|| {
    sel(".attachments img[src], .attachment img[src], .gallery-row img[src], a.still-image img[src]")
});

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: &ElementRef) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

/// Resolve `href` against `base`, keeping only http(s) targets.
fn absolute_http(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let href = force_https(href);
    let parsed = match Url::parse(&href) {
        Ok(u) => u,
        Err(_) => base?.join(&href).ok()?,
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    Some(force_https(parsed.as_str()))
}

fn bio_link(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

pub fn status_id(href: &str) -> Option<String> {
    STATUS_ID_RE.captures(href).map(|c| c[1].to_string())
}

/// True when the page visibly belongs to `handle`: a `/handle` link, an
/// `@handle` marker, or a profile card mentioning it.
pub fn html_matches_handle(html: &str, handle: &str) -> bool {
    if html.is_empty() || handle.is_empty() {
        return false;
    }
    let low = html.to_lowercase();
    let h = regex::escape(&handle.to_lowercase());

    let href_re = Regex::new(&format!(r#"href\s*=\s*["']/\s*{h}(?:["'/?# ]|$)"#));
    if href_re.is_ok_and(|re| re.is_match(&low)) {
        return true;
    }
    let at_re = Regex::new(&format!(r#"@{h}(?:["' <]|$)"#));
    if at_re.is_ok_and(|re| re.is_match(&low)) {
        return true;
    }
    low.contains("profile-card") && low.contains(&handle.to_lowercase())
}

/// Challenge pages and empty stubs. A page with timeline markup is never
/// considered a challenge.
pub fn looks_antibot(html: &str) -> bool {
    let low = html.to_lowercase();
    if low.contains("tweet-body") || low.contains("timeline-item") {
        return false;
    }
    low.len() < MIN_REAL_PAGE_LEN || ANTIBOT_NEEDLES.iter().any(|n| low.contains(n))
}

/// Parse a mirror profile page served from `instance_base`.
pub fn parse_mirror_profile(html: &str, instance_base: &str, handle: &str) -> ProfileData {
    let mut profile = ProfileData::default();
    if html.is_empty() {
        return profile;
    }
    let doc = Html::parse_document(html);
    let base = Url::parse(&format!("{}/{handle}", instance_base.trim_end_matches('/'))).ok();
    let mirror_host = host_of(instance_base);

    for area in MIRROR_LINK_AREAS {
        for a in doc.select(&sel(area)) {
            let Some(url) = a.value().attr("href").and_then(|h| absolute_http(h, base.as_ref()))
            else {
                continue;
            };
            // Mentions and hashtags point back into the mirror.
            if host_of(&url) == mirror_host {
                continue;
            }
            profile.add_link(bio_link(&url));
        }
    }
    for bio in doc.select(&sel(".profile-bio")) {
        for url in extract_urls_from_text(&element_text(&bio)) {
            if host_of(&url) != mirror_host {
                profile.add_link(url);
            }
        }
    }

    if let Some(name) = doc.select(&sel(".profile-card-fullname")).next() {
        profile.display_name = element_text(&name);
    }
    profile.avatar_url = pick_mirror_avatar(&doc);
    profile
}

fn pick_mirror_avatar(doc: &Html) -> String {
    let candidates = doc
        .select(&MIRROR_AVATAR_LINK)
        .filter_map(|a| a.value().attr("href"))
        .chain(doc.select(&MIRROR_AVATAR_IMG).filter_map(|img| img.value().attr("src")))
        .chain(
            doc.select(&MIRROR_AVATAR_META)
                .filter_map(|m| m.value().attr("content"))
                .filter(|c| c.contains("/pic/") || c.contains("%2F") || c.contains("pbs.twimg.com")),
        );

    candidates
        .map(normalize_avatar_url)
        .find(|u| u.starts_with("https://"))
        .unwrap_or_default()
}

/// Parse a rendered profile page on the canonical host.
pub fn parse_x_profile(html: &str, profile_url: &str) -> ProfileData {
    let mut profile = ProfileData::default();
    if html.is_empty() {
        return profile;
    }
    let doc = Html::parse_document(html);
    let base = Url::parse(profile_url).ok();

    // Header website link: href is usually a shortener, text is the target.
    for el in doc.select(&sel(r#"[data-testid="UserUrl"]"#)) {
        if let Some(url) = el.value().attr("href").and_then(|h| absolute_http(h, base.as_ref())) {
            profile.add_link(bio_link(&url));
        }
        for url in extract_urls_from_text(&element_text(&el)) {
            profile.add_link(url);
        }
    }

    for desc in doc.select(&sel(r#"[data-testid="UserDescription"]"#)) {
        for a in desc.select(&sel("a[href]")) {
            let Some(url) = a.value().attr("href").and_then(|h| absolute_http(h, base.as_ref()))
            else {
                continue;
            };
            if !is_site_internal(&url) {
                profile.add_link(bio_link(&url));
            }
        }
        for url in extract_urls_from_text(&element_text(&desc)) {
            profile.add_link(url);
        }
    }

    for a in doc.select(&sel(r#"a[rel="me"]"#)) {
        if let Some(url) = a.value().attr("href").and_then(|h| absolute_http(h, base.as_ref())) {
            if !is_site_internal(&url) {
                profile.add_link(bio_link(&url));
            }
        }
    }

    profile.display_name = doc
        .select(&sel(r#"[data-testid="UserName"] span"#))
        .map(|s| element_text(&s))
        .find(|t| !t.is_empty() && !t.starts_with('@'))
        .unwrap_or_default();

    profile.avatar_url = doc
        .select(&sel("img[src*='profile_images']"))
        .filter_map(|img| img.value().attr("src"))
        .chain(
            doc.select(&sel("meta[property='og:image']"))
                .filter_map(|m| m.value().attr("content")),
        )
        .map(normalize_avatar_url)
        .find(|u| u.starts_with("https://"))
        .unwrap_or_default();

    profile
}

fn is_site_internal(url: &str) -> bool {
    matches!(host_of(url).as_str(), "x.com" | "twitter.com")
}

/// Timeline items on a mirror page, in page order, at most `limit`.
pub fn parse_mirror_tweets(html: &str, instance_base: &str, handle: &str, limit: usize) -> Vec<Tweet> {
    let mut out: Vec<Tweet> = Vec::new();
    if html.is_empty() {
        return out;
    }
    let doc = Html::parse_document(html);
    let base = Url::parse(&format!("{}/", instance_base.trim_end_matches('/'))).ok();

    for item in doc.select(&sel("article.timeline-item, div.timeline-item, div.tweet-body")) {
        let Some(id) = item
            .select(&sel(".tweet-date a[href]"))
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(status_id)
        else {
            continue;
        };
        if out.iter().any(|t| t.id == id) {
            continue;
        }

        let datetime = item
            .select(&sel(".tweet-date time[datetime]"))
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(rfc3339);
        let text = item
            .select(&sel(".tweet-content"))
            .next()
            .map(|t| element_text(&t))
            .unwrap_or_default();

        let mut media: Vec<String> = Vec::new();
        for img in item.select(&MIRROR_MEDIA) {
            let Some(src) = img.value().attr("src").and_then(|s| absolute_http(s, base.as_ref()))
            else {
                continue;
            };
            let src = normalize_avatar_url(&src);
            if !src.is_empty() && !media.contains(&src) {
                media.push(src);
            }
        }

        out.push(Tweet::new(handle, &id, datetime, text, media));
        if out.len() >= limit.max(1) {
            break;
        }
    }
    out
}

/// `<article>` timeline items on the canonical site, at most `limit`.
pub fn parse_x_tweets(html: &str, handle: &str, limit: usize) -> Vec<Tweet> {
    let mut out: Vec<Tweet> = Vec::new();
    if html.is_empty() {
        return out;
    }
    let doc = Html::parse_document(html);

    for article in doc.select(&sel("article")) {
        let Some(datetime) = article
            .select(&sel("time[datetime]"))
            .next()
            .and_then(|t| t.value().attr("datetime"))
        else {
            continue;
        };
        let Some(id) = article
            .select(&sel("a[href*='/status/']"))
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(status_id)
        else {
            continue;
        };
        if out.iter().any(|t| t.id == id) {
            continue;
        }

        let mut media: Vec<String> = Vec::new();
        for img in article.select(&sel("img[src]")) {
            let src = img.value().attr("src").unwrap_or_default();
            if src.contains("twimg.com") {
                let src = force_https(src);
                if !media.contains(&src) {
                    media.push(src);
                }
            }
        }

        out.push(Tweet::new(
            handle,
            &id,
            rfc3339(datetime),
            element_text(&article),
            media,
        ));
        if out.len() >= limit.max(1) {
            break;
        }
    }
    out
}

fn rfc3339(raw: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIRROR_PROFILE: &str = r#"
        <html><body>
        <div class="profile-card">
          <a class="profile-card-avatar" href="/pic/pbs.twimg.com%2Fprofile_images%2F1%2Fa_normal.jpg">
            <img src="/pic/pbs.twimg.com%2Fprofile_images%2F1%2Fa_bigger.jpg">
          </a>
          <div class="profile-card-tabs-name">
            <a class="profile-card-fullname" href="/acme_io">Acme Inc</a>
            <a class="profile-card-username" href="/acme_io">@acme_io</a>
          </div>
          <div class="profile-card-extra">
            <div class="profile-bio"><p>We build. <a href="/search?q=%23web3">#web3</a>
              more at docs.acme.io/start</p></div>
            <div class="profile-website"><a href="https://acme.io/">acme.io</a></div>
          </div>
        </div>
        </body></html>
    "#;

    #[test]
    fn mirror_profile_yields_links_name_and_avatar() {
        let p = parse_mirror_profile(MIRROR_PROFILE, "https://nitter.example", "acme_io");
        assert_eq!(p.display_name, "Acme Inc");
        assert_eq!(
            p.avatar_url,
            "https://pbs.twimg.com/profile_images/1/a_400x400.jpg"
        );
        assert!(p.bio_links.contains(&"https://acme.io".to_string()));
        assert!(p.bio_links.contains(&"https://docs.acme.io/start".to_string()));
        assert!(!p.bio_links.iter().any(|l| l.contains("nitter.example")));
    }

    #[test]
    fn mirror_avatar_falls_back_to_og_image() {
        let html = r#"
            <html><head>
              <meta property="og:image" content="https://nitter.example/pic/pbs.twimg.com%2Fprofile_images%2F5%2Fb_normal.png">
            </head><body><div class="profile-card">
              <a class="profile-card-fullname" href="/acme_io">Acme</a>
            </div></body></html>
        "#;
        let p = parse_mirror_profile(html, "https://nitter.example", "acme_io");
        assert_eq!(p.avatar_url, "https://pbs.twimg.com/profile_images/5/b_400x400.png");
    }

    #[test]
    fn handle_match_rules() {
        assert!(html_matches_handle(r#"<a href="/Acme_IO">x</a>"#, "acme_io"));
        assert!(html_matches_handle("<span>@acme_io</span>", "acme_io"));
        assert!(html_matches_handle(MIRROR_PROFILE, "acme_io"));
        assert!(!html_matches_handle(r#"<a href="/acme_io_fan">x</a>"#, "acme_io"));
        assert!(!html_matches_handle("", "acme_io"));
    }

    #[test]
    fn antibot_heuristics() {
        assert!(looks_antibot("<html>short</html>"));
        let challenge = format!("<html>{}Just a moment...</html>", " ".repeat(500));
        assert!(looks_antibot(&challenge));
        let timeline = r#"<div class="timeline-item">ok</div>"#;
        assert!(!looks_antibot(timeline));
        let normal = format!("<html>{}</html>", "content ".repeat(100));
        assert!(!looks_antibot(&normal));
    }

    #[test]
    fn x_profile_reads_testid_markup() {
        let html = r#"
            <div data-testid="UserName"><span>Acme Inc</span><span>@acme_io</span></div>
            <div data-testid="UserDescription">Hi <a href="/hashtag/web3">#web3</a>
              links: <a href="https://t.co/abc">linktr.ee/acme</a></div>
            <a data-testid="UserUrl" href="https://t.co/xyz"><span>acme.io</span></a>
            <img src="https://pbs.twimg.com/profile_images/7/me_normal.jpg">
        "#;
        let p = parse_x_profile(html, "https://x.com/acme_io");
        assert_eq!(p.display_name, "Acme Inc");
        assert_eq!(p.avatar_url, "https://pbs.twimg.com/profile_images/7/me_400x400.jpg");
        assert!(p.bio_links.contains(&"https://t.co/xyz".to_string()));
        assert!(p.bio_links.contains(&"https://t.co/abc".to_string()));
        assert!(!p.bio_links.iter().any(|l| l.contains("hashtag")));
    }

    #[test]
    fn mirror_tweets_parse_and_dedupe() {
        let html = r#"
            <div class="timeline-item">
              <div class="tweet-body">
                <span class="tweet-date"><a href="/acme_io/status/111#m">1h</a>
                  <time datetime="2024-10-28T08:11:21Z"></time></span>
                <div class="tweet-content media-body">Shipping   v2 today</div>
                <div class="attachments"><img src="/pic/media%2FAbC.jpg%3Fname%3Dsmall"></div>
              </div>
            </div>
            <div class="timeline-item">
              <span class="tweet-date"><a href="/acme_io/status/222">2h</a></span>
              <div class="tweet-content">second</div>
            </div>
        "#;
        let tweets = parse_mirror_tweets(html, "https://nitter.example", "acme_io", 10);
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].id, "111");
        assert_eq!(tweets[0].status_url, "https://x.com/acme_io/status/111");
        assert_eq!(tweets[0].text, "Shipping v2 today");
        assert_eq!(tweets[0].datetime.as_deref(), Some("2024-10-28T08:11:21+00:00"));
        assert_eq!(tweets[0].media, vec!["https://pbs.twimg.com/media/AbC.jpg"]);
        assert_eq!(tweets[1].datetime, None);
    }

    #[test]
    fn x_tweets_need_time_and_status_link() {
        let html = r#"
            <article><time datetime="2024-10-28T08:11:21.000Z"></time>
              <a href="/acme_io/status/9">link</a> hello world
              <img src="https://pbs.twimg.com/media/z.jpg"></article>
            <article><a href="/acme_io/status/10">no time</a></article>
        "#;
        let tweets = parse_x_tweets(html, "acme_io", 5);
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].id, "9");
        assert!(tweets[0].text.contains("hello world"));
        assert_eq!(tweets[0].media, vec!["https://pbs.twimg.com/media/z.jpg"]);
    }
}
