use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

/// Date format used by `legacy.created_at`, e.g. "Mon Oct 28 08:11:21 +0000 2024".
const LEGACY_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Response body of `guest/activate.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestActivation {
    pub guest_token: Option<String>,
}

// --- UserByScreenName ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserResponse {
    #[serde(default)]
    pub data: Option<UserData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub user: Option<UserEnvelope>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserEnvelope {
    #[serde(default)]
    pub result: Option<UserResult>,
}

/// The `data.user.result` object of a `UserByScreenName` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserResult {
    pub rest_id: Option<String>,
    #[serde(default)]
    pub legacy: UserLegacy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserLegacy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub description: String,
    pub profile_image_url_https: Option<String>,
    #[serde(default)]
    pub entities: UserEntities,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserEntities {
    #[serde(default)]
    pub url: Option<UrlEntity>,
    #[serde(default)]
    pub description: Option<UrlEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlEntity {
    #[serde(default)]
    pub urls: Vec<UrlRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlRef {
    pub expanded_url: Option<String>,
    pub url: Option<String>,
}

impl UserResponse {
    pub fn into_result(self) -> Option<UserResult> {
        self.data?.user?.result
    }
}

impl UserLegacy {
    /// Outbound URLs from the profile's website field followed by those in the
    /// description, expanded where the API provides it. Order preserved, deduped.
    pub fn bio_urls(&self) -> Vec<String> {
        let website = self.entities.url.iter().flat_map(|e| e.urls.iter());
        let description = self.entities.description.iter().flat_map(|e| e.urls.iter());

        let mut out: Vec<String> = Vec::new();
        for r in website.chain(description) {
            let Some(u) = r.expanded_url.as_deref().or(r.url.as_deref()) else {
                continue;
            };
            let u = u.trim();
            if !u.is_empty() && !out.iter().any(|seen| seen == u) {
                out.push(u.to_string());
            }
        }
        out
    }
}

// --- UserTweetsAndReplies ---

/// A tweet unpacked from timeline instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineTweet {
    pub id: String,
    /// Whitespace-collapsed `full_text` (or `text`).
    pub text: String,
    /// Raw `created_at` in the legacy date format.
    pub created_at: Option<String>,
    /// Media URLs from `extended_entities`, https, deduped.
    pub media: Vec<String>,
}

impl TimelineTweet {
    /// `created_at` converted to RFC 3339, if it parses.
    pub fn created_at_rfc3339(&self) -> Option<String> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_str(raw, LEGACY_DATE_FORMAT)
            .ok()
            .map(|dt| dt.to_rfc3339())
    }
}

/// Unpack tweets from a `UserTweetsAndReplies` body.
///
/// Only `TimelineAddEntries` instructions with `tweet-*` entries holding a
/// `TimelineTweet` item are considered; the payload is read from `legacy` or,
/// for visibility-wrapped results, `tweet.legacy`. Stops after `limit` items.
pub fn parse_timeline(body: &Value, limit: usize) -> Vec<TimelineTweet> {
    let Some(instructions) = body
        .pointer("/data/user/result/timeline/timeline/instructions")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for instr in instructions {
        if instr.get("type").and_then(Value::as_str) != Some("TimelineAddEntries") {
            continue;
        }
        let Some(entries) = instr.get("entries").and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            if let Some(tweet) = parse_entry(entry) {
                items.push(tweet);
                if items.len() >= limit {
                    return items;
                }
            }
        }
    }
    items
}

fn parse_entry(entry: &Value) -> Option<TimelineTweet> {
    let entry_id = entry.get("entryId").and_then(Value::as_str)?;
    if !entry_id.starts_with("tweet-") {
        return None;
    }
    let content = entry.get("content")?;
    if content.get("entryType").and_then(Value::as_str) != Some("TimelineTimelineItem") {
        return None;
    }
    let item = content.get("itemContent")?;
    if item.get("itemType").and_then(Value::as_str) != Some("TimelineTweet") {
        return None;
    }
    let result = item.pointer("/tweet_results/result")?;
    let legacy = result
        .get("legacy")
        .or_else(|| result.pointer("/tweet/legacy"))?;

    let id = match legacy.get("id_str").or_else(|| legacy.get("id")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };
    if id.is_empty() {
        return None;
    }

    let raw_text = legacy
        .get("full_text")
        .or_else(|| legacy.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let text = raw_text.split_whitespace().collect::<Vec<_>>().join(" ");

    let created_at = legacy
        .get("created_at")
        .and_then(Value::as_str)
        .map(String::from);

    let mut media: Vec<String> = Vec::new();
    if let Some(list) = legacy
        .pointer("/extended_entities/media")
        .and_then(Value::as_array)
    {
        for m in list {
            let src = m
                .get("media_url_https")
                .or_else(|| m.get("media_url"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if src.is_empty() {
                continue;
            }
            let src = match src.strip_prefix("http://") {
                Some(rest) => format!("https://{rest}"),
                None => src.to_string(),
            };
            if !media.contains(&src) {
                media.push(src);
            }
        }
    }

    Some(TimelineTweet {
        id,
        text,
        created_at,
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(entry_id: &str, legacy: Value) -> Value {
        json!({
            "entryId": entry_id,
            "content": {
                "entryType": "TimelineTimelineItem",
                "itemContent": {
                    "itemType": "TimelineTweet",
                    "tweet_results": { "result": { "legacy": legacy } }
                }
            }
        })
    }

    fn timeline(entries: Vec<Value>) -> Value {
        json!({
            "data": { "user": { "result": { "timeline": { "timeline": {
                "instructions": [
                    { "type": "TimelinePinEntry" },
                    { "type": "TimelineAddEntries", "entries": entries }
                ]
            }}}}}
        })
    }

    #[test]
    fn parses_tweet_entries_and_skips_cursors() {
        let body = timeline(vec![
            entry(
                "tweet-1",
                json!({
                    "id_str": "1",
                    "full_text": "hello\n\n  world",
                    "created_at": "Mon Oct 28 08:11:21 +0000 2024",
                    "extended_entities": { "media": [
                        { "media_url_https": "https://pbs.twimg.com/media/a.jpg" },
                        { "media_url": "http://pbs.twimg.com/media/a.jpg" }
                    ]}
                }),
            ),
            json!({ "entryId": "cursor-top-1", "content": { "entryType": "TimelineTimelineCursor" } }),
        ]);

        let tweets = parse_timeline(&body, 10);
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].id, "1");
        assert_eq!(tweets[0].text, "hello world");
        assert_eq!(tweets[0].media, vec!["https://pbs.twimg.com/media/a.jpg"]);
        assert_eq!(
            tweets[0].created_at_rfc3339().as_deref(),
            Some("2024-10-28T08:11:21+00:00")
        );
    }

    #[test]
    fn visibility_wrapped_result_reads_nested_legacy() {
        let body = timeline(vec![json!({
            "entryId": "tweet-9",
            "content": {
                "entryType": "TimelineTimelineItem",
                "itemContent": {
                    "itemType": "TimelineTweet",
                    "tweet_results": { "result": {
                        "__typename": "TweetWithVisibilityResults",
                        "tweet": { "legacy": { "id_str": "9", "full_text": "wrapped" } }
                    }}
                }
            }
        })]);

        let tweets = parse_timeline(&body, 10);
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].text, "wrapped");
    }

    #[test]
    fn stops_at_limit() {
        let entries = (0..5)
            .map(|i| entry(&format!("tweet-{i}"), json!({ "id_str": i.to_string(), "full_text": "x" })))
            .collect();
        assert_eq!(parse_timeline(&timeline(entries), 2).len(), 2);
    }

    #[test]
    fn missing_instructions_yield_empty() {
        assert!(parse_timeline(&json!({ "data": {} }), 5).is_empty());
    }

    #[test]
    fn bio_urls_prefer_expanded_and_dedupe() {
        let resp: UserResponse = serde_json::from_value(json!({
            "data": { "user": { "result": {
                "rest_id": "42",
                "legacy": {
                    "name": "Acme",
                    "screen_name": "acme_io",
                    "description": "we build",
                    "entities": {
                        "url": { "urls": [ { "url": "https://t.co/a", "expanded_url": "https://acme.io" } ] },
                        "description": { "urls": [
                            { "url": "https://t.co/b", "expanded_url": "https://acme.io" },
                            { "url": "https://t.co/c" }
                        ] }
                    }
                }
            }}}
        }))
        .unwrap();

        let user = resp.into_result().unwrap();
        assert_eq!(user.rest_id.as_deref(), Some("42"));
        assert_eq!(
            user.legacy.bio_urls(),
            vec!["https://acme.io".to_string(), "https://t.co/c".to_string()]
        );
    }
}
