pub mod error;
pub mod types;

pub use error::{Result, XApiError};
pub use types::{
    parse_timeline, TimelineTweet, UrlEntity, UrlRef, UserEntities, UserLegacy, UserResponse,
    UserResult,
};

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use types::GuestActivation;

/// Public web-client bearer used when none is configured.
pub const DEFAULT_BEARER: &str = "Bearer AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs=1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const GUEST_ACTIVATE: &str = "https://api.twitter.com/1.1/guest/activate.json";
const USER_BY_SCREEN_NAME: &str =
    "https://twitter.com/i/api/graphql/7mjxD3-C6BxitPMVQ6w0-Q/UserByScreenName";
const USER_TWEETS_AND_REPLIES: &str =
    "https://twitter.com/i/api/graphql/BSKxQ9_IaCoVyIvQHQROIQ/UserTweetsAndReplies";

pub struct XApiClient {
    client: reqwest::Client,
    bearer: String,
    user_agent: String,
}

impl XApiClient {
    pub fn new(
        bearer: &str,
        user_agent: &str,
        timeout: Duration,
        proxy: Option<reqwest::Proxy>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;

        let bearer = bearer.trim();
        let bearer = if bearer.is_empty() {
            DEFAULT_BEARER.to_string()
        } else if bearer.starts_with("Bearer ") {
            bearer.to_string()
        } else {
            format!("Bearer {bearer}")
        };

        Ok(Self {
            client,
            bearer,
            user_agent: user_agent.to_string(),
        })
    }

    /// Issue a fresh guest token.
    pub async fn activate_guest(&self) -> Result<String> {
        let resp = self
            .client
            .post(GUEST_ACTIVATE)
            .header("Authorization", &self.bearer)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(XApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let activation: GuestActivation = resp.json().await?;
        activation
            .guest_token
            .filter(|t| !t.is_empty())
            .ok_or(XApiError::MissingField("guest_token"))
    }

    /// Look up a user by handle. Returns the `data.user.result` object.
    pub async fn user_by_screen_name(&self, handle: &str, guest_token: &str) -> Result<UserResult> {
        let variables = json!({
            "screen_name": handle,
            "withSafetyModeUserFields": true,
        });
        let resp: UserResponse = self
            .graphql(USER_BY_SCREEN_NAME, &variables, guest_token)
            .await?;
        resp.into_result().ok_or(XApiError::MissingField("data.user.result"))
    }

    /// Fetch a user's tweets-and-replies timeline and unpack up to `limit` tweets.
    /// `count` is what the API is asked for; callers over-fetch to survive filtering.
    pub async fn user_tweets(
        &self,
        user_id: &str,
        count: u32,
        limit: usize,
        guest_token: &str,
    ) -> Result<Vec<TimelineTweet>> {
        let variables = json!({
            "userId": user_id,
            "count": count,
            "includePromotedContent": false,
            "withCommunity": true,
            "withSuperFollowsUserFields": true,
            "withDownvotePerspective": false,
            "withReactionsMetadata": false,
            "withReactionsPerspective": false,
            "withSuperFollowsTweetFields": true,
            "withVoice": true,
            "withV2Timeline": false,
        });
        let body: Value = self
            .graphql(USER_TWEETS_AND_REPLIES, &variables, guest_token)
            .await?;
        Ok(parse_timeline(&body, limit))
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        variables: &Value,
        guest_token: &str,
    ) -> Result<T> {
        let resp = self
            .client
            .get(endpoint)
            .header("Authorization", &self.bearer)
            .header("x-guest-token", guest_token)
            .header("User-Agent", &self.user_agent)
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://x.com/")
            .query(&[("variables", variables.to_string())])
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let message = resp.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        check_content_type(&content_type)?;

        let bytes = resp.bytes().await?;
        tracing::debug!(endpoint, bytes = bytes.len(), "GraphQL response received");
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Error for a non-2xx GraphQL answer. 401/403/429 mean the guest token was
/// rejected or throttled.
fn status_error(status: u16, message: String) -> XApiError {
    match status {
        401 | 403 | 429 => XApiError::Auth { status },
        _ => XApiError::Api { status, message },
    }
}

/// Challenge and login pages come back as 200 with HTML.
fn check_content_type(content_type: &str) -> Result<()> {
    if content_type.to_ascii_lowercase().contains("application/json") {
        Ok(())
    } else {
        Err(XApiError::ContentType(content_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_rejections_map_to_auth() {
        for status in [401, 403, 429] {
            assert!(matches!(
                status_error(status, String::new()),
                XApiError::Auth { status: s } if s == status
            ));
        }
        match status_error(500, "boom".to_string()) {
            XApiError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn only_json_bodies_are_accepted() {
        assert!(check_content_type("application/json; charset=utf-8").is_ok());
        assert!(check_content_type("Application/JSON").is_ok());
        assert!(matches!(
            check_content_type("text/html"),
            Err(XApiError::ContentType(ct)) if ct == "text/html"
        ));
        assert!(matches!(check_content_type(""), Err(XApiError::ContentType(_))));
    }

    #[test]
    fn bearer_gets_prefixed_or_defaulted() {
        let timeout = Duration::from_secs(5);
        let bare = XApiClient::new("abc", "ua", timeout, None).unwrap();
        assert_eq!(bare.bearer, "Bearer abc");
        let prefixed = XApiClient::new("Bearer abc", "ua", timeout, None).unwrap();
        assert_eq!(prefixed.bearer, "Bearer abc");
        let empty = XApiClient::new("  ", "ua", timeout, None).unwrap();
        assert_eq!(empty.bearer, DEFAULT_BEARER);
    }
}
