// Trait seams for the resolver.
//
// XApi wraps the structured API client so the guest-token manager and the
// API tier can be driven by MockXApi. ProfileSource is what the
// verification engine needs from the multi-tier fetcher.

use async_trait::async_trait;
use sociallink_common::{ProfileData, Result};
use xapi_client::{TimelineTweet, UserResult, XApiClient};

#[async_trait]
pub trait XApi: Send + Sync {
    async fn activate_guest(&self) -> xapi_client::Result<String>;

    async fn user_by_screen_name(
        &self,
        handle: &str,
        guest_token: &str,
    ) -> xapi_client::Result<UserResult>;

    async fn user_tweets(
        &self,
        user_id: &str,
        count: u32,
        limit: usize,
        guest_token: &str,
    ) -> xapi_client::Result<Vec<TimelineTweet>>;
}

#[async_trait]
impl XApi for XApiClient {
    async fn activate_guest(&self) -> xapi_client::Result<String> {
        XApiClient::activate_guest(self).await
    }

    async fn user_by_screen_name(
        &self,
        handle: &str,
        guest_token: &str,
    ) -> xapi_client::Result<UserResult> {
        XApiClient::user_by_screen_name(self, handle, guest_token).await
    }

    async fn user_tweets(
        &self,
        user_id: &str,
        count: u32,
        limit: usize,
        guest_token: &str,
    ) -> xapi_client::Result<Vec<TimelineTweet>> {
        XApiClient::user_tweets(self, user_id, count, limit, guest_token).await
    }
}

/// Handle → bio links, avatar, display name.
///
/// `Ok` with an empty profile means the profile was read and had nothing;
/// `Err` means no source could be read at all.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn profile(&self, handle: &str, want_avatar: bool) -> Result<ProfileData>;

    /// Drop anything cached for the current run.
    fn clear_cache(&self) {}
}
