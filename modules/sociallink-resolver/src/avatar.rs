use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::http::PageFetcher;
use crate::normalize::{handle_of, normalize_avatar_url};
use crate::traits::ProfileSource;

/// Save a profile's avatar as `dir/<stem>.<ext>`, the extension taken from
/// the response content type (or the image URL when the type is generic).
///
/// With an empty `avatar_url` the profile is fetched (avatar requested) to
/// find one. The image is requested with the profile as referer and written
/// only for a 200 response with a non-empty `image/*` body.
pub async fn download_avatar(
    profiles: &dyn ProfileSource,
    pages: &dyn PageFetcher,
    avatar_url: &str,
    profile_url: &str,
    dir: &Path,
    stem: &str,
) -> Option<PathBuf> {
    let mut url = normalize_avatar_url(avatar_url);
    if url.is_empty() {
        let handle = handle_of(profile_url)?;
        url = match profiles.profile(&handle, true).await {
            Ok(p) => normalize_avatar_url(&p.avatar_url),
            Err(e) => {
                debug!(handle = handle.as_str(), error = %e, "No profile for avatar");
                return None;
            }
        };
        if url.is_empty() {
            return None;
        }
    }

    let page = match pages.get(&url, &[("Referer", profile_url)]).await {
        Ok(p) => p,
        Err(e) => {
            warn!(url = url.as_str(), error = %e, "Avatar download failed");
            return None;
        }
    };
    let is_image = page.content_type.to_ascii_lowercase().starts_with("image/");
    if page.status != 200 || page.body.is_empty() || !is_image {
        info!(
            url = url.as_str(),
            status = page.status,
            content_type = page.content_type.as_str(),
            "Avatar response not an image"
        );
        return None;
    }

    let path = dir.join(format!("{stem}.{}", image_extension(&page.content_type, &url)));
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "Cannot create avatar directory");
        return None;
    }
    if let Err(e) = tokio::fs::write(&path, &page.body).await {
        warn!(path = %path.display(), error = %e, "Cannot write avatar");
        return None;
    }
    info!(path = %path.display(), bytes = page.body.len(), "Avatar saved");
    Some(path)
}

fn image_extension(content_type: &str, url: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/png" => return "png",
        "image/gif" => return "gif",
        "image/webp" => return "webp",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => return "jpg",
        _ => {}
    }
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("png") => "png",
        Some("gif") => "gif",
        Some("webp") => "webp",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPageFetcher, MockProfileSource};
    use sociallink_common::ProfileData;

    const AVATAR: &str = "https://pbs.twimg.com/profile_images/1/a_400x400.jpg";

    #[tokio::test]
    async fn writes_image_with_referer() {
        let dir = tempfile::tempdir().unwrap();
        let pages = MockPageFetcher::new().on_image(AVATAR, "image/jpeg", b"\xff\xd8jpeg");
        let profiles = MockProfileSource::new();

        let path = download_avatar(
            &profiles,
            &pages,
            "https://pbs.twimg.com/profile_images/1/a_normal.jpg",
            "https://x.com/acme",
            &dir.path().join("avatars"),
            "acme",
        )
        .await
        .unwrap();

        assert_eq!(path, dir.path().join("avatars").join("acme.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\xff\xd8jpeg");
        assert!(pages
            .headers_seen()
            .contains(&(AVATAR.to_string(), "Referer".to_string(), "https://x.com/acme".to_string())));
        assert!(profiles.calls().is_empty());
    }

    #[tokio::test]
    async fn looks_up_profile_when_url_missing() {
        let dir = tempfile::tempdir().unwrap();
        let pages = MockPageFetcher::new().on_image(AVATAR, "image/png", b"png");
        let profiles = MockProfileSource::new().on_profile(
            "acme",
            ProfileData {
                avatar_url: AVATAR.to_string(),
                ..ProfileData::default()
            },
        );
        let path = download_avatar(&profiles, &pages, "", "https://x.com/acme", dir.path(), "acme").await;
        assert_eq!(path, Some(dir.path().join("acme.png")));
        assert_eq!(profiles.calls(), vec!["acme"]);
    }

    #[tokio::test]
    async fn non_image_or_empty_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = MockProfileSource::new();

        let html = MockPageFetcher::new().on_page(AVATAR, 200, "<html>blocked</html>");
        assert!(download_avatar(&profiles, &html, AVATAR, "https://x.com/a", dir.path(), "a").await.is_none());

        let empty = MockPageFetcher::new().on_image(AVATAR, "image/jpeg", b"");
        assert!(download_avatar(&profiles, &empty, AVATAR, "https://x.com/a", dir.path(), "a").await.is_none());
        assert!(!dir.path().join("a.jpg").exists());
    }

    #[test]
    fn extension_follows_content_type_then_url() {
        assert_eq!(image_extension("image/png", "https://x/a.jpg"), "png");
        assert_eq!(image_extension("image/jpeg; charset=binary", "https://x/a"), "jpg");
        assert_eq!(image_extension("image/webp", "https://x/a"), "webp");
        assert_eq!(image_extension("image/*", "https://x/a_400x400.PNG?v=1"), "png");
        assert_eq!(image_extension("image/x-icon", "https://x/avatar"), "jpg");
    }
}
