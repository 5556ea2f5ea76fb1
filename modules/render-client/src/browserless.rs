use async_trait::async_trait;
use tracing::info;

use crate::{RenderError, RenderOptions, RenderResult, Renderer, Result, WaitUntil};

/// Renders through a Browserless `/content` endpoint instead of a local helper.
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn request_body(url: &str, options: &RenderOptions) -> serde_json::Value {
        let wait = match options.wait {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle2",
        };
        let mut body = serde_json::json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": wait,
                "timeout": options.timeout.as_millis() as u64,
            },
        });
        if let Some(cookies @ serde_json::Value::Array(_)) = &options.cookies {
            body["cookies"] = cookies.clone();
        }
        body
    }
}

#[async_trait]
impl Renderer for BrowserlessRenderer {
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<RenderResult> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let mut req = self
            .client
            .post(&endpoint)
            .timeout(options.timeout)
            .header("Content-Type", "application/json")
            .json(&Self::request_body(url, options));
        if let Some(ua) = &options.user_agent {
            req = req.header("User-Agent", ua);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_server_error() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let html = resp.text().await?;
        info!(url, renderer = "browserless", status = status.as_u16(), bytes = html.len(), "Rendered");

        Ok(RenderResult {
            ok: status.is_success(),
            html,
            status: status.as_u16(),
            anti_bot: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn body_maps_network_idle_and_timeout() {
        let options = RenderOptions {
            wait: WaitUntil::NetworkIdle,
            timeout: Duration::from_millis(1500),
            ..RenderOptions::default()
        };
        let body = BrowserlessRenderer::request_body("https://x.com/acme", &options);
        assert_eq!(body["url"], "https://x.com/acme");
        assert_eq!(body["gotoOptions"]["waitUntil"], "networkidle2");
        assert_eq!(body["gotoOptions"]["timeout"], 1500);
        assert!(body.get("cookies").is_none());
    }

    #[test]
    fn cookie_array_is_forwarded() {
        let options = RenderOptions {
            cookies: Some(serde_json::json!([{ "name": "a", "value": "b", "domain": ".x.com" }])),
            ..RenderOptions::default()
        };
        let body = BrowserlessRenderer::request_body("https://x.com/acme", &options);
        assert_eq!(body["cookies"][0]["name"], "a");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let r = BrowserlessRenderer::new("http://localhost:3000/", None).unwrap();
        assert_eq!(r.base_url, "http://localhost:3000");
    }
}
