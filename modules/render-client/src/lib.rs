pub mod browserless;
pub mod error;
pub mod subprocess;

pub use browserless::BrowserlessRenderer;
pub use error::{RenderError, Result};
pub use subprocess::SubprocessRenderer;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

/// Render a URL in a real browser and hand back its markup.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<RenderResult>;
}

/// Page lifecycle event the renderer waits for before capturing markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    Load,
    #[default]
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle",
        }
    }
}

impl fmt::Display for WaitUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub wait: WaitUntil,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// `{server, username?, password?}`.
    pub proxy: Option<serde_json::Value>,
    /// Cookie jar passed through to the browser context.
    pub cookies: Option<serde_json::Value>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            wait: WaitUntil::default(),
            timeout: Duration::from_secs(30),
            user_agent: None,
            proxy: None,
            cookies: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AntiBot {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderResult {
    pub ok: bool,
    pub html: String,
    pub status: u16,
    pub anti_bot: AntiBot,
}

impl RenderResult {
    /// True when the helper flagged a challenge page.
    pub fn blocked(&self) -> bool {
        self.anti_bot.detected || !self.anti_bot.kind.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default, rename = "antiBot")]
    anti_bot: Option<AntiBot>,
}

/// Parse the helper's stdout: `{ok, html|text, status, antiBot: {detected, kind}}`.
pub fn parse_envelope(stdout: &str) -> Result<RenderResult> {
    let raw = stdout.trim();
    if !raw.starts_with('{') {
        return Err(RenderError::Envelope(if raw.is_empty() {
            "empty output".to_string()
        } else {
            "output is not a JSON object".to_string()
        }));
    }

    let env: Envelope =
        serde_json::from_str(raw).map_err(|e| RenderError::Envelope(e.to_string()))?;

    let html = env
        .html
        .filter(|h| !h.is_empty())
        .or(env.text)
        .unwrap_or_default();

    let status = match env.status {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };

    Ok(RenderResult {
        ok: env.ok,
        html: html.trim().to_string(),
        status: u16::try_from(status).unwrap_or(0),
        anti_bot: env.anti_bot.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_envelope() {
        let out = r#"{"ok":true,"html":"<html>hi</html>","status":200,"antiBot":{"detected":false,"kind":""}}"#;
        let res = parse_envelope(out).unwrap();
        assert!(res.ok);
        assert_eq!(res.html, "<html>hi</html>");
        assert_eq!(res.status, 200);
        assert!(!res.blocked());
    }

    #[test]
    fn text_is_used_when_html_missing() {
        let res = parse_envelope(r#"{"ok":true,"text":"plain","status":"403"}"#).unwrap();
        assert_eq!(res.html, "plain");
        assert_eq!(res.status, 403);
    }

    #[test]
    fn anti_bot_kind_marks_blocked() {
        let res =
            parse_envelope(r#"{"ok":false,"html":"","status":503,"antiBot":{"kind":"cloudflare"}}"#)
                .unwrap();
        assert!(res.blocked());
        assert_eq!(res.anti_bot.kind, "cloudflare");
    }

    #[test]
    fn empty_output_is_malformed() {
        assert!(matches!(parse_envelope("   "), Err(RenderError::Envelope(_))));
    }

    #[test]
    fn log_noise_before_json_is_malformed() {
        assert!(matches!(
            parse_envelope("launching browser...\n{\"ok\":true}"),
            Err(RenderError::Envelope(_))
        ));
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(matches!(parse_envelope("{\"ok\": tru"), Err(RenderError::Envelope(_))));
    }
}
