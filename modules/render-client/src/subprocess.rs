use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{parse_envelope, RenderError, RenderOptions, RenderResult, Renderer, Result};

/// Max concurrent helper processes. Each one drives a full browser.
const MAX_CONCURRENT_HELPERS: usize = 2;
/// Grace period on top of the page timeout before the helper is killed.
const PROCESS_GRACE: Duration = Duration::from_secs(15);

/// Shells out to a render helper (e.g. `node playwright.js`) and parses the
/// JSON envelope it prints on stdout.
pub struct SubprocessRenderer {
    command: String,
    args: Vec<String>,
    semaphore: Semaphore,
}

impl SubprocessRenderer {
    pub fn new(command: &str, args: Vec<String>) -> Self {
        info!(command, max_concurrent = MAX_CONCURRENT_HELPERS, "SubprocessRenderer initialized");
        Self {
            command: command.to_string(),
            args,
            semaphore: Semaphore::new(MAX_CONCURRENT_HELPERS),
        }
    }

    fn build_args(&self, url: &str, options: &RenderOptions) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--url".to_string(),
            url.to_string(),
            "--wait".to_string(),
            options.wait.as_str().to_string(),
            "--timeout".to_string(),
            options.timeout.as_millis().max(1).to_string(),
            "--ua".to_string(),
            options.user_agent.clone().unwrap_or_default(),
        ]);
        if let Some(proxy) = &options.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }
        if let Some(cookies) = &options.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string());
        }
        args
    }
}

#[async_trait]
impl Renderer for SubprocessRenderer {
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<RenderResult> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RenderError::Spawn("render semaphore closed".to_string()))?;

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(self.build_args(url, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let hard_limit = options.timeout + PROCESS_GRACE;
        debug!(url, wait = %options.wait, timeout_ms = options.timeout.as_millis() as u64, "Rendering page");

        let output = match tokio::time::timeout(hard_limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(url, error = %e, "Render helper failed to start");
                return Err(RenderError::Spawn(e.to_string()));
            }
            Err(_) => {
                warn!(url, "Render helper timed out");
                return Err(RenderError::Timeout(hard_limit.as_millis() as u64));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, status = ?output.status.code(), stderr = %stderr.trim(), "Render helper exited with error");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = parse_envelope(&stdout)?;
        info!(url, status = result.status, bytes = result.html.len(), "Rendered");
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> SubprocessRenderer {
        // Extra args appended by the renderer land in $1.. and are ignored.
        SubprocessRenderer::new("sh", vec!["-c".to_string(), script.to_string(), "helper".to_string()])
    }

    #[test]
    fn args_carry_url_wait_timeout_and_optional_json() {
        let renderer = SubprocessRenderer::new("node", vec!["playwright.js".to_string()]);
        let options = RenderOptions {
            timeout: Duration::from_secs(10),
            user_agent: Some("UA/1".to_string()),
            proxy: Some(serde_json::json!({ "server": "http://p:1" })),
            ..RenderOptions::default()
        };
        let args = renderer.build_args("https://x.com/acme", &options);
        assert_eq!(args[0], "playwright.js");
        assert!(args.windows(2).any(|w| w[0] == "--url" && w[1] == "https://x.com/acme"));
        assert!(args.windows(2).any(|w| w[0] == "--timeout" && w[1] == "10000"));
        assert!(args.windows(2).any(|w| w[0] == "--wait" && w[1] == "domcontentloaded"));
        assert!(args.iter().any(|a| a == "--proxy"));
        assert!(!args.iter().any(|a| a == "--cookies"));
    }

    #[tokio::test]
    async fn parses_helper_stdout() {
        let renderer = sh(r#"printf '%s' '{"ok":true,"html":"<p>hi</p>","status":200}'"#);
        let res = renderer
            .render("https://example.com", &RenderOptions::default())
            .await
            .unwrap();
        assert!(res.ok);
        assert_eq!(res.html, "<p>hi</p>");
        assert_eq!(res.status, 200);
    }

    #[tokio::test]
    async fn garbage_stdout_is_envelope_error() {
        let renderer = sh("echo not json");
        let err = renderer
            .render("https://example.com", &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Envelope(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let renderer = SubprocessRenderer::new("/nonexistent/render-helper", Vec::new());
        let err = renderer
            .render("https://example.com", &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Spawn(_)));
    }
}
