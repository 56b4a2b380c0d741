//! Page loader that renders through headless Chromium (Node.js + Playwright).

use crate::crawl::{LoadedPage, PageLoader};
use answerpipe_core::{Error, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

// Expected setup: Node.js on PATH (or `node_bin`), the `playwright` npm package
// resolvable by Node, and a Chromium install (`npx playwright install chromium`).
// stdout is JSON-only.
const JS: &str = r#"
const fs = require('fs');

function ok(obj) { process.stdout.write(JSON.stringify(obj)); }
function bad(code, message) { ok({ ok: false, error: { code, message } }); }

async function main() {
  let req;
  try { req = JSON.parse(fs.readFileSync(0, 'utf8')); } catch (e) { return bad('invalid_params', 'bad JSON args'); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return bad('not_configured', 'Playwright is not installed for Node.js (require("playwright") failed)');
  }

  const url = String(req.url || '').trim();
  if (!url) return bad('invalid_params', 'url must be non-empty');
  const timeoutMs = Number(req.timeout_ms || 20000);

  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true });
    const context = await browser.newContext({ serviceWorkers: 'block' });
    const page = await context.newPage();
    await page.route('**/*', (route) => {
      const rt = route.request().resourceType();
      if (rt === 'image' || rt === 'media' || rt === 'font') return route.abort();
      return route.continue();
    });
    await page.goto(url, { waitUntil: 'domcontentloaded', timeout: timeoutMs });
    try { await page.waitForLoadState('networkidle', { timeout: Math.min(5000, timeoutMs) }); } catch (_) {}
    ok({ ok: true, final_url: page.url(), title: await page.title(), html: await page.content() });
  } catch (e) {
    bad('fetch_failed', String(e && e.message ? e.message : e));
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => bad('fetch_failed', String(e && e.message ? e.message : e)));
"#;

#[derive(Debug, Clone)]
pub struct PlaywrightPageLoader {
    node_bin: String,
    timeout_ms: u64,
}

impl Default for PlaywrightPageLoader {
    fn default() -> Self {
        Self {
            node_bin: "node".to_string(),
            timeout_ms: 20_000,
        }
    }
}

impl PlaywrightPageLoader {
    pub fn new(node_bin: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            node_bin: node_bin.into(),
            timeout_ms,
        }
    }

    fn hard_timeout(&self) -> Duration {
        // Node startup and browser launch come on top of the navigation timeout.
        Duration::from_millis(self.timeout_ms.saturating_add(10_000))
    }
}

fn parse_render_output(url: &str, stdout: &str, stderr: &str) -> Result<LoadedPage> {
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        if stderr.trim().is_empty() {
            Error::Fetch(format!("Playwright render returned invalid JSON: {e}"))
        } else {
            Error::Fetch(format!(
                "Playwright render returned invalid JSON: {e}. stderr: {}",
                stderr.trim()
            ))
        }
    })?;

    if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
        let code = v
            .pointer("/error/code")
            .and_then(|x| x.as_str())
            .unwrap_or("fetch_failed");
        let message = v
            .pointer("/error/message")
            .and_then(|x| x.as_str())
            .unwrap_or("Playwright render failed")
            .to_string();
        return Err(match code {
            "not_configured" => Error::NotConfigured(message),
            "invalid_params" => Error::InvalidInput(message),
            _ => Error::Fetch(message),
        });
    }

    let html = v
        .get("html")
        .and_then(|x| x.as_str())
        .unwrap_or("")
        .to_string();
    if html.trim().is_empty() {
        return Err(Error::Fetch(
            "Playwright render returned empty HTML".to_string(),
        ));
    }
    Ok(LoadedPage {
        url: v
            .get("final_url")
            .and_then(|x| x.as_str())
            .unwrap_or(url)
            .to_string(),
        title: v
            .get("title")
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string(),
        html,
    })
}

#[async_trait::async_trait]
impl PageLoader for PlaywrightPageLoader {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn load(&self, url: &str) -> Result<LoadedPage> {
        let args_json = serde_json::json!({
            "url": url,
            "timeout_ms": self.timeout_ms,
        })
        .to_string();

        let mut child = tokio::process::Command::new(&self.node_bin)
            .arg("-e")
            .arg(JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "Playwright render requires Node.js (`{}`): {e}",
                    self.node_bin
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(args_json.as_bytes()).await;
            // EOF so readFileSync(0) returns.
            let _ = stdin.shutdown().await;
        }

        let hard_timeout = self.hard_timeout();
        let out = match tokio::time::timeout(hard_timeout, child.wait_with_output()).await {
            Ok(r) => r.map_err(|e| Error::Fetch(format!("Playwright render failed: {e}")))?,
            // Dropping the future drops the child, which kill_on_drop terminates.
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "Playwright render hard timeout after {}ms",
                    hard_timeout.as_millis()
                )))
            }
        };

        parse_render_output(
            url,
            &String::from_utf8_lossy(&out.stdout),
            &String::from_utf8_lossy(&out.stderr),
        )
    }
}
