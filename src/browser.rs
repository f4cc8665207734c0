use anyhow::{Context, Result};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs as async_fs;
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    /// Page-wide ceiling applied to navigation and long waits.
    pub op_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// One launched Chromium process with a single page. Each goal execution
/// gets its own instance; nothing is shared across runs.
pub struct Browser {
    page: Page,
    browser: Mutex<OxideBrowser>,
    op_timeout: Duration,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique user data dir per run to avoid ProcessSingleton profile lock
        // conflicts when instances are spawned in quick succession.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("pagepilot-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder.user_data_dir(profile_dir.clone());
        builder = builder
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        // Non-zero viewport so element geometry and screenshots behave.
        let _ = page
            .execute(
                SetDeviceMetricsOverrideParams::builder()
                    .width(1280)
                    .height(800)
                    .device_scale_factor(1.0)
                    .mobile(false)
                    .build()
                    .unwrap(),
            )
            .await;
        Ok(Self {
            page,
            browser: Mutex::new(browser),
            op_timeout: cfg.op_timeout,
        })
    }

    /// Navigate and wait for the document to parse, bounded by the
    /// page-wide operation timeout.
    pub async fn goto(&self, url: &str) -> Result<()> {
        tokio::time::timeout(self.op_timeout, async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .map_err(|_| anyhow::anyhow!("navigation to {url} timed out"))??;
        Ok(())
    }

    pub async fn url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    pub async fn title(&self) -> Option<String> {
        self.page.get_title().await.ok().flatten()
    }

    /// Evaluate a JS expression and hand back its JSON value.
    pub async fn evaluate_json(&self, expr: &str) -> Result<Value> {
        let result = self.page.evaluate(expr).await?;
        result
            .into_value::<Value>()
            .context("evaluation returned no value")
    }

    pub async fn find(&self, selector: &str) -> Result<Element> {
        self.page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches '{selector}'"))
    }

    pub async fn find_all(&self, selector: &str) -> Result<Vec<Element>> {
        self.page
            .find_elements(selector)
            .await
            .with_context(|| format!("query '{selector}' failed"))
    }

    /// Poll for a selector until it appears or the deadline passes.
    pub async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<Element> {
        let poll = Duration::from_millis(200);
        let start = Instant::now();
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(element);
            }
            if start.elapsed() >= timeout {
                anyhow::bail!(
                    "timed out after {}ms waiting for '{selector}'",
                    timeout.as_millis()
                );
            }
            sleep(poll).await;
        }
    }

    /// Focus a field, fill it, and submit with an Enter keypress.
    pub async fn fill_and_submit(&self, element: &Element, text: &str) -> Result<()> {
        element.click().await?;
        element.type_str(text).await?;
        element.press_key("Enter").await?;
        Ok(())
    }

    pub async fn screenshot_to(&self, path: &Path) -> Result<()> {
        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(false)
                    .build(),
            )
            .await?;
        async_fs::write(path, &bytes).await?;
        Ok(())
    }

    /// Shut the Chromium process down. Callers invoke this exactly once
    /// per session, on every exit path.
    pub async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await?;
        let _ = browser.wait().await;
        Ok(())
    }
}
