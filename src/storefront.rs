use chromiumoxide::element::Element;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::browser::{Browser, BrowserConfig};

pub const STORE_URL: &str = "https://www.amazon.com";

// Ordered candidate chains, first match wins. The storefront's markup
// varies between visits, so every extraction goes through a chain.
const SEARCH_BOX_CANDIDATES: [&str; 3] = [
    r#"input[id="twotabsearchtextbox"]"#,
    r#"input[name="field-keywords"]"#,
    r#"input[type="text"]"#,
];
const RESULT_CONTAINER: &str = r#"[data-component-type="s-search-result"]"#;
const TITLE_CANDIDATES: [&str; 5] = [
    "h2 a span",
    "h2 span",
    "h2",
    ".a-size-medium",
    ".a-size-base-plus",
];
const PRICE_CANDIDATES: [&str; 3] = [
    ".a-price .a-offscreen",
    ".a-price-whole",
    r#"span.a-price span[aria-hidden="true"]"#,
];

const SEARCH_BOX_WAIT: Duration = Duration::from_secs(5);
const RESULTS_WAIT: Duration = Duration::from_secs(15);
const SETTLE: Duration = Duration::from_secs(2);
const ERROR_SCREENSHOT: &str = "error_screenshot.png";

/// Result of the fixed navigate→search→extract sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceReport {
    pub success: bool,
    pub message: String,
    pub product: String,
    pub price: Option<String>,
}

impl PriceReport {
    fn failure(product: &str, message: String) -> Self {
        Self {
            success: false,
            message,
            product: product.to_string(),
            price: None,
        }
    }
}

/// Search the storefront for a product and report the first result's
/// price. The browser session is released on every exit path.
pub async fn search_product_price(cfg: BrowserConfig, product: &str) -> PriceReport {
    let browser = match Browser::launch(cfg).await {
        Ok(browser) => browser,
        Err(e) => return PriceReport::failure(product, format!("Error occurred: {e}")),
    };
    let report = run_search(&browser, product).await;
    if let Err(e) = browser.close().await {
        warn!(error = %e, "browser session release failed");
    }
    report
}

async fn run_search(browser: &Browser, product: &str) -> PriceReport {
    info!(store = STORE_URL, "navigating to storefront");
    if let Err(e) = browser.goto(STORE_URL).await {
        return timeout_or_plain_failure(browser, product, e).await;
    }
    sleep(SETTLE).await;

    info!(product, "searching");
    let Some(search_box) = first_present(browser, &SEARCH_BOX_CANDIDATES).await else {
        return PriceReport::failure(product, "Could not find search box on Amazon".into());
    };
    if let Err(e) = browser.fill_and_submit(&search_box, product).await {
        return PriceReport::failure(product, format!("Error occurred: {e}"));
    }

    if let Err(e) = browser.wait_for(RESULT_CONTAINER, RESULTS_WAIT).await {
        return timeout_or_plain_failure(browser, product, e).await;
    }

    let title = first_text(browser, &TITLE_CANDIDATES)
        .await
        .unwrap_or_else(|| "Unknown".into());
    let price = first_text(browser, &PRICE_CANDIDATES).await;

    match price {
        Some(price) => {
            info!(title = %title, price = %price, "price extracted");
            PriceReport {
                success: true,
                message: success_message(&title),
                product: product.to_string(),
                price: Some(price),
            }
        }
        None => {
            warn!(title = %title, "result had no readable price");
            PriceReport::failure(product, "Product found but price not available".into())
        }
    }
}

/// Wait for each candidate in turn; the first selector that shows up wins.
async fn first_present(browser: &Browser, candidates: &[&str]) -> Option<Element> {
    for selector in candidates {
        if let Ok(element) = browser.wait_for(selector, SEARCH_BOX_WAIT).await {
            return Some(element);
        }
    }
    None
}

/// First non-empty inner text among the candidate selectors, each scoped
/// under the result container. Document order makes the first result win.
async fn first_text(browser: &Browser, candidates: &[&str]) -> Option<String> {
    for selector in candidates {
        let scoped = format!("{RESULT_CONTAINER} {selector}");
        if let Ok(element) = browser.find(&scoped).await {
            if let Ok(Some(text)) = element.inner_text().await {
                let text = text.trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
    }
    None
}

async fn timeout_or_plain_failure(
    browser: &Browser,
    product: &str,
    e: anyhow::Error,
) -> PriceReport {
    let msg = e.to_string();
    if msg.contains("timed out") {
        // Best effort: a picture of where the page got stuck.
        if browser.screenshot_to(Path::new(ERROR_SCREENSHOT)).await.is_ok() {
            info!(path = ERROR_SCREENSHOT, "error screenshot saved");
        }
        PriceReport::failure(
            product,
            "Timeout error: Page took too long to load or element not found".into(),
        )
    } else {
        PriceReport::failure(product, format!("Error occurred: {msg}"))
    }
}

fn success_message(title: &str) -> String {
    let short: String = title.chars().take(50).collect();
    format!("Success! Product '{short}...' found")
}
