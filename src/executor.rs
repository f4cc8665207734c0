use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::agent::AgentError;
use crate::browser::Browser;
use crate::planner::{ActionKind, PlannedAction};

/// Broader than the inspector's query: submit inputs are clickable even
/// though the snapshot hides them from the planner's element list, so
/// click targets are re-resolved fresh from the live page.
pub const CLICKABLE_QUERY: &str = r#"button, a, input[type="submit"], [role="button"]"#;

/// Candidate selectors for the `type` action, evaluated first-match-wins.
pub const TYPE_TARGETS: [&str; 4] = [
    r#"input[name="field-keywords"]"#,
    r#"input[id*="search"]"#,
    r#"input[type="search"]"#,
    r#"input[type="text"]"#,
];

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const NAVIGATE_SETTLE: Duration = Duration::from_secs(2);
const CLICK_SETTLE: Duration = Duration::from_secs(1);
const TYPE_SETTLE: Duration = Duration::from_secs(2);

/// Apply one planned action to the live page. Every failure comes back as
/// an error value; nothing here aborts the calling loop.
pub async fn perform(browser: &Browser, action: &PlannedAction) -> Result<(), AgentError> {
    match action.kind {
        ActionKind::Navigate => {
            browser.goto(&action.target).await.map_err(classify)?;
            sleep(NAVIGATE_SETTLE).await;
            Ok(())
        }
        ActionKind::Click => click(browser, &action.target).await,
        ActionKind::Type => {
            let value = action.value.as_deref().unwrap_or("");
            type_into_search_field(browser, &action.target, value).await
        }
        ActionKind::Wait => {
            browser
                .wait_for(&action.target, WAIT_TIMEOUT)
                .await
                .map(drop)
                .map_err(classify)
        }
        // Terminal signal, not an interaction. The loop never gets here
        // (it completes on `done` before executing), but the dispatch is
        // exhaustive.
        ActionKind::Done => Ok(()),
    }
}

async fn click(browser: &Browser, target: &str) -> Result<(), AgentError> {
    if let Some(idx) = parse_index(target) {
        let elements = browser.find_all(CLICKABLE_QUERY).await.map_err(classify)?;
        let Some(element) = elements.get(idx) else {
            return Err(AgentError::Action(format!(
                "element index {idx} out of range ({} clickable elements)",
                elements.len()
            )));
        };
        element
            .click()
            .await
            .map_err(|e| AgentError::Action(format!("click on element {idx} failed: {e}")))?;
    } else {
        let element = browser.find(target).await.map_err(classify)?;
        element
            .click()
            .await
            .map_err(|e| AgentError::Action(format!("click on '{target}' failed: {e}")))?;
    }
    sleep(CLICK_SETTLE).await;
    Ok(())
}

async fn type_into_search_field(
    browser: &Browser,
    planner_target: &str,
    value: &str,
) -> Result<(), AgentError> {
    for selector in search_field_candidates(planner_target) {
        if let Ok(element) = browser.find(selector).await {
            debug!(selector, "typing into detected search field");
            browser
                .fill_and_submit(&element, value)
                .await
                .map_err(classify)?;
            sleep(TYPE_SETTLE).await;
            return Ok(());
        }
    }
    Err(AgentError::Action(
        "no search-like text field found to type into".into(),
    ))
}

/// Current contract: the planner's chosen target is not consulted; typing
/// always hunts for a search-like field in this fixed order.
fn search_field_candidates(_planner_target: &str) -> &'static [&'static str] {
    &TYPE_TARGETS
}

/// A digits-only target addresses the clickable list by position;
/// anything else is treated as a CSS selector.
fn parse_index(target: &str) -> Option<usize> {
    if !target.is_empty() && target.chars().all(|c| c.is_ascii_digit()) {
        target.parse().ok()
    } else {
        None
    }
}

fn classify(e: anyhow::Error) -> AgentError {
    let msg = e.to_string();
    if msg.contains("timed out") {
        AgentError::Timeout(msg)
    } else {
        AgentError::Action(msg)
    }
}
