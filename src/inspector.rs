use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::browser::Browser;

/// Snapshots never carry more than this many elements; later matches are
/// dropped, not sampled.
pub const MAX_ELEMENTS: usize = 20;
/// Visible text is truncated to this many characters per element.
pub const MAX_TEXT_LEN: usize = 50;

/// Point-in-time extraction of a page's interactive elements. Rebuilt
/// fresh every loop iteration and discarded after use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<ElementDescriptor>,
}

/// One interactive element as reported to the planner. `index` is the
/// position within the filtered, capped sequence and is only stable
/// within a single snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub index: usize,
    pub tag: String,
    pub input_type: Option<String>,
    pub role: String,
    pub text: String,
    pub aria_label: Option<String>,
    pub placeholder: Option<String>,
    pub dom_id: Option<String>,
    pub name: Option<String>,
}

/// Raw per-element record as harvested by the injected script, before any
/// policy is applied.
#[derive(Debug, Deserialize)]
struct RawElement {
    tag: String,
    #[serde(rename = "type")]
    input_type: Option<String>,
    role: Option<String>,
    #[serde(default)]
    text: String,
    aria_label: Option<String>,
    placeholder: Option<String>,
    id: Option<String>,
    name: Option<String>,
}

// Harvests every interactive-category element in document order. Policy
// (cap, submit exclusion, truncation) lives in `distill` so it can be
// unit-tested; the script only slices text to keep the payload bounded.
const HARVEST_JS: &str = r#"
(function() {
    const out = [];
    const nodes = document.querySelectorAll(
        'button, a, input, select, textarea, [role="button"], [role="link"]'
    );
    for (const el of nodes) {
        try {
            const tag = el.tagName.toLowerCase();
            out.push({
                tag,
                type: el.getAttribute('type'),
                role: el.getAttribute('role'),
                text: tag === 'input' ? '' : (el.innerText || '').slice(0, 200),
                aria_label: el.getAttribute('aria-label'),
                placeholder: el.getAttribute('placeholder'),
                id: el.getAttribute('id'),
                name: el.getAttribute('name')
            });
        } catch (err) {
            out.push(null);
        }
    }
    return out;
})()
"#;

/// Build a snapshot of the live page. Never a hard failure: any trouble
/// degrades to a snapshot with whatever URL is known and no elements.
pub async fn capture(browser: &Browser) -> PageSnapshot {
    let url = browser.url().await.unwrap_or_default();
    let title = browser.title().await.unwrap_or_default();
    let elements = match browser.evaluate_json(HARVEST_JS).await {
        Ok(Value::Array(raw)) => distill(raw),
        Ok(other) => {
            warn!(kind = %value_kind(&other), "element harvest returned a non-array");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "element harvest failed, continuing with empty snapshot");
            Vec::new()
        }
    };
    PageSnapshot { url, title, elements }
}

/// Apply snapshot policy to raw harvested records: consider only the
/// first MAX_ELEMENTS, drop submit-type inputs, truncate text, default
/// the role to the tag, and skip records that fail to parse. Indexes are
/// assigned in output order, so they stay contiguous after skips.
fn distill(raw: Vec<Value>) -> Vec<ElementDescriptor> {
    let mut out = Vec::new();
    for value in raw.into_iter().take(MAX_ELEMENTS) {
        let Ok(record) = serde_json::from_value::<RawElement>(value) else {
            continue;
        };
        if record.tag == "input" && record.input_type.as_deref() == Some("submit") {
            continue;
        }
        let role = record
            .role
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| record.tag.clone());
        out.push(ElementDescriptor {
            index: out.len(),
            tag: record.tag,
            input_type: record.input_type,
            role,
            text: truncate(record.text.trim(), MAX_TEXT_LEN),
            aria_label: record.aria_label,
            placeholder: record.placeholder,
            dom_id: record.id,
            name: record.name,
        });
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
