use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentError, Planner};
use crate::gemini::GeminiClient;
use crate::inspector::{ElementDescriptor, PageSnapshot};

/// The closed action vocabulary. A provider response naming anything else
/// fails to parse and is handled as the recoverable parse-failure case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Wait,
    Done,
}

/// One action as planned by the model. Produced once, consumed once.
/// `target` is a URL, CSS selector, or element index depending on `kind`;
/// `reasoning` is for humans and logs, never machine-consumed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(rename = "action")]
    pub kind: ActionKind,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Seam to the hosted completion API, mockable in tests.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AgentError>;
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        // Transport and API errors are fatal to the run, unlike parse
        // failures which only skip an iteration.
        self.generate(prompt)
            .await
            .map_err(|e| AgentError::Unexpected(e.to_string()))
    }
}

/// Turns (goal, snapshot) into exactly one action by prompting the
/// completion provider and parsing its JSON reply.
pub struct LlmPlanner<T: CompletionProvider> {
    provider: T,
}

impl<T: CompletionProvider> LlmPlanner<T> {
    pub fn new(provider: T) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<T: CompletionProvider> Planner for LlmPlanner<T> {
    async fn plan(&self, goal: &str, snapshot: &PageSnapshot) -> Result<PlannedAction, AgentError> {
        let prompt = render_prompt(goal, snapshot);
        let raw = self.provider.complete(&prompt).await?;
        parse_action(&raw)
    }
}

fn render_element(e: &ElementDescriptor) -> String {
    let mut line = format!("  - [{}] {}", e.index, e.tag);
    if let Some(t) = &e.input_type {
        line.push_str(&format!(" type={t}"));
    }
    line.push_str(&format!(
        " (role: {}): text='{}', id='{}', name='{}', aria-label='{}', placeholder='{}'",
        e.role,
        e.text,
        e.dom_id.as_deref().unwrap_or(""),
        e.name.as_deref().unwrap_or(""),
        e.aria_label.as_deref().unwrap_or(""),
        e.placeholder.as_deref().unwrap_or(""),
    ));
    line
}

/// Deterministic rendering of the page state plus the fixed instruction
/// set. The same snapshot always produces the same prompt.
pub fn render_prompt(goal: &str, snapshot: &PageSnapshot) -> String {
    let elements = snapshot
        .elements
        .iter()
        .map(render_element)
        .collect::<Vec<_>>()
        .join("\n");

    let mut s = String::new();
    s.push_str(&format!(
        "You are controlling a web browser to accomplish this goal: \"{goal}\"\n\n"
    ));
    s.push_str("Current page state:\n");
    s.push_str(&format!("- URL: {}\n", snapshot.url));
    s.push_str(&format!("- Title: {}\n\n", snapshot.title));
    s.push_str("Available interactive elements:\n");
    if elements.is_empty() {
        s.push_str("(No elements found)\n");
    } else {
        s.push_str(&elements);
        s.push('\n');
    }
    s.push_str(
        r#"
Based on this information, what is the NEXT SINGLE ACTION to take toward the goal?

Respond ONLY with a JSON object in this exact format:
{
    "action": "navigate" | "click" | "type" | "wait" | "done",
    "target": "selector or URL or element index",
    "value": "text to type (only for 'type' action)",
    "reasoning": "brief explanation"
}

Actions:
- navigate: Go to a URL (target = full URL)
- click: Click an element (target = selector or element index from list)
- type: Type text into input (target = selector or element index, value = text)
- wait: Wait for element (target = selector)
- done: Goal completed successfully

Examples:
{"action": "navigate", "target": "https://amazon.com", "reasoning": "Need to go to Amazon first"}
{"action": "click", "target": "0", "reasoning": "Click the search button"}
{"action": "type", "target": "input[name='q']", "value": "wireless mouse", "reasoning": "Enter search query"}
{"action": "done", "target": "", "reasoning": "Product price found and displayed"}
"#,
    );
    s
}

/// Models often wrap the JSON in a fenced code block; strip the fence
/// before parsing so fenced and unfenced replies are equivalent.
fn strip_fences(raw: &str) -> &str {
    if let Some((_, rest)) = raw.split_once("```json") {
        rest.split("```").next().unwrap_or(rest).trim()
    } else if let Some((_, rest)) = raw.split_once("```") {
        rest.split("```").next().unwrap_or(rest).trim()
    } else {
        raw.trim()
    }
}

pub fn parse_action(raw: &str) -> Result<PlannedAction, AgentError> {
    let body = strip_fences(raw);
    serde_json::from_str(body).map_err(|e| AgentError::PlanParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com".into(),
            title: "Example".into(),
            elements: vec![ElementDescriptor {
                index: 0,
                tag: "input".into(),
                input_type: Some("text".into()),
                role: "input".into(),
                text: String::new(),
                aria_label: Some("Search".into()),
                placeholder: Some("Search the web".into()),
                dom_id: Some("searchbox".into()),
                name: Some("q".into()),
            }],
        }
    }

    #[test]
    fn parses_a_plain_json_action() {
        let action = parse_action(
            r#"{"action": "click", "target": "3", "reasoning": "open the result"}"#,
        )
        .unwrap();
        assert_eq!(action.kind, ActionKind::Click);
        assert_eq!(action.target, "3");
        assert_eq!(action.value, None);
    }

    #[test]
    fn fenced_and_unfenced_replies_parse_identically() {
        let body = r#"{"action": "type", "target": "ignored", "value": "mouse", "reasoning": "search"}"#;
        let plain = parse_action(body).unwrap();
        let json_fenced = parse_action(&format!("```json\n{body}\n```")).unwrap();
        let bare_fenced = parse_action(&format!("```\n{body}\n```")).unwrap();
        assert_eq!(plain, json_fenced);
        assert_eq!(plain, bare_fenced);
    }

    #[test]
    fn fence_with_leading_prose_still_parses() {
        let raw = "Here is the action:\n```json\n{\"action\": \"wait\", \"target\": \"#results\", \"reasoning\": \"loading\"}\n```\nlet me know";
        let action = parse_action(raw).unwrap();
        assert_eq!(action.kind, ActionKind::Wait);
        assert_eq!(action.target, "#results");
    }

    #[test]
    fn garbage_is_a_plan_parse_error() {
        let err = parse_action("I think you should click around").unwrap_err();
        assert!(matches!(err, AgentError::PlanParse(_)));
    }

    #[test]
    fn unknown_action_kind_is_a_plan_parse_error() {
        let err = parse_action(r#"{"action": "scroll", "target": "down"}"#).unwrap_err();
        assert!(matches!(err, AgentError::PlanParse(_)));
    }

    #[test]
    fn missing_optional_fields_default() {
        let action = parse_action(r#"{"action": "done"}"#).unwrap();
        assert_eq!(action.kind, ActionKind::Done);
        assert_eq!(action.target, "");
        assert_eq!(action.reasoning, "");
    }

    #[test]
    fn prompt_renders_the_element_list_deterministically() {
        let snap = snapshot();
        let prompt = render_prompt("find the price of a mouse", &snap);
        assert!(prompt.contains("accomplish this goal: \"find the price of a mouse\""));
        assert!(prompt.contains("- URL: https://example.com"));
        assert!(prompt.contains("- Title: Example"));
        assert!(prompt.contains(
            "  - [0] input type=text (role: input): text='', id='searchbox', name='q', aria-label='Search', placeholder='Search the web'"
        ));
        assert_eq!(prompt, render_prompt("find the price of a mouse", &snap));
    }

    #[test]
    fn prompt_notes_when_no_elements_were_found() {
        let snap = PageSnapshot {
            url: "about:blank".into(),
            title: String::new(),
            elements: vec![],
        };
        assert!(render_prompt("anything", &snap).contains("(No elements found)"));
    }

    struct CannedProvider(&'static str);

    #[async_trait]
    impl CompletionProvider for CannedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CompletionProvider for FailingProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, AgentError> {
            Err(AgentError::Unexpected("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn planner_returns_exactly_one_action() {
        let planner = LlmPlanner::new(CannedProvider(
            "```json\n{\"action\": \"navigate\", \"target\": \"https://amazon.com\", \"reasoning\": \"start\"}\n```",
        ));
        let action = planner.plan("buy a mouse", &snapshot()).await.unwrap();
        assert_eq!(action.kind, ActionKind::Navigate);
        assert_eq!(action.target, "https://amazon.com");
    }

    #[tokio::test]
    async fn provider_transport_failure_is_not_a_parse_error() {
        let planner = LlmPlanner::new(FailingProvider);
        let err = planner.plan("goal", &snapshot()).await.unwrap_err();
        assert!(matches!(err, AgentError::Unexpected(_)));
    }
}
