use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::agent::GoalRunner;
use crate::browser::BrowserConfig;
use crate::gemini::GeminiConfig;
use crate::storefront;

pub const MAX_STEPS_CEILING: usize = 50;
const DEFAULT_MAX_STEPS: usize = 15;
const FIXED_PRODUCT: &str = "wireless mouse";

/// Shared service state: configuration resolved once at startup, plus the
/// goal runner when an API key was configured. Each request that needs a
/// browser launches its own; nothing mutable is shared.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    runner: Option<GoalRunner>,
    browser_cfg: BrowserConfig,
}

impl AppState {
    pub fn new(gemini: GeminiConfig, browser_cfg: BrowserConfig) -> Self {
        let runner = if gemini.is_configured() {
            GoalRunner::new(gemini, browser_cfg.clone()).ok()
        } else {
            None
        };
        Self {
            inner: Arc::new(AppInner {
                runner,
                browser_cfg,
            }),
        }
    }

    fn ai_available(&self) -> bool {
        self.inner.runner.is_some()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    #[default]
    Basic,
    Ai,
}

impl TaskMode {
    fn as_str(self) -> &'static str {
        match self {
            TaskMode::Basic => "basic",
            TaskMode::Ai => "ai",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    /// The task or goal to execute, e.g. "Find the price of a wireless
    /// mouse on Amazon". Ignored in basic mode, which runs the fixed task.
    pub message: String,
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub success: bool,
    pub message: String,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_taken: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/execute", post(execute_handler))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "service listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "Pagepilot Automation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /execute": "Execute an automation task",
            "GET /health": "Health check endpoint"
        },
        "modes": {
            "basic": "Fixed task execution (product search)",
            "ai": "AI-powered dynamic task execution (requires GEMINI_API_KEY)"
        }
    }))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "features": {
            "basic_mode": true,
            "ai_mode": state.ai_available()
        }
    }))
}

async fn execute_handler(
    State(state): State<AppState>,
    Json(req): Json<TaskRequest>,
) -> Response {
    if !max_steps_in_bounds(req.max_steps) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("max_steps must be between 1 and {MAX_STEPS_CEILING}"),
        );
    }

    info!(mode = req.mode.as_str(), message = %req.message, "task accepted");

    match req.mode {
        TaskMode::Basic => {
            let report =
                storefront::search_product_price(state.inner.browser_cfg.clone(), FIXED_PRODUCT)
                    .await;
            Json(TaskResponse {
                success: report.success,
                message: report.message,
                mode: TaskMode::Basic.as_str(),
                steps_taken: None,
                price: report.price,
                product: Some(report.product),
            })
            .into_response()
        }
        TaskMode::Ai => {
            let Some(runner) = state.inner.runner.as_ref() else {
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "AI mode not available: GEMINI_API_KEY not configured".into(),
                );
            };
            // Core failures (including a browser that refused to start)
            // arrive as a structured outcome, never as a fault.
            let outcome = runner.execute_goal(&req.message, req.max_steps).await;
            Json(TaskResponse {
                success: outcome.succeeded,
                message: outcome.message,
                mode: TaskMode::Ai.as_str(),
                steps_taken: Some(outcome.steps_taken),
                price: None,
                product: None,
            })
            .into_response()
        }
    }
}

fn max_steps_in_bounds(n: usize) -> bool {
    (1..=MAX_STEPS_CEILING).contains(&n)
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_basic_mode_and_fifteen_steps() {
        let req: TaskRequest = serde_json::from_str(r#"{"message": "find a mouse"}"#).unwrap();
        assert_eq!(req.mode, TaskMode::Basic);
        assert_eq!(req.max_steps, 15);
    }

    #[test]
    fn ai_mode_parses() {
        let req: TaskRequest =
            serde_json::from_str(r#"{"message": "goal", "mode": "ai", "max_steps": 3}"#).unwrap();
        assert_eq!(req.mode, TaskMode::Ai);
        assert_eq!(req.max_steps, 3);
    }

    #[test]
    fn unknown_modes_are_rejected_at_the_boundary() {
        let err = serde_json::from_str::<TaskRequest>(
            r#"{"message": "goal", "mode": "hybrid"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("hybrid"));
    }

    #[test]
    fn absent_fields_are_omitted_from_responses() {
        let body = serde_json::to_value(TaskResponse {
            success: true,
            message: "done".into(),
            mode: "ai",
            steps_taken: Some(4),
            price: None,
            product: None,
        })
        .unwrap();
        assert_eq!(body["steps_taken"], 4);
        assert!(body.get("price").is_none());
        assert!(body.get("product").is_none());
    }

    #[test]
    fn step_budget_bounds_match_the_contract() {
        assert!(!max_steps_in_bounds(0));
        assert!(max_steps_in_bounds(1));
        assert!(max_steps_in_bounds(50));
        assert!(!max_steps_in_bounds(51));
    }
}
