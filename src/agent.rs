use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser::{Browser, BrowserConfig};
use crate::executor;
use crate::gemini::{GeminiClient, GeminiConfig};
use crate::inspector::{self, PageSnapshot};
use crate::planner::{ActionKind, LlmPlanner, PlannedAction};

// ========================= Core Types =========================

#[derive(Debug, Error)]
pub enum AgentError {
    /// Session/page acquisition failed. Fatal for the run.
    #[error("browser session could not be started: {0}")]
    Init(String),
    /// Provider output was not valid structured data. Recoverable: the
    /// iteration is skipped and the next one re-queries with a fresh
    /// snapshot.
    #[error("planner reply was not a valid action: {0}")]
    PlanParse(String),
    /// An executor step exceeded its timeout. Recoverable.
    #[error("{0}")]
    Timeout(String),
    /// Any other executor-level fault. Recoverable.
    #[error("{0}")]
    Action(String),
    /// Anything escaping the categories above. Forces the run into the
    /// failed state; the session is still released.
    #[error("{0}")]
    Unexpected(String),
}

/// Final result of one goal execution, on every exit path. This is the
/// only failure shape callers ever see.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub succeeded: bool,
    pub goal: String,
    pub steps_taken: usize,
    pub message: String,
}

impl LoopOutcome {
    pub fn failed(goal: &str, steps_taken: usize, message: String) -> Self {
        Self {
            succeeded: false,
            goal: goal.to_string(),
            steps_taken,
            message,
        }
    }
}

// ========================= Collaborator Seams =========================

/// The live browser session: observe the page, apply one action, release.
/// One implementation drives Chromium; tests substitute mocks.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Observation never hard-fails; trouble degrades to a snapshot with
    /// fewer (or no) elements.
    async fn observe(&self) -> PageSnapshot;
    async fn apply(&self, action: &PlannedAction) -> Result<(), AgentError>;
    async fn close(&self) -> Result<(), AgentError>;
}

/// Turns (goal, snapshot) into exactly one next action.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str, snapshot: &PageSnapshot) -> Result<PlannedAction, AgentError>;
}

// ========================= Loop Controller =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Pause between iterations, letting the page settle before the next
    /// observation. Configuration so tests run without real waits.
    pub step_pause: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 15,
            step_pause: Duration::from_secs(1),
        }
    }
}

pub struct Agent<S, P>
where
    S: PageSession,
    P: Planner,
{
    session: S,
    planner: P,
    cfg: AgentConfig,
}

impl<S, P> Agent<S, P>
where
    S: PageSession,
    P: Planner,
{
    pub fn new(session: S, planner: P, cfg: AgentConfig) -> Self {
        Self {
            session,
            planner,
            cfg,
        }
    }

    /// Drive the observe → plan → apply loop to completion or exhaustion.
    /// The session is released exactly once, whatever the outcome.
    pub async fn run(&self, goal: &str) -> LoopOutcome {
        let run = nanoid!(10);
        info!(%run, goal, max_steps = self.cfg.max_steps, "starting action loop");

        let outcome = self.drive(goal).await;

        if let Err(e) = self.session.close().await {
            warn!(%run, error = %e, "browser session release failed");
        }
        if outcome.succeeded {
            info!(%run, steps = outcome.steps_taken, "goal completed");
        } else {
            warn!(%run, steps = outcome.steps_taken, message = %outcome.message, "run ended without success");
        }
        outcome
    }

    async fn drive(&self, goal: &str) -> LoopOutcome {
        let mut steps_taken = 0;
        for step in 1..=self.cfg.max_steps {
            steps_taken = step;

            let snapshot = self.session.observe().await;
            debug!(
                step,
                url = %snapshot.url,
                elements = snapshot.elements.len(),
                "page observed"
            );

            let action = match self.planner.plan(goal, &snapshot).await {
                Ok(action) => action,
                Err(AgentError::PlanParse(e)) => {
                    warn!(step, error = %e, "unusable planner reply, skipping iteration");
                    continue;
                }
                Err(e) => {
                    return LoopOutcome::failed(goal, steps_taken, format!("Error: {e}"));
                }
            };

            info!(
                step,
                kind = ?action.kind,
                target = %action.target,
                reasoning = %action.reasoning,
                "planned action"
            );

            if action.kind == ActionKind::Done {
                return LoopOutcome {
                    succeeded: true,
                    goal: goal.to_string(),
                    steps_taken,
                    message: format!("Goal completed: {}", action.reasoning),
                };
            }

            if let Err(e) = self.session.apply(&action).await {
                // Not fatal: the next iteration re-observes the page and
                // may choose a different move.
                warn!(step, error = %e, "action failed");
            }

            sleep(self.cfg.step_pause).await;
        }

        LoopOutcome::failed(
            goal,
            steps_taken,
            format!(
                "Reached maximum steps ({}) without completing goal",
                self.cfg.max_steps
            ),
        )
    }
}

// ========================= Chromium Adapter =========================

/// The concrete `PageSession` over a launched Chromium, delegating
/// observation to the inspector and actions to the executor.
pub struct ChromiumSession {
    browser: Browser,
}

impl ChromiumSession {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self, AgentError> {
        let browser = Browser::launch(cfg)
            .await
            .map_err(|e| AgentError::Init(e.to_string()))?;
        Ok(Self { browser })
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn observe(&self) -> PageSnapshot {
        inspector::capture(&self.browser).await
    }

    async fn apply(&self, action: &PlannedAction) -> Result<(), AgentError> {
        executor::perform(&self.browser, action).await
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.browser
            .close()
            .await
            .map_err(|e| AgentError::Unexpected(e.to_string()))
    }
}

// ========================= Wiring =========================

/// Constructed once per process (or per test) from explicit configuration;
/// no environment reads happen mid-run. Each `execute_goal` call owns a
/// fresh, isolated browser session.
pub struct GoalRunner {
    client: GeminiClient,
    browser_cfg: BrowserConfig,
}

impl GoalRunner {
    pub fn new(gemini: GeminiConfig, browser_cfg: BrowserConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: GeminiClient::new(gemini)?,
            browser_cfg,
        })
    }

    pub async fn execute_goal(&self, goal: &str, max_steps: usize) -> LoopOutcome {
        let session = match ChromiumSession::launch(self.browser_cfg.clone()).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "browser acquisition failed");
                return LoopOutcome::failed(goal, 0, format!("Error: {e}"));
            }
        };
        let planner = LlmPlanner::new(self.client.clone());
        let agent = Agent::new(
            session,
            planner,
            AgentConfig {
                max_steps,
                ..AgentConfig::default()
            },
        );
        agent.run(goal).await
    }
}

// ========================= Tests =========================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct SessionStats {
        observe_calls: AtomicUsize,
        apply_calls: AtomicUsize,
        close_calls: AtomicUsize,
    }

    struct MockSession {
        stats: Arc<SessionStats>,
        fail_applies: bool,
    }

    impl MockSession {
        fn new(fail_applies: bool) -> (Self, Arc<SessionStats>) {
            let stats = Arc::new(SessionStats::default());
            (
                Self {
                    stats: stats.clone(),
                    fail_applies,
                },
                stats,
            )
        }
    }

    #[async_trait]
    impl PageSession for MockSession {
        async fn observe(&self) -> PageSnapshot {
            self.stats.observe_calls.fetch_add(1, Ordering::Relaxed);
            PageSnapshot {
                url: "about:blank".into(),
                title: String::new(),
                elements: vec![],
            }
        }

        async fn apply(&self, action: &PlannedAction) -> Result<(), AgentError> {
            self.stats.apply_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_applies {
                Err(AgentError::Action(format!(
                    "cannot apply {:?} to '{}'",
                    action.kind, action.target
                )))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), AgentError> {
            self.stats.close_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Pops scripted replies; once exhausted, keeps planning a click so
    /// "never says done" scenarios only need an empty script.
    struct ScriptedPlanner {
        script: Mutex<VecDeque<Result<PlannedAction, AgentError>>>,
    }

    impl ScriptedPlanner {
        fn new(script: Vec<Result<PlannedAction, AgentError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn plan(
            &self,
            _goal: &str,
            _snapshot: &PageSnapshot,
        ) -> Result<PlannedAction, AgentError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(click("0")))
        }
    }

    fn click(target: &str) -> PlannedAction {
        PlannedAction {
            kind: ActionKind::Click,
            target: target.to_string(),
            value: None,
            reasoning: "try something".into(),
        }
    }

    fn done(reasoning: &str) -> PlannedAction {
        PlannedAction {
            kind: ActionKind::Done,
            target: String::new(),
            value: None,
            reasoning: reasoning.to_string(),
        }
    }

    fn quick(max_steps: usize) -> AgentConfig {
        AgentConfig {
            max_steps,
            step_pause: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn exhausts_the_step_budget_when_never_done() {
        let (session, stats) = MockSession::new(false);
        let agent = Agent::new(session, ScriptedPlanner::new(vec![]), quick(5));

        let outcome = agent.run("unreachable goal").await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.steps_taken, 5);
        assert!(outcome.message.contains("Reached maximum steps (5)"));
        assert_eq!(stats.observe_calls.load(Ordering::Relaxed), 5);
        assert_eq!(stats.apply_calls.load(Ordering::Relaxed), 5);
        assert_eq!(stats.close_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn completes_on_done_with_its_reasoning() {
        let (session, stats) = MockSession::new(false);
        let planner = ScriptedPlanner::new(vec![
            Ok(click("0")),
            Ok(click("1")),
            Ok(done("price is on screen")),
        ]);
        let agent = Agent::new(session, planner, quick(15));

        let outcome = agent.run("find the price").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.steps_taken, 3);
        assert!(outcome.message.contains("price is on screen"));
        assert_eq!(stats.apply_calls.load(Ordering::Relaxed), 2);
        assert_eq!(stats.close_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_actions_do_not_abort_the_loop() {
        let (session, stats) = MockSession::new(true);
        let planner = ScriptedPlanner::new(vec![
            Ok(click("99")), // out of range on the mock, reported not raised
            Ok(click("a.missing")),
            Ok(done("finished anyway")),
        ]);
        let agent = Agent::new(session, planner, quick(15));

        let outcome = agent.run("resilient goal").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.steps_taken, 3);
        assert_eq!(stats.apply_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn parse_failures_skip_the_iteration_but_still_count() {
        let (session, stats) = MockSession::new(false);
        let planner = ScriptedPlanner::new(vec![
            Err(AgentError::PlanParse("not json".into())),
            Err(AgentError::PlanParse("still not json".into())),
            Err(AgentError::PlanParse("nope".into())),
            Err(AgentError::PlanParse("no".into())),
        ]);
        let agent = Agent::new(session, planner, quick(4));

        let outcome = agent.run("garbled goal").await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.steps_taken, 4);
        assert_eq!(stats.apply_calls.load(Ordering::Relaxed), 0);
        assert_eq!(stats.close_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn provider_failure_fails_the_run_but_still_releases_the_session() {
        let (session, stats) = MockSession::new(false);
        let planner = ScriptedPlanner::new(vec![
            Ok(click("0")),
            Err(AgentError::Unexpected("provider unreachable".into())),
        ]);
        let agent = Agent::new(session, planner, quick(15));

        let outcome = agent.run("doomed goal").await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.steps_taken, 2);
        assert!(outcome.message.contains("provider unreachable"));
        assert_eq!(stats.close_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn done_on_the_first_step_touches_the_page_only_to_observe() {
        let (session, stats) = MockSession::new(false);
        let planner = ScriptedPlanner::new(vec![Ok(done("already satisfied"))]);
        let agent = Agent::new(session, planner, quick(15));

        let outcome = agent.run("trivial goal").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.steps_taken, 1);
        assert_eq!(stats.observe_calls.load(Ordering::Relaxed), 1);
        assert_eq!(stats.apply_calls.load(Ordering::Relaxed), 0);
        assert_eq!(stats.close_calls.load(Ordering::Relaxed), 1);
    }
}
