//! Orchestrator — the perceive→reason→act→verify→(human) state machine.
//!
//! The session owns the one mutable `AgentState`; every other component gets
//! read-only snapshots or explicit arguments and hands back a delta. After
//! every node the state is checkpointed to disk, so a crashed or paused run
//! resumes from the last completed node under the same session id.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use eoka::Page;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::oracle::{ActionKind, Decision, DecisionOracle};
use crate::{action, annotate, observe, tools, verify, AgentConfig, InteractiveElement, Result};

/// Session status threaded through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Running,
    Retry,
    Done,
    Fail,
    WaitForHuman,
}

/// Control-flow node. Persisted so a resumed session re-enters the loop at
/// the node after the last completed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    #[default]
    Perceive,
    Reason,
    Act,
    Verify,
    Human,
    Done,
    Fail,
}

/// The single mutable record threaded through the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// May be replaced by human input mid-run.
    pub objective: String,
    pub steps_taken: u32,
    pub max_steps: u32,
    #[serde(default)]
    pub elements: Vec<InteractiveElement>,
    /// Base64 annotated PNG from the latest perception snapshot.
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub text_map: String,
    #[serde(default)]
    pub decision: Option<Decision>,
    /// Unannotated baseline, retained one cycle for diffing.
    #[serde(default, with = "b64_bytes")]
    pub last_raw_screenshot: Option<Vec<u8>>,
    /// Path of the most recent annotated view, for operator review.
    #[serde(default)]
    pub last_view: Option<std::path::PathBuf>,
    pub status: Status,
    pub error_count: u32,
    #[serde(default)]
    pub node: Node,
}

impl AgentState {
    fn new(objective: String, max_steps: u32) -> Self {
        AgentState {
            objective,
            steps_taken: 0,
            max_steps,
            elements: Vec::new(),
            screenshot: None,
            text_map: String::new(),
            decision: None,
            last_raw_screenshot: None,
            last_view: None,
            status: Status::Running,
            error_count: 0,
            node: Node::Perceive,
        }
    }
}

/// Raw screenshot bytes as base64 in the checkpoint JSON.
mod b64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Where a finished run ended up.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// `Running` here means the step budget ran out — a non-fatal stop.
    pub status: Status,
    pub steps_taken: u32,
    /// Rationale of the last decision, for the final report.
    pub reasoning: Option<String>,
}

/// Route out of the verify node. Pure so every edge is testable.
pub fn route(status: Status, steps_taken: u32, max_steps: u32) -> Node {
    match status {
        Status::Done => Node::Done,
        Status::Fail => Node::Fail,
        Status::WaitForHuman => Node::Human,
        _ if steps_taken >= max_steps => Node::Done,
        _ => Node::Perceive,
    }
}

/// One agent session: a page, an oracle, and the state machine over them.
///
/// Sessions are isolated units — each owns its page, oracle and state, so
/// independent sessions run concurrently with nothing shared.
pub struct Session {
    page: Page,
    oracle: Box<dyn DecisionOracle>,
    config: AgentConfig,
    state: AgentState,
}

impl Session {
    /// Fresh session with the oracle the config selects.
    pub fn new(page: Page, config: AgentConfig) -> Self {
        let oracle = config.build_oracle();
        Self::with_oracle(page, config, oracle)
    }

    /// Fresh session with a caller-supplied oracle.
    pub fn with_oracle(page: Page, config: AgentConfig, oracle: Box<dyn DecisionOracle>) -> Self {
        let state = AgentState::new(config.objective.clone(), config.max_steps);
        Session {
            page,
            oracle,
            config,
            state,
        }
    }

    /// Continue a checkpointed run under the same session id. Starts fresh
    /// when no checkpoint exists.
    pub fn resume(page: Page, config: AgentConfig) -> Result<Self> {
        let path = config.checkpoint_path();
        if !path.exists() {
            return Ok(Self::new(page, config));
        }
        let state: AgentState = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        info!(
            "resuming session {} at node {:?}, step {}",
            config.session_id, state.node, state.steps_taken
        );
        let oracle = config.build_oracle();
        Ok(Session {
            page,
            oracle,
            config,
            state,
        })
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Drive the state machine to a terminal node.
    pub async fn run(&mut self) -> Result<Outcome> {
        std::fs::create_dir_all(&self.config.artifact_dir)?;

        loop {
            match self.state.node {
                Node::Perceive => {
                    self.perceive().await?;
                    self.state.node = Node::Reason;
                }
                Node::Reason => {
                    self.reason().await;
                    self.state.node = Node::Act;
                }
                Node::Act => {
                    self.act().await;
                    self.state.node = Node::Verify;
                }
                Node::Verify => {
                    self.verify().await;
                    self.state.node =
                        route(self.state.status, self.state.steps_taken, self.state.max_steps);
                }
                Node::Human => {
                    self.human().await?;
                    self.state.node = Node::Perceive;
                }
                Node::Done | Node::Fail => break,
            }
            self.checkpoint()?;
        }

        let outcome = self.outcome();
        info!(
            "session {} finished: {:?} after {} steps",
            self.config.session_id, outcome.status, outcome.steps_taken
        );
        Ok(outcome)
    }

    fn outcome(&self) -> Outcome {
        Outcome {
            status: self.state.status,
            steps_taken: self.state.steps_taken,
            reasoning: self.state.decision.as_ref().map(|d| d.reasoning.clone()),
        }
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    async fn perceive(&mut self) -> Result<()> {
        info!("[perceive] step {}", self.state.steps_taken + 1);

        // Baseline before any overlay touches the DOM
        self.state.last_raw_screenshot = if self.config.self_healing {
            Some(self.page.screenshot().await?)
        } else {
            None
        };

        let elements = observe::capture(&self.page).await?;
        let text_map = observe::text_map(&self.page).await?;
        let annotated = annotate::annotated_screenshot(&self.page, &elements).await?;

        // Debug artifact, keyed by step index, for review during escalation
        let view_path = self
            .config
            .artifact_dir
            .join(format!("step_{}_view.png", self.state.steps_taken));
        std::fs::write(&view_path, &annotated)?;
        self.state.last_view = Some(view_path);

        info!("captured {} interactive elements", elements.len());
        self.state.elements = elements;
        self.state.text_map = text_map;
        self.state.screenshot = Some(BASE64.encode(&annotated));
        Ok(())
    }

    async fn reason(&mut self) {
        info!("[reason]");
        let annotated = self
            .state
            .screenshot
            .as_deref()
            .and_then(|s| BASE64.decode(s).ok())
            .unwrap_or_default();

        let decision = self
            .oracle
            .decide(
                &self.state.objective,
                &annotated,
                &self.state.elements,
                &self.state.text_map,
            )
            .await;

        info!("decision: {:?} — {}", decision.action, decision.reasoning);
        self.state.decision = Some(decision);
    }

    async fn act(&mut self) {
        info!("[act]");
        let Some(decision) = self.state.decision.clone() else {
            self.state.status = Status::Fail;
            return;
        };

        match decision.action {
            ActionKind::Done => self.state.status = Status::Done,
            ActionKind::Fail => self.state.status = Status::Fail,
            ActionKind::HumanRequest => self.state.status = Status::WaitForHuman,
            ActionKind::ToolUse => {
                let result = tools::run_tool(decision.value.as_deref().unwrap_or(""));
                info!("tool result: {}", result);
                // A tool invocation consumes a step whether or not it succeeded
                self.state.steps_taken += 1;
                self.state.status = Status::Running;
            }
            _ => match action::execute(&self.page, &decision, &self.state.elements).await {
                Ok(()) => {
                    if decision.action.is_physical() {
                        self.state.steps_taken += 1;
                    }
                    self.state.status = Status::Running;
                }
                Err(e) => {
                    // Same retry/escalate law as a failed verification; the
                    // step counter does not advance.
                    warn!("action cycle failed: {}", e);
                    self.apply_self_heal();
                }
            },
        }
    }

    async fn verify(&mut self) {
        // Terminal, escalating and already-failed cycles carry their status
        // through untouched
        if self.state.status != Status::Running {
            return;
        }
        // Tool invocations have no visual effect to measure
        let browser_action = self
            .state
            .decision
            .as_ref()
            .map(|d| d.action.is_browser_action())
            .unwrap_or(false);
        let Some(baseline) = self.state.last_raw_screenshot.as_deref() else {
            // No baseline configured: verification is skipped entirely
            self.state.status = Status::Running;
            return;
        };
        if !browser_action {
            return;
        }

        info!("[verify]");
        match verify::check(
            &self.page,
            baseline,
            self.config.self_heal_threshold,
            self.state.error_count,
        )
        .await
        {
            Ok(verdict) => {
                self.state.status = verdict.status;
                self.state.error_count = verdict.error_count;
            }
            Err(e) => {
                warn!("verification failed: {}", e);
                self.apply_self_heal();
            }
        }
    }

    /// Blocking checkpoint: hand control to the operator and wait.
    async fn human(&mut self) -> Result<()> {
        let reasoning = self
            .state
            .decision
            .as_ref()
            .map(|d| d.reasoning.as_str())
            .unwrap_or("N/A");
        let view = self
            .state
            .last_view
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "N/A".to_string());

        println!("\n{}", "=".repeat(40));
        println!("HUMAN INTERVENTION REQUIRED");
        println!("Objective: {}", self.state.objective);
        println!("Status:    {:?}", self.state.status);
        println!("Reasoning: {}", reasoning);
        println!("View:      {}", view);
        println!("{}", "=".repeat(40));
        println!("Enter 'c' to continue, 'r' to retry, or a new instruction:");

        let mut input = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut input)
            .await?;
        let input = input.trim();

        match input {
            "c" | "C" | "" => {
                self.state.status = Status::Running;
            }
            "r" | "R" => {
                self.state.status = Status::Retry;
            }
            instruction => {
                info!("objective replaced by operator: {}", instruction);
                self.state.objective = instruction.to_string();
                self.state.status = Status::Running;
            }
        }
        self.state.error_count = 0;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn apply_self_heal(&mut self) {
        let verdict = verify::self_heal(
            0.0,
            self.config.self_heal_threshold,
            self.state.error_count,
        );
        self.state.status = verdict.status;
        self.state.error_count = verdict.error_count;
    }

    fn checkpoint(&self) -> Result<()> {
        let json = serde_json::to_string(&self.state)?;
        std::fs::write(self.config.checkpoint_path(), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_terminal_statuses() {
        assert_eq!(route(Status::Done, 0, 10), Node::Done);
        assert_eq!(route(Status::Fail, 0, 10), Node::Fail);
    }

    #[test]
    fn test_route_escalation() {
        assert_eq!(route(Status::WaitForHuman, 0, 10), Node::Human);
        // Escalation wins over an exhausted budget
        assert_eq!(route(Status::WaitForHuman, 10, 10), Node::Human);
    }

    #[test]
    fn test_route_budget_exhaustion() {
        assert_eq!(route(Status::Running, 10, 10), Node::Done);
        assert_eq!(route(Status::Retry, 11, 10), Node::Done);
    }

    #[test]
    fn test_route_loops_back_to_perceive() {
        assert_eq!(route(Status::Running, 3, 10), Node::Perceive);
        assert_eq!(route(Status::Retry, 3, 10), Node::Perceive);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut state = AgentState::new("find the docs".to_string(), 10);
        state.steps_taken = 4;
        state.error_count = 1;
        state.status = Status::Retry;
        state.node = Node::Verify;
        state.last_raw_screenshot = Some(vec![137, 80, 78, 71]);
        state.decision = Some(Decision {
            action: ActionKind::Click,
            element_id: Some(2),
            value: None,
            reasoning: "click the link".to_string(),
        });

        let json = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&json).unwrap();

        assert_eq!(back.objective, "find the docs");
        assert_eq!(back.steps_taken, 4);
        assert_eq!(back.error_count, 1);
        assert_eq!(back.status, Status::Retry);
        assert_eq!(back.node, Node::Verify);
        assert_eq!(back.last_raw_screenshot, Some(vec![137, 80, 78, 71]));
        assert_eq!(back.decision.unwrap().element_id, Some(2));
    }

    #[test]
    fn test_checkpoint_encodes_screenshot_as_base64() {
        let mut state = AgentState::new("x".to_string(), 5);
        state.last_raw_screenshot = Some(vec![1, 2, 3]);
        let json = serde_json::to_string(&state).unwrap();
        // bytes must land as a base64 string, not a number array
        assert!(json.contains(&format!(
            "\"last_raw_screenshot\":\"{}\"",
            base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3])
        )));
    }

    #[test]
    fn test_state_missing_optional_fields_defaults() {
        // A minimal checkpoint from an older run still loads
        let json = r#"{
            "objective": "go",
            "steps_taken": 2,
            "max_steps": 10,
            "status": "running",
            "error_count": 0
        }"#;
        let state: AgentState = serde_json::from_str(json).unwrap();
        assert_eq!(state.node, Node::Perceive);
        assert!(state.elements.is_empty());
        assert!(state.last_raw_screenshot.is_none());
    }

    #[test]
    fn test_initial_state() {
        let state = AgentState::new("objective".to_string(), 7);
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.node, Node::Perceive);
        assert_eq!(state.steps_taken, 0);
        assert_eq!(state.max_steps, 7);
        assert_eq!(state.error_count, 0);
    }
}
