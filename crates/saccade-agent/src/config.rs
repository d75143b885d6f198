//! Session configuration. Passed explicitly into session construction so
//! sessions stay independently testable and concurrently runnable — nothing
//! in the loop reads ambient process state.

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

use crate::oracle::{DecisionOracle, LiveOracle, MockOracle};

/// Which decision oracle backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mock,
    Anthropic,
    OpenAi,
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Provider::Mock),
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Full configuration surface for one agent session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub max_steps: u32,
    /// Pixel-change ratio below which an action is judged ineffective.
    pub self_heal_threshold: f64,
    /// Retain a raw-screenshot baseline and diff against it each cycle.
    /// Off means every cycle is marked running without verification.
    pub self_healing: bool,
    pub objective: String,
    pub start_url: String,
    /// Where per-step annotated views and the checkpoint file land.
    pub artifact_dir: PathBuf,
    pub session_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            provider: Provider::Mock,
            api_key: None,
            model: None,
            headless: false,
            viewport_width: 1280,
            viewport_height: 800,
            max_steps: 10,
            self_heal_threshold: 0.01,
            self_healing: true,
            objective: "Search for 'Rust Programming' on Google".to_string(),
            start_url: "https://www.google.com".to_string(),
            artifact_dir: PathBuf::from("."),
            session_id: "session_001".to_string(),
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `SACCADE_*` environment variables (and the
    /// provider-specific API key variables).
    pub fn from_env() -> Self {
        let mut config = AgentConfig::default();

        if let Some(provider) = env_parse::<Provider>("SACCADE_PROVIDER") {
            config.provider = provider;
        }
        config.api_key = match config.provider {
            Provider::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
            Provider::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
            Provider::Mock => None,
        };
        if let Ok(model) = std::env::var("SACCADE_MODEL") {
            config.model = Some(model);
        }
        if let Some(headless) = env_parse::<bool>("SACCADE_HEADLESS") {
            config.headless = headless;
        }
        if let Some(width) = env_parse::<u32>("SACCADE_VIEWPORT_WIDTH") {
            config.viewport_width = width;
        }
        if let Some(height) = env_parse::<u32>("SACCADE_VIEWPORT_HEIGHT") {
            config.viewport_height = height;
        }
        if let Some(max_steps) = env_parse::<u32>("SACCADE_MAX_STEPS") {
            config.max_steps = max_steps;
        }
        if let Some(threshold) = env_parse::<f64>("SACCADE_SELF_HEAL_THRESHOLD") {
            config.self_heal_threshold = threshold;
        }
        if let Ok(objective) = std::env::var("SACCADE_OBJECTIVE") {
            config.objective = objective;
        }
        if let Ok(url) = std::env::var("SACCADE_START_URL") {
            config.start_url = url;
        }
        if let Ok(dir) = std::env::var("SACCADE_ARTIFACT_DIR") {
            config.artifact_dir = PathBuf::from(dir);
        }
        if let Ok(id) = std::env::var("SACCADE_SESSION_ID") {
            config.session_id = id;
        }

        config
    }

    /// Model name, defaulted per provider when unset.
    pub fn model_name(&self) -> &str {
        if let Some(ref model) = self.model {
            return model;
        }
        match self.provider {
            Provider::Anthropic => "claude-3-5-sonnet-20240620",
            Provider::OpenAi => "gpt-4o",
            Provider::Mock => "mock",
        }
    }

    /// Build the decision oracle this config selects. A live provider with
    /// no API key degrades to the mock, so the loop always has an oracle.
    pub fn build_oracle(&self) -> Box<dyn DecisionOracle> {
        match (self.provider, &self.api_key) {
            (Provider::Mock, _) | (_, None) => Box::new(MockOracle),
            (provider, Some(key)) => {
                Box::new(LiveOracle::new(provider, key.clone(), self.model_name()))
            }
        }
    }

    /// Path of this session's checkpoint file.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.artifact_dir.join(format!("{}.json", self.session_id))
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
