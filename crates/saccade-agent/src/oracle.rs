//! Decision oracle adapter — maps page state + objective to one action.
//!
//! Two implementations behind one contract: a live vision-language call and a
//! deterministic mock so the control loop runs and tests without network
//! access. The contract is infallible: a malformed or erroring oracle
//! response degrades to a `fail` decision, never a crash.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::Provider;
use crate::{element_list, InteractiveElement};

/// One action from the oracle's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    #[serde(rename = "type")]
    Type,
    Hover,
    Navigate,
    Wait,
    PressKey,
    Scroll,
    ToolUse,
    Done,
    Fail,
    HumanRequest,
}

impl ActionKind {
    /// Actions that touch the browser at all (everything the action engine
    /// dispatches, as opposed to flow control and tool invocations).
    pub fn is_browser_action(self) -> bool {
        !matches!(
            self,
            ActionKind::ToolUse | ActionKind::Done | ActionKind::Fail | ActionKind::HumanRequest
        )
    }

    /// Physical input events. These are the actions that consume a step.
    pub fn is_physical(self) -> bool {
        matches!(
            self,
            ActionKind::Click
                | ActionKind::Type
                | ActionKind::Hover
                | ActionKind::PressKey
                | ActionKind::Scroll
        )
    }
}

/// A single decision produced by one reasoning step. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionKind,
    #[serde(default)]
    pub element_id: Option<u32>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// Synthetic `fail` decision carrying an error as its rationale.
    pub fn failed(reason: impl Into<String>) -> Self {
        Decision {
            action: ActionKind::Fail,
            element_id: None,
            value: None,
            reasoning: reason.into(),
        }
    }
}

/// Maps objective + annotated view + element list to one decision.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        objective: &str,
        annotated_png: &[u8],
        elements: &[InteractiveElement],
        text_map: &str,
    ) -> Decision;
}

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. Complete the objective via JSON output.

Actions:
- Browser: "click", "type", "scroll", "hover", "navigate", "wait", "press_key"
- System: "tool_use" (value format: "tool_name|arg1|arg2...")
- Flow: "done", "fail", "human_request"

Tools available:
- "write_file|filename|content"
- "read_file|filename"

Output format:
{
    "reasoning": "...",
    "action": "click" | "type" | ... | "tool_use",
    "element_id": <int> (omit for navigate/wait/tool_use/flow actions),
    "value": "..." (text to type, URL, key to press, or tool arguments)
}

Respond with the JSON object only."#;

/// Strip surrounding markdown code fences from an oracle response.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(inner) = trimmed
        .split_once("```json")
        .and_then(|(_, rest)| rest.split_once("```"))
        .map(|(body, _)| body)
    {
        return inner.trim();
    }
    if let Some(inner) = trimmed
        .split_once("```")
        .and_then(|(_, rest)| rest.split_once("```"))
        .map(|(body, _)| body)
    {
        return inner.trim();
    }
    trimmed
}

/// Parse a raw oracle response into a decision.
pub fn parse_decision(text: &str) -> Result<Decision, serde_json::Error> {
    serde_json::from_str(strip_code_fences(text))
}

// =============================================================================
// Live oracle
// =============================================================================

/// Vision-language oracle over HTTPS.
pub struct LiveOracle {
    http: Client,
    provider: Provider,
    api_key: String,
    model: String,
}

impl LiveOracle {
    pub fn new(provider: Provider, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        LiveOracle {
            http: Client::new(),
            provider,
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn user_text(objective: &str, elements: &[InteractiveElement], text_map: &str) -> String {
        let mut text = format!(
            "Objective: {}\n\nVisible Interactive Elements:\n{}",
            objective,
            element_list(elements)
        );
        if !text_map.is_empty() {
            text.push_str("\n\nPage Text Content (OCR-like):\n");
            text.push_str(text_map);
        }
        text
    }

    fn anthropic_body(&self, user_text: &str, png_base64: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": SYSTEM_PROMPT,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": user_text },
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/png",
                            "data": png_base64,
                        }
                    },
                ]
            }],
        })
    }

    fn openai_body(&self, user_text: &str, png_base64: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_text },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{}", png_base64) }
                        },
                    ]
                },
            ],
        })
    }

    async fn call(&self, body: &Value) -> Result<Value, String> {
        let (url, auth_header, auth_value) = match self.provider {
            Provider::Anthropic => (
                "https://api.anthropic.com/v1/messages",
                "x-api-key",
                self.api_key.clone(),
            ),
            Provider::OpenAi => (
                "https://api.openai.com/v1/chat/completions",
                "authorization",
                format!("Bearer {}", self.api_key),
            ),
            Provider::Mock => unreachable!("mock provider never builds a LiveOracle"),
        };

        for attempt in 0..3u64 {
            let mut req = self
                .http
                .post(url)
                .header(auth_header, &auth_value)
                .header("content-type", "application/json");
            if matches!(self.provider, Provider::Anthropic) {
                req = req.header("anthropic-version", "2023-06-01");
            }

            let resp = req.json(body).send().await.map_err(|e| e.to_string())?;
            let status = resp.status();
            let json: Value = resp.json().await.map_err(|e| e.to_string())?;

            if status.as_u16() == 429 {
                let wait = (attempt + 1) * 5;
                warn!("oracle rate limited, waiting {}s", wait);
                tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                continue;
            }
            if let Some(err) = json.get("error") {
                return Err(err.to_string());
            }
            return Ok(json);
        }
        Err("rate limited after 3 attempts".to_string())
    }

    fn response_text(&self, json: &Value) -> Option<String> {
        match self.provider {
            Provider::Anthropic => json["content"]
                .as_array()?
                .iter()
                .find(|block| block["type"] == "text")
                .and_then(|block| block["text"].as_str())
                .map(str::to_string),
            Provider::OpenAi => json["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string),
            Provider::Mock => None,
        }
    }
}

#[async_trait]
impl DecisionOracle for LiveOracle {
    async fn decide(
        &self,
        objective: &str,
        annotated_png: &[u8],
        elements: &[InteractiveElement],
        text_map: &str,
    ) -> Decision {
        let png_base64 = BASE64.encode(annotated_png);
        let user_text = Self::user_text(objective, elements, text_map);
        let body = match self.provider {
            Provider::OpenAi => self.openai_body(&user_text, &png_base64),
            _ => self.anthropic_body(&user_text, &png_base64),
        };

        let json = match self.call(&body).await {
            Ok(json) => json,
            Err(e) => {
                warn!("oracle call failed: {}", e);
                return Decision::failed(format!("oracle error: {}", e));
            }
        };

        let Some(text) = self.response_text(&json) else {
            return Decision::failed("oracle returned no text content");
        };

        match parse_decision(&text) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("unparseable oracle response: {}", e);
                Decision::failed(format!("unparseable oracle response: {}", e))
            }
        }
    }
}

// =============================================================================
// Deterministic mock
// =============================================================================

/// Fixed text the mock types into the first input it sees.
pub const MOCK_SAMPLE_VALUE: &str = "Rust Programming";

/// Oracle-less operation: type into the first `input` element, else done.
/// Exists so the whole control loop runs and tests without a live oracle.
#[derive(Debug, Default)]
pub struct MockOracle;

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn decide(
        &self,
        _objective: &str,
        _annotated_png: &[u8],
        elements: &[InteractiveElement],
        _text_map: &str,
    ) -> Decision {
        if let Some(input) = elements.iter().find(|e| e.tag_name == "input") {
            return Decision {
                action: ActionKind::Type,
                element_id: Some(input.id),
                value: Some(MOCK_SAMPLE_VALUE.to_string()),
                reasoning: "Found an input field, typing the search query.".to_string(),
            };
        }
        Decision {
            action: ActionKind::Done,
            element_id: None,
            value: None,
            reasoning: "No input field found, ending task.".to_string(),
        }
    }
}
