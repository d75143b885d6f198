//! # saccade-agent
//!
//! Closed-loop browser agent core. Drives a browser toward a natural-language
//! objective: perceive the page, ask a vision-capable oracle for one action,
//! execute it, verify the screen actually changed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use saccade_agent::{AgentConfig, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> saccade_agent::Result<()> {
//! let config = AgentConfig::from_env();
//! let browser = eoka::Browser::launch().await?;
//! let page = browser.new_page("https://www.google.com").await?;
//!
//! let mut session = Session::new(page, config);
//! let outcome = session.run().await?;
//! println!("finished: {:?} after {} steps", outcome.status, outcome.steps_taken);
//! # Ok(())
//! # }
//! ```
//!
//! The loop never trusts the oracle's self-report of success — only the
//! observed pixel change between consecutive screenshots.

pub mod action;
pub mod annotate;
pub mod config;
pub mod observe;
pub mod oracle;
pub mod session;
pub mod tools;
pub mod verify;

pub use config::{AgentConfig, Provider};
pub use oracle::{ActionKind, Decision, DecisionOracle, LiveOracle, MockOracle};
pub use session::{AgentState, Node, Outcome, Session, Status};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result type for saccade-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The decision referenced an element id absent from the current snapshot.
    #[error("element id {0} not found in current perception snapshot")]
    ElementNotFound(u32),

    /// Oracle transport or parse failure. Degraded to a `fail` decision
    /// inside the adapter; surfaces here only for adapter-internal plumbing.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// Input injection or navigation failure during action dispatch.
    #[error("action failed: {0}")]
    Action(String),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("image decode error: {0}")]
    Image(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Axis-aligned box in viewport pixels. Captured once per perception cycle;
/// stale the moment the page mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Center point — the physical target for pointer actions.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// An interactive element captured by one perception cycle.
///
/// Ids are assigned sequentially from 1 in DOM-query order and are only
/// meaningful against the snapshot that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub id: u32,
    pub tag_name: String,
    pub bounding_box: BoundingBox,
    /// Non-empty values among placeholder/title/aria-label/id/name.
    pub attributes: BTreeMap<String, String>,
    /// Trimmed visible text, truncated to 100 chars.
    pub text_content: String,
    /// CSS selector the capture script built for this element.
    pub selector: String,
}

impl fmt::Display for InteractiveElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID {}: <{}>", self.id, self.tag_name)?;
        if !self.text_content.is_empty() {
            write!(f, " \"{}\"", self.text_content)?;
        }
        for (key, value) in &self.attributes {
            write!(f, " {}=\"{}\"", key, value)?;
        }
        Ok(())
    }
}

/// Compact one-line-per-element list fed to the decision oracle.
pub fn element_list(elements: &[InteractiveElement]) -> String {
    let mut out = String::with_capacity(elements.len() * 48);
    for el in elements {
        out.push_str(&el.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_element(id: u32, tag: &str, text: &str) -> InteractiveElement {
        InteractiveElement {
            id,
            tag_name: tag.to_string(),
            bounding_box: BoundingBox {
                x: 10,
                y: 20,
                width: 100,
                height: 30,
            },
            attributes: BTreeMap::new(),
            text_content: text.to_string(),
            selector: format!("[data-test-id=\"{}\"]", id),
        }
    }

    #[test]
    fn test_bounding_box_center() {
        let bbox = BoundingBox {
            x: 10,
            y: 20,
            width: 100,
            height: 30,
        };
        assert_eq!(bbox.center(), (60, 35));
    }

    #[test]
    fn test_bounding_box_center_odd_dimensions() {
        let bbox = BoundingBox {
            x: 0,
            y: 0,
            width: 5,
            height: 5,
        };
        assert_eq!(bbox.center(), (2, 2));
    }

    #[test]
    fn test_element_display_basic() {
        let el = make_element(3, "button", "Submit");
        assert_eq!(el.to_string(), "ID 3: <button> \"Submit\"");
    }

    #[test]
    fn test_element_display_no_text() {
        let el = make_element(1, "input", "");
        assert_eq!(el.to_string(), "ID 1: <input>");
    }

    #[test]
    fn test_element_display_with_attributes() {
        let mut el = make_element(2, "input", "");
        el.attributes
            .insert("placeholder".to_string(), "Search".to_string());
        assert_eq!(el.to_string(), "ID 2: <input> placeholder=\"Search\"");
    }

    #[test]
    fn test_element_list_one_line_per_element() {
        let list = element_list(&[make_element(1, "a", "Home"), make_element(2, "button", "Go")]);
        assert_eq!(list, "ID 1: <a> \"Home\"\nID 2: <button> \"Go\"\n");
    }

    #[test]
    fn test_element_list_empty() {
        assert_eq!(element_list(&[]), "");
    }

    #[test]
    fn test_element_serde_round_trip() {
        let mut el = make_element(7, "a", "Docs");
        el.attributes
            .insert("aria-label".to_string(), "Documentation".to_string());
        let json = serde_json::to_string(&el).unwrap();
        let back: InteractiveElement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.tag_name, "a");
        assert_eq!(back.attributes.get("aria-label").unwrap(), "Documentation");
        assert_eq!(back.bounding_box, el.bounding_box);
    }
}
