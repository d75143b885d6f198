//! Action engine — translates one decision into browser input events.

use eoka::Page;
use tracing::{debug, info, warn};

use crate::oracle::{ActionKind, Decision};
use crate::{Error, InteractiveElement, Result};

/// Fixed pause for the `wait` action.
const WAIT_ACTION_MS: u64 = 2000;
/// Settle delay after every dispatched action, so the page's asynchronous
/// reaction begins before the next perception snapshot.
const SETTLE_MS: u64 = 1000;
/// Viewport scroll increment for the `scroll` action.
const SCROLL_PX: u32 = 500;

/// Resolve a decision's element id against the current snapshot.
///
/// Stale ids from a previous cycle land here as `ElementNotFound` — they must
/// never be dereferenced against a newer list.
pub fn resolve(elements: &[InteractiveElement], element_id: Option<u32>) -> Result<&InteractiveElement> {
    let id = element_id.ok_or(Error::ElementNotFound(0))?;
    elements
        .iter()
        .find(|el| el.id == id)
        .ok_or(Error::ElementNotFound(id))
}

/// Execute a decision against the page. Flow-control and tool actions are
/// no-ops here — the orchestrator handles them upstream.
pub async fn execute(
    page: &Page,
    decision: &Decision,
    elements: &[InteractiveElement],
) -> Result<()> {
    info!(
        "action: {:?} on {:?}",
        decision.action, decision.element_id
    );
    debug!("reasoning: {}", decision.reasoning);

    if !decision.action.is_browser_action() {
        return Ok(());
    }

    let dispatch = dispatch_browser(page, decision, elements).await;
    if let Err(ref e) = dispatch {
        warn!("action execution failed: {}", e);
    }
    dispatch?;

    // Let the page's asynchronous reaction begin before control returns
    page.wait(SETTLE_MS).await;
    Ok(())
}

async fn dispatch_browser(
    page: &Page,
    decision: &Decision,
    elements: &[InteractiveElement],
) -> Result<()> {
    match decision.action {
        ActionKind::Navigate => {
            let url = require_value(decision)?;
            page.goto(url).await?;
            debug!("navigated to {}", url);
            return Ok(());
        }
        ActionKind::Wait => {
            debug!("waiting {}ms", WAIT_ACTION_MS);
            page.wait(WAIT_ACTION_MS).await;
            return Ok(());
        }
        _ => {}
    }

    let target = match resolve(elements, decision.element_id) {
        Ok(el) => el,
        // press_key is valid without a target: dispatch the key globally
        Err(_) if decision.action == ActionKind::PressKey => {
            let key = require_value(decision)?;
            page.human().press_key(key).await?;
            debug!("pressed '{}' globally", key);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let (cx, cy) = target.bounding_box.center();
    match decision.action {
        ActionKind::Click => {
            move_pointer(page, cx, cy).await?;
            page.click(&target.selector).await?;
            debug!("clicked at ({}, {})", cx, cy);
        }
        ActionKind::Type => {
            let text = require_value(decision)?;
            // Click to focus, type, then submit via Enter
            move_pointer(page, cx, cy).await?;
            page.click(&target.selector).await?;
            page.type_text(text).await?;
            page.human().press_key("Enter").await?;
            debug!("typed '{}' and pressed Enter", text);
        }
        ActionKind::Hover => {
            move_pointer(page, cx, cy).await?;
            debug!("hovered at ({}, {})", cx, cy);
        }
        ActionKind::PressKey => {
            let key = require_value(decision)?;
            move_pointer(page, cx, cy).await?;
            page.click(&target.selector).await?;
            page.human().press_key(key).await?;
            debug!("pressed '{}' on element {}", key, target.id);
        }
        ActionKind::Scroll => {
            // Fixed viewport scroll; the target element is ignored
            page.execute(&format!("window.scrollBy(0, {})", SCROLL_PX))
                .await?;
            debug!("scrolled down {}px", SCROLL_PX);
        }
        _ => unreachable!("flow-control actions handled before dispatch"),
    }
    Ok(())
}

async fn move_pointer(page: &Page, x: i32, y: i32) -> Result<()> {
    page.session()
        .dispatch_mouse_event(
            eoka::cdp::MouseEventType::MouseMoved,
            x as f64,
            y as f64,
            None,
            None,
        )
        .await?;
    Ok(())
}

fn require_value(decision: &Decision) -> Result<&str> {
    decision
        .value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Action(format!("{:?} requires a value", decision.action)))
}
