//! Set-of-Mark annotation — numbered boxes overlaid on the screenshot.
//!
//! The overlay is injected into the DOM, captured, and removed. Ids in the
//! image always match the element list because both come from the same
//! perception snapshot. Callers wanting a clean baseline for diffing must
//! screenshot before calling in here.

use eoka::Page;

use crate::{InteractiveElement, Result};

const OVERLAY_ID: &str = "__saccade_overlay";

/// Inject id-labelled boxes over every captured element, take a screenshot,
/// remove the overlay. Returns the annotated PNG.
pub async fn annotated_screenshot(
    page: &Page,
    elements: &[InteractiveElement],
) -> Result<Vec<u8>> {
    if elements.is_empty() {
        return Ok(page.screenshot().await?);
    }

    // Element data crosses into the page as JSON — avoids all escaping issues
    let elem_data: Vec<serde_json::Value> = elements
        .iter()
        .map(|el| {
            serde_json::json!({
                "i": el.id,
                "x": el.bounding_box.x,
                "y": el.bounding_box.y,
                "w": el.bounding_box.width,
                "h": el.bounding_box.height,
            })
        })
        .collect();

    let inject_js = format!(
        r#"
(() => {{
    const data = {json};
    const container = document.createElement('div');
    container.id = '{overlay}';

    const style = document.createElement('style');
    style.textContent = `
        .{overlay}_label {{
            position: fixed;
            z-index: 2147483647;
            background: rgba(220, 38, 38, 0.9);
            color: white;
            font: bold 12px/14px monospace;
            padding: 1px 4px;
            border-radius: 2px;
            pointer-events: none;
            white-space: nowrap;
        }}
        .{overlay}_box {{
            position: fixed;
            z-index: 2147483646;
            border: 2px solid rgba(220, 38, 38, 0.8);
            pointer-events: none;
        }}
    `;
    container.appendChild(style);

    const labelH = 16;

    for (const el of data) {{
        const box = document.createElement('div');
        box.className = '{overlay}_box';
        box.style.cssText = 'left:' + el.x + 'px;top:' + el.y + 'px;width:' + el.w + 'px;height:' + el.h + 'px';
        container.appendChild(box);

        // Label sits above the box's top-left corner; flipped below the box
        // when it would render off the top edge of the viewport.
        let labelY = el.y - labelH - 2;
        if (labelY < 0) {{
            labelY = el.y + el.h + 2;
        }}

        const label = document.createElement('div');
        label.className = '{overlay}_label';
        label.style.cssText = 'left:' + el.x + 'px;top:' + labelY + 'px';
        label.textContent = String(el.i);
        container.appendChild(label);
    }}

    document.body.appendChild(container);
}})()
"#,
        json = serde_json::to_string(&elem_data)?,
        overlay = OVERLAY_ID,
    );

    page.execute(&inject_js).await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let png = page.screenshot().await?;
    page.execute(&format!(
        "document.getElementById('{}')?.remove()",
        OVERLAY_ID
    ))
    .await?;

    Ok(png)
}
