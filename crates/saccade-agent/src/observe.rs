//! DOM enumeration — interactive elements and the positioned text map.

use eoka::Page;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::{BoundingBox, InteractiveElement, Result};

#[derive(Deserialize)]
struct RawElement {
    tag: String,
    text: String,
    placeholder: String,
    title: String,
    aria_label: String,
    id: String,
    name: String,
    selector: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// JavaScript that enumerates interactive elements on the page.
///
/// Filtering happens in the page: invisible elements and boxes under the
/// 5x5 px floor never reach the agent.
const OBSERVE_JS: &str = r#"
(() => {
    const SELECTOR = 'button, a, input, select, textarea, [role="button"], [role="link"]';
    const results = [];

    function cssPath(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const parts = [];
        let node = el;
        while (node && node !== document.body && parts.length < 5) {
            let s = node.tagName.toLowerCase();
            if (node.id) {
                parts.unshift('#' + CSS.escape(node.id));
                break;
            }
            const parent = node.parentElement;
            if (parent) {
                const siblings = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (siblings.length > 1) {
                    s += ':nth-of-type(' + (siblings.indexOf(node) + 1) + ')';
                }
            }
            parts.unshift(s);
            node = parent;
        }
        return parts.join(' > ');
    }

    for (const el of document.querySelectorAll(SELECTOR)) {
        const rect = el.getBoundingClientRect();
        if (rect.width < 5 || rect.height < 5) continue;

        const style = getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden') continue;

        results.push({
            tag: el.tagName.toLowerCase(),
            text: (el.textContent || '').trim().substring(0, 100),
            placeholder: el.placeholder || '',
            title: el.title || '',
            aria_label: el.getAttribute('aria-label') || '',
            id: el.id || '',
            name: el.name || '',
            selector: cssPath(el),
            x: Math.round(rect.x),
            y: Math.round(rect.y),
            width: Math.round(rect.width),
            height: Math.round(rect.height),
        });
    }

    return JSON.stringify(results);
})()
"#;

/// JavaScript that walks visible text nodes and reports each with its
/// parent's top-left viewport coordinate. OCR-like fallback for the oracle.
const TEXT_MAP_JS: &str = r#"
(() => {
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, null, false);
    const chunks = [];
    let node;
    while ((node = walker.nextNode())) {
        const parent = node.parentElement;
        if (!parent || parent.offsetWidth <= 0 || parent.offsetHeight <= 0) continue;
        const text = node.textContent.trim();
        if (text.length > 2) {
            const rect = parent.getBoundingClientRect();
            chunks.push(text + ' [at ' + Math.round(rect.x) + ',' + Math.round(rect.y) + ']');
        }
    }
    return chunks.slice(0, 50).join('\n');
})()
"#;

/// Scan the page for interactive elements.
///
/// An empty list is a normal outcome, not an error — a page with nothing
/// actionable falls through to a terminal decision downstream.
pub async fn capture(page: &Page) -> Result<Vec<InteractiveElement>> {
    let json_str: String = page.evaluate(OBSERVE_JS).await?;
    let raw: Vec<RawElement> = serde_json::from_str(&json_str)?;
    Ok(raw.into_iter().enumerate().map(to_element).collect())
}

/// Extract visible text with approximate positions, capped at 50 chunks.
pub async fn text_map(page: &Page) -> Result<String> {
    let map: String = page.evaluate(TEXT_MAP_JS).await?;
    Ok(map)
}

fn to_element((i, raw): (usize, RawElement)) -> InteractiveElement {
    let mut attributes = BTreeMap::new();
    for (key, value) in [
        ("placeholder", raw.placeholder),
        ("title", raw.title),
        ("aria-label", raw.aria_label),
        ("id", raw.id),
        ("name", raw.name),
    ] {
        if !value.is_empty() {
            attributes.insert(key.to_string(), value);
        }
    }

    InteractiveElement {
        id: i as u32 + 1,
        tag_name: raw.tag,
        bounding_box: BoundingBox {
            x: raw.x as i32,
            y: raw.y as i32,
            width: raw.width as i32,
            height: raw.height as i32,
        },
        attributes,
        text_content: raw.text,
        selector: raw.selector,
    }
}
