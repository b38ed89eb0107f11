//! DOM enumeration — finds the visible interactive elements on the page.

use eoka::Page;
use serde::Deserialize;

use crate::{Result, SurfaceError};

/// Raw observation straight out of the page, viewport coordinates.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ObservedElement {
    pub tag: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl ObservedElement {
    /// Click point for coordinate dispatch.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// JavaScript that enumerates interactive elements inside the viewport.
const OBSERVE_JS: &str = r#"
(() => {
    const INTERACTIVE = 'a, button, input, select, textarea, [role="button"], [role="link"], [role="tab"], [role="menuitem"], [onclick], [contenteditable="true"]';
    const results = [];
    const seen = new Set();

    // Helper: find associated label for a form element
    function getLabel(el) {
        if (el.id) {
            const label = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
            if (label) return label.textContent.trim();
        }
        const parentLabel = el.closest('label');
        if (parentLabel) {
            const clone = parentLabel.cloneNode(true);
            clone.querySelectorAll('input, select, textarea').forEach(c => c.remove());
            const t = clone.textContent.trim();
            if (t) return t;
        }
        const labelledBy = el.getAttribute('aria-labelledby');
        if (labelledBy) {
            const lbl = document.getElementById(labelledBy);
            if (lbl) return lbl.textContent.trim();
        }
        return '';
    }

    // Collect elements from a root (document or shadowRoot)
    function collect(root) {
        const all = root.querySelectorAll('*');
        for (const node of all) {
            if (node.matches(INTERACTIVE)) processElement(node);
            if (node.shadowRoot) collect(node.shadowRoot);
        }
    }

    function processElement(el) {
        const rect = el.getBoundingClientRect();
        if (rect.width < 2 || rect.height < 2) return;

        const style = getComputedStyle(el);
        if (style.display === 'none' || style.visibility === 'hidden' || parseFloat(style.opacity) < 0.1) return;

        // Only elements visible in the viewport can be clicked by coordinate
        if (rect.bottom < 0 || rect.top > window.innerHeight) return;
        if (rect.right < 0 || rect.left > window.innerWidth) return;

        const tag = el.tagName.toLowerCase();
        const isFormEl = tag === 'input' || tag === 'select' || tag === 'textarea';

        // Get meaningful text
        let text = el.getAttribute('aria-label') || '';
        if (!text) {
            if (tag === 'a' || tag === 'button') {
                text = (el.textContent || '').trim().replace(/\s+/g, ' ');
                if (text.length > 80) text = '';
            } else if (isFormEl) {
                text = getLabel(el) || el.getAttribute('placeholder') || '';
                if (!text && tag === 'select') {
                    const opt = el.options && el.options[el.selectedIndex];
                    text = opt ? opt.text : '';
                }
            } else {
                text = (el.textContent || '').trim().replace(/\s+/g, ' ');
            }
        }
        if (text.length > 60) text = text.substring(0, 57) + '...';

        if (!text && !isFormEl && !el.getAttribute('title')) return;

        // Skip redundant nested wrappers
        if ((tag === 'a' || tag === 'button') && el.children.length === 1) {
            const childTag = el.children[0].tagName.toLowerCase();
            if (childTag === 'button' || childTag === 'input') return;
        }

        // Dedup by geometry — overlapping duplicates confuse the labels
        const key = tag + ':' + Math.round(rect.x) + ':' + Math.round(rect.y);
        if (seen.has(key)) return;
        seen.add(key);

        results.push({
            tag,
            text,
            x: Math.round(rect.x),
            y: Math.round(rect.y),
            w: Math.round(rect.width),
            h: Math.round(rect.height),
        });
    }

    collect(document);
    return JSON.stringify(results);
})()
"#;

/// Run the observe script and return the parsed elements, capped at `max`.
pub(crate) async fn observe(page: &Page, max: usize) -> Result<Vec<ObservedElement>> {
    let json_str: String = page.evaluate(OBSERVE_JS).await?;

    let mut raw: Vec<ObservedElement> = serde_json::from_str(&json_str)
        .map_err(|e| SurfaceError::Script(format!("observe parse error: {}", e)))?;

    if raw.len() > max {
        raw.truncate(max);
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_of_bbox() {
        let el = ObservedElement {
            tag: "button".into(),
            text: "Go".into(),
            x: 100.0,
            y: 200.0,
            w: 80.0,
            h: 30.0,
        };
        assert_eq!(el.center(), (140.0, 215.0));
    }

    #[test]
    fn test_raw_element_parses() {
        let json = r#"[{"tag":"a","text":"Home","x":1,"y":2,"w":30,"h":10}]"#;
        let parsed: Vec<ObservedElement> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].tag, "a");
    }
}
