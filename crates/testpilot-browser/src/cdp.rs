//! CDP-backed surface — drives a real Chrome via eoka.

use async_trait::async_trait;
use eoka::{Browser, Page};
use serde::Deserialize;
use tracing::debug;

use crate::{
    annotate, observe, BrowserOptions, BrowserSurface, Dispatch, MarkedElement, MarkedScreenshot,
    Result, ScreenshotOptions, ScrollMotion, SurfaceError,
};

/// Outcome envelope returned by the injected interaction scripts.
#[derive(Deserialize)]
struct JsOutcome {
    ok: bool,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A session-scoped Chrome instance.
///
/// Holds one page for the whole run; `close` tears the browser down and any
/// later call fails with [`SurfaceError::Closed`].
pub struct CdpSurface {
    browser: Option<Browser>,
    page: Page,
}

impl CdpSurface {
    /// Launch a browser with the given options.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: options.headless,
            proxy: options.proxy.clone(),
            user_agent: options.user_agent.clone(),
            viewport_width: options.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: options.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "launching browser (headless: {}, proxy: {:?})",
            options.headless, options.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self {
            browser: Some(browser),
            page,
        })
    }

    fn ensure_open(&self) -> Result<&Page> {
        if self.browser.is_none() {
            return Err(SurfaceError::Closed);
        }
        Ok(&self.page)
    }

    /// Best-effort settle after page-changing actions — some sites poll
    /// forever, so the network-idle timeout is ignored.
    async fn settle(&self) {
        let _ = self.page.wait_for_network_idle(200, 2000).await;
        self.page.wait(50).await;
    }

    async fn run_outcome_script(&self, js: &str) -> Result<JsOutcome> {
        let raw: String = self.page.evaluate(js).await?;
        serde_json::from_str(&raw)
            .map_err(|e| SurfaceError::Script(format!("interaction result: {}", e)))
    }
}

#[async_trait]
impl BrowserSurface for CdpSurface {
    async fn navigate(&self, url: &str) -> Result<Dispatch> {
        let page = self.ensure_open()?;
        debug!("navigate: {}", url);
        page.goto(url).await?;
        self.settle().await;
        Ok(Dispatch::ok(format!("Navigated to {}", url)))
    }

    async fn click(&self, x: f64, y: f64) -> Result<Dispatch> {
        let page = self.ensure_open()?;
        debug!("click: ({}, {})", x, y);

        // Move the pointer first so hover-revealed targets are live
        page.session()
            .dispatch_mouse_event(eoka::cdp::MouseEventType::MouseMoved, x, y, None, None)
            .await?;
        page.wait(50).await;

        let js = format!(
            r#"
(() => {{
    const el = document.elementFromPoint({x}, {y});
    if (!el) return JSON.stringify({{ ok: false, error: 'nothing at point ({x}, {y})' }});
    const tag = el.tagName.toLowerCase();
    if (typeof el.focus === 'function') el.focus();
    if (typeof el.click === 'function') {{
        el.click();
    }} else {{
        el.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true }}));
    }}
    return JSON.stringify({{ ok: true, tag }});
}})()
"#,
            x = x,
            y = y
        );
        let outcome = self.run_outcome_script(&js).await?;
        self.settle().await;

        if outcome.ok {
            Ok(Dispatch::ok(format!(
                "Clicked <{}> at ({}, {})",
                outcome.tag.as_deref().unwrap_or("?"),
                x as i64,
                y as i64
            )))
        } else {
            Ok(Dispatch::rejected(
                outcome.error.unwrap_or_else(|| "click failed".into()),
            ))
        }
    }

    async fn type_text(&self, text: &str) -> Result<Dispatch> {
        let page = self.ensure_open()?;
        debug!("type_text: '{}'", text);

        const FOCUS_CHECK_JS: &str = r#"
(() => {
    const a = document.activeElement;
    const ok = !!a && (a.tagName === 'INPUT' || a.tagName === 'TEXTAREA' ||
        a.tagName === 'SELECT' || a.isContentEditable);
    if (!ok) return JSON.stringify({ ok: false, error: 'no focused input to type into' });
    return JSON.stringify({ ok: true, tag: a.tagName.toLowerCase() });
})()
"#;
        let outcome = self.run_outcome_script(FOCUS_CHECK_JS).await?;
        if !outcome.ok {
            return Ok(Dispatch::rejected(
                outcome.error.unwrap_or_else(|| "nothing focused".into()),
            ));
        }

        page.type_text(text).await?;
        Ok(Dispatch::ok(format!(
            "Typed \"{}\" into <{}>",
            text,
            outcome.tag.as_deref().unwrap_or("?")
        )))
    }

    async fn clear_input(&self) -> Result<Dispatch> {
        self.ensure_open()?;
        debug!("clear_input");

        // Native value setter so framework-controlled inputs observe the change
        const CLEAR_JS: &str = r#"
(() => {
    const el = document.activeElement;
    if (!el || (el.tagName !== 'INPUT' && el.tagName !== 'TEXTAREA' && !el.isContentEditable)) {
        return JSON.stringify({ ok: false, error: 'no focused input to clear' });
    }
    if (el.isContentEditable) {
        el.textContent = '';
    } else {
        const proto = el.tagName === 'INPUT'
            ? window.HTMLInputElement.prototype
            : window.HTMLTextAreaElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
        setter.call(el, '');
        el.dispatchEvent(new Event('input', { bubbles: true }));
        el.dispatchEvent(new Event('change', { bubbles: true }));
    }
    return JSON.stringify({ ok: true, tag: el.tagName.toLowerCase() });
})()
"#;
        let outcome = self.run_outcome_script(CLEAR_JS).await?;
        if outcome.ok {
            Ok(Dispatch::ok(format!(
                "Cleared <{}>",
                outcome.tag.as_deref().unwrap_or("?")
            )))
        } else {
            Ok(Dispatch::rejected(
                outcome.error.unwrap_or_else(|| "clear failed".into()),
            ))
        }
    }

    async fn scroll(&self, motion: ScrollMotion) -> Result<Dispatch> {
        let page = self.ensure_open()?;
        debug!("scroll: {:?}", motion);

        // Chunked scrolls move 80% of the viewport so context overlaps
        let delta = match motion {
            ScrollMotion::NextChunk => "0, Math.round(window.innerHeight * 0.8)".to_string(),
            ScrollMotion::PrevChunk => "0, -Math.round(window.innerHeight * 0.8)".to_string(),
            ScrollMotion::By { dx, dy } => format!("{}, {}", dx, dy),
        };
        let js = format!(
            r#"
(() => {{
    window.scrollBy({delta});
    const max = Math.max(0, document.documentElement.scrollHeight - window.innerHeight);
    return JSON.stringify({{ y: Math.round(window.scrollY), max: Math.round(max) }});
}})()
"#,
            delta = delta
        );
        let raw: String = page.evaluate(&js).await?;

        #[derive(Deserialize)]
        struct ScrollPos {
            y: i64,
            max: i64,
        }
        let pos: ScrollPos = serde_json::from_str(&raw)
            .map_err(|e| SurfaceError::Script(format!("scroll result: {}", e)))?;

        page.wait(100).await;
        Ok(Dispatch::ok(format!(
            "Scrolled to y={} (max {})",
            pos.y, pos.max
        )))
    }

    async fn take_marked_screenshot(&self, opts: &ScreenshotOptions) -> Result<MarkedScreenshot> {
        let page = self.ensure_open()?;

        let observed = observe::observe(page, opts.max_elements).await?;
        let image = annotate::labeled_screenshot(page, &observed, opts.remove_after).await?;

        let elements = observed
            .into_iter()
            .enumerate()
            .map(|(i, el)| {
                let (cx, cy) = el.center();
                MarkedElement {
                    label: i,
                    x: cx,
                    y: cy,
                    tag: el.tag,
                    text: el.text,
                }
            })
            .collect();

        Ok(MarkedScreenshot { image, elements })
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.ensure_open()?;
        Ok(page.url().await?)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            debug!("closing browser");
            browser.close().await?;
        }
        Ok(())
    }
}
