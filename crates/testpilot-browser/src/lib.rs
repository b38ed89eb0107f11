//! # testpilot-browser
//!
//! Browser action surface for testpilot runs. Exposes the narrow set of
//! coordinate-driven primitives the execution engine dispatches — navigate,
//! click at a point, type, clear, scroll — plus marked screenshots: a PNG
//! with numbered overlay labels on the interactive elements, paired with the
//! label coordinates, so a vision model can point at what to click.
//!
//! The concrete backend ([`CdpSurface`]) drives Chrome over CDP via `eoka`.
//! Everything is reached through the [`BrowserSurface`] trait so engine tests
//! can swap in scripted fakes.

mod annotate;
mod cdp;
mod observe;

pub use cdp::CdpSurface;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for surface operations.
pub type Result<T> = std::result::Result<T, SurfaceError>;

/// Errors from the browser transport layer.
///
/// An `Err` means the browser itself is broken or gone. An action the page
/// merely rejected (nothing at the click point, no focused input) comes back
/// as `Ok` with [`Dispatch::success`] = false instead.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("script result malformed: {0}")]
    Script(String),

    #[error("browser already closed")]
    Closed,
}

// =============================================================================
// Types
// =============================================================================

/// Launch settings for the concrete backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserOptions {
    /// Run without a visible window.
    #[serde(default)]
    pub headless: bool,
    /// Proxy URL, e.g. `http://localhost:8080`.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Override the browser user agent.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Viewport size (default 1280x720).
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Uniform outcome envelope for dispatched actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    /// Whether the page accepted the action.
    pub success: bool,
    /// Human-readable description of what happened.
    pub detail: String,
    /// Rejection reason when `success` is false.
    pub error: Option<String>,
}

impl Dispatch {
    /// Accepted action with a description.
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            error: None,
        }
    }

    /// Rejected action with a reason.
    pub fn rejected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            detail: String::new(),
            error: Some(error),
        }
    }

    /// Render the envelope as tool-result text.
    pub fn describe(&self) -> String {
        if self.success {
            self.detail.clone()
        } else {
            format!(
                "Action failed: {}",
                self.error.as_deref().unwrap_or("unknown reason")
            )
        }
    }
}

/// Scroll motion for the scroll primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollMotion {
    /// Down by one viewport chunk.
    NextChunk,
    /// Up by one viewport chunk.
    PrevChunk,
    /// By explicit pixel deltas.
    By { dx: i64, dy: i64 },
}

/// Options for [`BrowserSurface::take_marked_screenshot`].
#[derive(Debug, Clone, Copy)]
pub struct ScreenshotOptions {
    /// Cap on the number of labeled elements.
    pub max_elements: usize,
    /// Remove the overlay after capturing.
    pub remove_after: bool,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            max_elements: 50,
            remove_after: true,
        }
    }
}

/// One labeled interactive element in a marked screenshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkedElement {
    /// Label number drawn on the screenshot.
    pub label: usize,
    /// Click point (element center), viewport coordinates.
    pub x: f64,
    pub y: f64,
    /// Lowercase tag name.
    pub tag: String,
    /// Visible text, label, or placeholder.
    pub text: String,
}

impl fmt::Display for MarkedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(
                f,
                "[{}] <{}> at ({}, {})",
                self.label, self.tag, self.x as i64, self.y as i64
            )
        } else {
            write!(
                f,
                "[{}] <{}> \"{}\" at ({}, {})",
                self.label, self.tag, self.text, self.x as i64, self.y as i64
            )
        }
    }
}

/// A screenshot with numbered overlay labels plus their coordinates.
#[derive(Debug, Clone)]
pub struct MarkedScreenshot {
    /// PNG bytes, labels already drawn in.
    pub image: Vec<u8>,
    /// Labeled elements, index-aligned with the drawn numbers.
    pub elements: Vec<MarkedElement>,
}

// =============================================================================
// Surface trait
// =============================================================================

/// The browser primitives the execution engine can dispatch.
///
/// One instance is scoped to one session and injected explicitly — there is
/// no shared global browser. All interaction is coordinate-based; element
/// identity comes from the labels on the most recent marked screenshot.
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    /// Load a URL and wait for the page to settle.
    async fn navigate(&self, url: &str) -> Result<Dispatch>;

    /// Click at a viewport point.
    async fn click(&self, x: f64, y: f64) -> Result<Dispatch>;

    /// Type into the currently focused element.
    async fn type_text(&self, text: &str) -> Result<Dispatch>;

    /// Clear the currently focused input.
    async fn clear_input(&self) -> Result<Dispatch>;

    /// Scroll the page.
    async fn scroll(&self, motion: ScrollMotion) -> Result<Dispatch>;

    /// Capture a screenshot with numbered labels on interactive elements.
    async fn take_marked_screenshot(&self, opts: &ScreenshotOptions) -> Result<MarkedScreenshot>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String>;

    /// Tear down the underlying browser. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
