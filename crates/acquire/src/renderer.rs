//! Seam to the headless rendering engine.
//!
//! A [`Renderer`] owns a browser session and opens [`RenderedPage`]s. The
//! explorer only talks to pages through this trait, so tests drive it with
//! scripted fakes and production plugs in the chromium backend.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RenderError;

/// Which matches of a probe selector are considered for a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Only the first element matching the selector.
    FirstMatch,
    /// Every element matching the selector, in document order.
    AnyMatch,
}

/// A clickable-control probe: a CSS selector, optionally narrowed to
/// elements whose text contains `text` (case-insensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickProbe {
    pub selector: &'static str,
    pub text: Option<&'static str>,
}

impl ClickProbe {
    pub const fn css(selector: &'static str) -> Self {
        Self { selector, text: None }
    }

    pub const fn with_text(selector: &'static str, text: &'static str) -> Self {
        Self { selector, text: Some(text) }
    }
}

/// One open page in the rendering engine.
#[async_trait]
pub trait RenderedPage: Send + Sync {
    /// Current URL of the page (may differ from the requested one after redirects).
    fn url(&self) -> &str;

    async fn dom_height(&self) -> Result<u64, RenderError>;

    /// Number of elements matching a CSS selector.
    async fn count_matches(&self, selector: &str) -> Result<u64, RenderError>;

    async fn scroll_to_bottom(&self) -> Result<(), RenderError>;

    async fn scroll_by(&self, delta_y: i64) -> Result<(), RenderError>;

    /// Click the first visible and enabled element matching `probe`.
    /// Returns whether something was clicked.
    async fn click(&self, probe: &ClickProbe, mode: ProbeMode) -> Result<bool, RenderError>;

    /// Let the page settle (lazy loaders, network, animations).
    async fn settle(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    async fn title(&self) -> Result<String, RenderError>;

    /// Full serialized markup.
    async fn html(&self) -> Result<String, RenderError>;

    /// Visible text with script/style/nav/header/footer/aside removed.
    async fn visible_text(&self) -> Result<String, RenderError>;

    async fn meta_description(&self) -> Result<String, RenderError>;

    async fn close(&self) -> Result<(), RenderError>;
}

/// A browser session able to open pages.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a page and navigate it to `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn RenderedPage>, RenderError>;

    /// Tear the session down and start a fresh one.
    async fn reset(&self) -> Result<(), RenderError>;

    /// Release the session for good.
    async fn shutdown(&self) {}
}

/// Renderer used when no rendering backend is compiled in or configured.
#[derive(Debug, Default, Clone)]
pub struct DisabledRenderer;

#[async_trait]
impl Renderer for DisabledRenderer {
    async fn open(&self, _url: &str) -> Result<Box<dyn RenderedPage>, RenderError> {
        Err(RenderError::Unavailable(
            "no rendering backend configured (build with --features chromium)".into(),
        ))
    }

    async fn reset(&self) -> Result<(), RenderError> {
        Ok(())
    }
}
