//! Acquisition and rendering error types.

use thiserror::Error;

/// Failures reported by a [`Renderer`](crate::Renderer) or one of its pages.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The browser session behind the renderer is gone and must be re-initialized.
    #[error("render session closed: {0}")]
    SessionClosed(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page script failed: {0}")]
    Script(String),

    #[error("page closed")]
    PageClosed,

    #[error("renderer unavailable: {0}")]
    Unavailable(String),
}

impl RenderError {
    pub fn is_session_closed(&self) -> bool {
        matches!(self, Self::SessionClosed(_))
    }
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// Both the lightweight and the rendered path failed.
    #[error("failed to scrape {url}: {cause}")]
    Exhausted {
        url: String,
        cause: Box<AcquireError>,
        lightweight: Option<String>,
    },
}

impl AcquireError {
    /// True when the rendered path gave up because the render session failed.
    pub fn is_render_session_failure(&self) -> bool {
        match self {
            Self::Render(e) => e.is_session_closed(),
            Self::Exhausted { cause, .. } => cause.is_render_session_failure(),
            _ => false,
        }
    }
}

/// Failures loading the exploration overrides file.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("failed to read overrides file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid overrides file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_carries_cause() {
        let err = AcquireError::Exhausted {
            url: "https://example.org".into(),
            cause: Box::new(RenderError::Navigation("net::ERR_NAME_NOT_RESOLVED".into()).into()),
            lightweight: Some("HTTP 403 for https://example.org".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.org"));
        assert!(msg.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn session_closed_detection() {
        let err: AcquireError = RenderError::SessionClosed("browser crashed".into()).into();
        assert!(err.is_render_session_failure());
        let err: AcquireError = RenderError::PageClosed.into();
        assert!(!err.is_render_session_failure());

        let wrapped = AcquireError::Exhausted {
            url: "https://example.org".into(),
            cause: Box::new(RenderError::SessionClosed("gone".into()).into()),
            lightweight: None,
        };
        assert!(wrapped.is_render_session_failure());
    }
}
