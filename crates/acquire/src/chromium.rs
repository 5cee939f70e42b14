//! Headless Chromium backend for [`Renderer`], driven over CDP by `chromiumoxide`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use falcon_core::config::RendererConfig;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RenderError;
use crate::renderer::{ClickProbe, ProbeMode, RenderedPage, Renderer};

const LAUNCH_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--disable-features=VizDisplayCompositor",
    "--memory-pressure-off",
];

const VISIBLE_TEXT_JS: &str = r#"(() => {
    const body = document.body;
    if (!body) { return ''; }
    const copy = body.cloneNode(true);
    copy.querySelectorAll('script, style, noscript, template, nav, header, footer, aside').forEach(el => el.remove());
    return copy.innerText || copy.textContent || '';
})()"#;

const META_DESCRIPTION_JS: &str = r#"(() => {
    const m = document.querySelector('meta[name="description"]');
    return m ? (m.content || '') : '';
})()"#;

const DOM_HEIGHT_JS: &str = "Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement ? document.documentElement.scrollHeight : 0)";

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl Session {
    async fn dispose(self: Arc<Self>) {
        match Arc::try_unwrap(self) {
            Ok(mut s) => {
                if let Err(e) = s.browser.close().await {
                    debug!(error = %e, "browser close failed");
                }
                s.handler.abort();
            }
            Err(shared) => shared.handler.abort(),
        }
    }
}

/// Lazily launched Chromium session shared by all jobs.
pub struct ChromiumRenderer {
    config: RendererConfig,
    session: Mutex<Option<Arc<Session>>>,
}

impl ChromiumRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.navigation_timeout_secs.max(1))
    }

    async fn launch(&self) -> Result<Session, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.navigation_timeout());
        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }
        if let Some(path) = &self.config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(RenderError::Unavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });
        info!("headless chromium launched");
        Ok(Session { browser, handler })
    }

    async fn current_session(&self) -> Result<Arc<Session>, RenderError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.handler.is_finished() {
                return Ok(session.clone());
            }
            warn!("browser handler exited, relaunching chromium");
        }
        let session = Arc::new(self.launch().await?);
        *slot = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open(&self, url: &str) -> Result<Box<dyn RenderedPage>, RenderError> {
        let session = self.current_session().await?;
        let page = tokio::time::timeout(self.navigation_timeout(), session.browser.new_page(url))
            .await
            .map_err(|_| RenderError::Navigation(format!("navigation to {url} timed out")))?
            .map_err(classify)?;
        debug!(url, "page opened");
        Ok(Box::new(ChromiumPage {
            page,
            url: url.to_string(),
        }))
    }

    async fn reset(&self) -> Result<(), RenderError> {
        let old = self.session.lock().await.take();
        if let Some(session) = old {
            session.dispose().await;
        }
        self.current_session().await.map(|_| ())
    }

    async fn shutdown(&self) {
        let old = self.session.lock().await.take();
        if let Some(session) = old {
            session.dispose().await;
            info!("headless chromium shut down");
        }
    }
}

struct ChromiumPage {
    page: Page,
    url: String,
}

impl ChromiumPage {
    async fn eval<T: DeserializeOwned>(&self, js: String) -> Result<T, RenderError> {
        let result = self.page.evaluate(js).await.map_err(classify)?;
        result
            .into_value::<T>()
            .map_err(|e| RenderError::Script(e.to_string()))
    }
}

#[async_trait]
impl RenderedPage for ChromiumPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn dom_height(&self) -> Result<u64, RenderError> {
        let h: f64 = self.eval(DOM_HEIGHT_JS.to_string()).await?;
        Ok(h.max(0.0) as u64)
    }

    async fn count_matches(&self, selector: &str) -> Result<u64, RenderError> {
        let js = format!("document.querySelectorAll({}).length", js_string(selector));
        let n: f64 = self.eval(js).await?;
        Ok(n.max(0.0) as u64)
    }

    async fn scroll_to_bottom(&self) -> Result<(), RenderError> {
        let _: bool = self
            .eval("(() => { window.scrollTo(0, document.body ? document.body.scrollHeight : 0); return true; })()".to_string())
            .await?;
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<(), RenderError> {
        let _: bool = self
            .eval(format!("(() => {{ window.scrollBy(0, {delta_y}); return true; }})()"))
            .await?;
        Ok(())
    }

    async fn click(&self, probe: &ClickProbe, mode: ProbeMode) -> Result<bool, RenderError> {
        let js = format!(
            r#"(() => {{
    const text = {text};
    let els = Array.from(document.querySelectorAll({selector}));
    if (text !== null) {{
        els = els.filter(el => (el.innerText || el.textContent || '').toLowerCase().includes(text));
    }}
    if ({first_only}) {{ els = els.slice(0, 1); }}
    for (const el of els) {{
        const style = window.getComputedStyle(el);
        const rect = el.getBoundingClientRect();
        const visible = style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0;
        const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true';
        if (visible && enabled) {{ el.click(); return true; }}
    }}
    return false;
}})()"#,
            text = probe
                .text
                .map(|t| js_string(&t.to_lowercase()))
                .unwrap_or_else(|| "null".to_string()),
            selector = js_string(probe.selector),
            first_only = matches!(mode, ProbeMode::FirstMatch),
        );
        self.eval(js).await
    }

    async fn title(&self) -> Result<String, RenderError> {
        Ok(self.page.get_title().await.map_err(classify)?.unwrap_or_default())
    }

    async fn html(&self) -> Result<String, RenderError> {
        self.page.content().await.map_err(classify)
    }

    async fn visible_text(&self) -> Result<String, RenderError> {
        self.eval(VISIBLE_TEXT_JS.to_string()).await
    }

    async fn meta_description(&self) -> Result<String, RenderError> {
        self.eval(META_DESCRIPTION_JS.to_string()).await
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.page.clone().close().await.map_err(classify)
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Map CDP failures onto the render taxonomy; a dead connection means the
/// whole session must be relaunched.
fn classify(e: chromiumoxide::error::CdpError) -> RenderError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("has been closed") || lower.contains("channel") || lower.contains("websocket") {
        RenderError::SessionClosed(msg)
    } else if lower.contains("no target") || lower.contains("target closed") {
        RenderError::PageClosed
    } else {
        RenderError::Navigation(msg)
    }
}
