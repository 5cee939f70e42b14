//! Lightweight-first content acquisition with a rendered fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use falcon_core::{FetchMethod, PageContent};
use tracing::{debug, info, warn};

use crate::budget::BudgetTable;
use crate::error::{AcquireError, RenderError};
use crate::explorer::DynamicContentExplorer;
use crate::fetch::PageFetcher;
use crate::markup;
use crate::renderer::{RenderedPage, Renderer};

/// Anything able to turn a URL into page content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn acquire(&self, url: &str) -> Result<PageContent, AcquireError>;
}

/// Page-open retries on the rendered path.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    /// Wait after navigation before exploring.
    pub initial_settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
            initial_settle: Duration::from_secs(3),
        }
    }
}

pub struct ContentAcquirer {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Arc<dyn Renderer>,
    budgets: BudgetTable,
    explorer: DynamicContentExplorer,
    retry: RetryPolicy,
}

impl ContentAcquirer {
    pub fn new(fetcher: Arc<dyn PageFetcher>, renderer: Arc<dyn Renderer>, budgets: BudgetTable) -> Self {
        Self {
            fetcher,
            renderer,
            budgets,
            explorer: DynamicContentExplorer::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_explorer(mut self, explorer: DynamicContentExplorer) -> Self {
        self.explorer = explorer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    async fn lightweight(&self, url: &str) -> Result<PageContent, AcquireError> {
        let html = self.fetcher.fetch(url).await?;
        let parsed = markup::parse(&html, url);
        Ok(PageContent {
            url: url.to_string(),
            title: parsed.title,
            meta_description: parsed.meta_description,
            html,
            text: parsed.text,
            social_links: parsed.social_links,
            emails: parsed.emails,
            method: FetchMethod::Lightweight,
            exploration: None,
        })
    }

    async fn open_with_retry(&self, url: &str) -> Result<Box<dyn RenderedPage>, RenderError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.renderer.open(url).await {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };
            if matches!(err, RenderError::Unavailable(_)) || attempt >= attempts {
                return Err(err);
            }
            warn!(url, attempt, error = %err, "page open failed, retrying");
            if err.is_session_closed() {
                warn!("render session closed, reinitializing");
                if let Err(e) = self.renderer.reset().await {
                    warn!(error = %e, "render session reset failed");
                }
            }
            tokio::time::sleep(self.retry.backoff).await;
        }
    }

    async fn rendered(&self, url: &str) -> Result<PageContent, AcquireError> {
        let page = OpenPage::new(self.open_with_retry(url).await?);
        let result = self.snapshot(url, page.get()).await;
        page.close(url).await;
        result
    }

    async fn snapshot(&self, url: &str, page: &dyn RenderedPage) -> Result<PageContent, AcquireError> {
        page.settle(self.retry.initial_settle).await;

        let budget = self.budgets.resolve(url);
        let report = self.explorer.explore(page, &budget).await;

        let title = page.title().await?;
        let html = page.html().await?;
        let visible = page.visible_text().await?;
        let meta_description = page.meta_description().await?;
        let parsed = markup::parse(&html, page.url());

        let text = match markup::collapse_whitespace(&visible) {
            t if t.is_empty() => parsed.text,
            t => t,
        };

        Ok(PageContent {
            url: url.to_string(),
            title: markup::collapse_whitespace(&title),
            meta_description: markup::collapse_whitespace(&meta_description),
            html,
            text,
            social_links: parsed.social_links,
            emails: parsed.emails,
            method: FetchMethod::Rendered,
            exploration: Some(report),
        })
    }
}

/// An open rendered page that gets closed even when the acquiring future is
/// dropped mid-exploration (job deadline, aborted task).
struct OpenPage {
    page: Arc<dyn RenderedPage>,
    closed: bool,
}

impl OpenPage {
    fn new(page: Box<dyn RenderedPage>) -> Self {
        Self {
            page: Arc::from(page),
            closed: false,
        }
    }

    fn get(&self) -> &dyn RenderedPage {
        self.page.as_ref()
    }

    async fn close(mut self, url: &str) {
        if let Err(e) = self.page.close().await {
            warn!(url, error = %e, "failed to close rendered page");
        }
        self.closed = true;
    }
}

impl Drop for OpenPage {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = self.page.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(url = page.url(), "closing abandoned rendered page");
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!(url = page.url(), error = %e, "failed to close abandoned page");
                    }
                });
            }
            Err(_) => warn!(url = page.url(), "no runtime left to close abandoned page"),
        }
    }
}

#[async_trait]
impl ContentSource for ContentAcquirer {
    async fn acquire(&self, url: &str) -> Result<PageContent, AcquireError> {
        info!(url, "acquiring page content");

        let lightweight_note = match self.lightweight(url).await {
            Ok(content) if markup::is_sufficient(&content.text) => {
                info!(url, words = content.word_count(), "lightweight fetch sufficient");
                return Ok(content);
            }
            Ok(content) => {
                let words = content.word_count();
                info!(url, words, "lightweight content insufficient, falling back to rendering");
                format!("insufficient content ({words} words)")
            }
            Err(e) => {
                warn!(url, error = %e, "lightweight fetch failed, falling back to rendering");
                e.to_string()
            }
        };

        match self.rendered(url).await {
            Ok(content) => {
                info!(url, words = content.word_count(), "rendered fetch complete");
                Ok(content)
            }
            Err(e) => {
                warn!(url, error = %e, "rendered fetch failed");
                Err(AcquireError::Exhausted {
                    url: url.to_string(),
                    cause: Box::new(e),
                    lightweight: Some(lightweight_note),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use falcon_core::StopReason;

    use super::*;
    use crate::budget::ExplorationBudget;
    use crate::explorer::tests::FakePage;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    struct FakeFetcher(Result<String, u16>);

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String, AcquireError> {
            match &self.0 {
                Ok(body) => Ok(body.clone()),
                Err(status) => Err(AcquireError::Status {
                    status: *status,
                    url: url.to_string(),
                }),
            }
        }
    }

    /// Fails `open` with the scripted errors, then serves a static page.
    struct FakeRenderer {
        failures: Mutex<Vec<RenderError>>,
        opens: AtomicU32,
        resets: AtomicU32,
        closes: Arc<AtomicUsize>,
        text: String,
    }

    impl FakeRenderer {
        fn new(text: String, failures: Vec<RenderError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                opens: AtomicU32::new(0),
                resets: AtomicU32::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
                text,
            }
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn open(&self, _url: &str) -> Result<Box<dyn RenderedPage>, RenderError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut failures = self.failures.lock().unwrap();
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.remove(0))
                }
            };
            if let Some(e) = next {
                return Err(e);
            }
            let mut page = FakePage::new(vec![(3_000, 20)]);
            page.text = self.text.clone();
            page.closes = self.closes.clone();
            Ok(Box::new(page))
        }

        async fn reset(&self) -> Result<(), RenderError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn acquirer(fetcher: FakeFetcher, renderer: Arc<FakeRenderer>) -> ContentAcquirer {
        ContentAcquirer::new(
            Arc::new(fetcher),
            renderer,
            BudgetTable::new(ExplorationBudget::default()),
        )
    }

    fn html_with(text: &str) -> String {
        format!("<html><head><title>List</title></head><body><p>{text}</p></body></html>")
    }

    #[tokio::test(start_paused = true)]
    async fn sufficient_lightweight_skips_rendering() {
        let renderer = Arc::new(FakeRenderer::new(words(100), vec![]));
        let a = acquirer(FakeFetcher(Ok(html_with(&words(80)))), renderer.clone());
        let c = a.acquire("https://example.org/list").await.unwrap();
        assert_eq!(c.method, FetchMethod::Lightweight);
        assert_eq!(c.title, "List");
        assert!(c.exploration.is_none());
        assert_eq!(renderer.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn thin_page_falls_back_to_rendering() {
        let renderer = Arc::new(FakeRenderer::new(words(120), vec![]));
        let a = acquirer(FakeFetcher(Ok(html_with(&words(30)))), renderer.clone());
        let c = a.acquire("https://example.org/list").await.unwrap();
        assert_eq!(c.method, FetchMethod::Rendered);
        assert_eq!(c.word_count(), 120);
        let report = c.exploration.unwrap();
        assert_eq!(report.stop_reason, StopReason::NoChange);
        assert_eq!(renderer.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn page_dropped_mid_exploration_is_still_closed() {
        let renderer = Arc::new(FakeRenderer::new(words(120), vec![]));
        let a = acquirer(FakeFetcher(Ok(html_with(&words(30)))), renderer.clone());

        let cut = tokio::time::timeout(Duration::from_secs(4), a.acquire("https://example.org/list")).await;
        assert!(cut.is_err());
        assert_eq!(renderer.opens.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(renderer.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn http_error_falls_back_to_rendering() {
        let renderer = Arc::new(FakeRenderer::new(words(60), vec![]));
        let a = acquirer(FakeFetcher(Err(403)), renderer);
        let c = a.acquire("https://example.org/list").await.unwrap();
        assert_eq!(c.method, FetchMethod::Rendered);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_is_reset_between_retries() {
        let renderer = Arc::new(FakeRenderer::new(
            words(60),
            vec![
                RenderError::SessionClosed("browser has been closed".into()),
                RenderError::Navigation("timeout".into()),
            ],
        ));
        let a = acquirer(FakeFetcher(Err(500)), renderer.clone());
        let c = a.acquire("https://example.org/list").await.unwrap();
        assert_eq!(c.method, FetchMethod::Rendered);
        assert_eq!(renderer.opens.load(Ordering::SeqCst), 3);
        assert_eq!(renderer.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn both_paths_failing_is_an_acquisition_error() {
        let renderer = Arc::new(FakeRenderer::new(
            words(60),
            vec![
                RenderError::Navigation("one".into()),
                RenderError::Navigation("two".into()),
                RenderError::Navigation("three".into()),
            ],
        ));
        let a = acquirer(FakeFetcher(Err(503)), renderer.clone());
        let err = a.acquire("https://example.org/list").await.unwrap_err();
        match err {
            AcquireError::Exhausted { cause, lightweight, .. } => {
                assert!(cause.to_string().contains("three"));
                assert!(lightweight.unwrap().contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(renderer.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_renderer_is_not_retried() {
        let renderer = Arc::new(FakeRenderer::new(
            String::new(),
            vec![RenderError::Unavailable("no backend".into())],
        ));
        let a = acquirer(FakeFetcher(Ok(html_with("tiny"))), renderer.clone());
        assert!(a.acquire("https://example.org/").await.is_err());
        assert_eq!(renderer.opens.load(Ordering::SeqCst), 1);
    }
}
