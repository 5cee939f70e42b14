//! Server startup: wire collaborators into `AppState`.

use std::sync::Arc;

use anyhow::Context;
use falcon_acquire::{BudgetTable, ContentAcquirer, DisabledRenderer, HttpFetcher, Renderer};
use falcon_core::config::RendererConfig;
use falcon_core::Config;
use falcon_llm::{Extractor, LlmExtractor};
use tracing::{info, warn};

use crate::hub::NotificationHub;
use crate::jobs::{ControllerSettings, ExpiryReaper, JobController, JobStore};
use crate::processor::{DataProcessor, Processor};
use crate::state::AppState;

/// Build `AppState` and the reaper that keeps its job store bounded.
pub fn build_app_state(config: &Config) -> anyhow::Result<(Arc<AppState>, ExpiryReaper)> {
    let budgets = BudgetTable::from_config(&config.exploration).context("failed to load exploration overrides")?;
    let fetcher = HttpFetcher::new(&config.fetch).context("failed to build HTTP client")?;
    let renderer = build_renderer(&config.renderer)?;
    let acquirer = ContentAcquirer::new(Arc::new(fetcher), renderer.clone(), budgets);

    let extractor = LlmExtractor::from_config(&config.llm);
    if extractor.is_configured() {
        info!("AI extractor ready (provider: {})", config.llm.provider);
    } else {
        warn!("AI extractor not configured; jobs will fail at the AI stage until an API key is set");
    }

    let processor: Arc<dyn Processor> = Arc::new(DataProcessor::new(config.jobs.export_dir.clone()));
    let store = Arc::new(JobStore::new());
    let hub = Arc::new(NotificationHub::new(config.jobs.stuck_threshold()));

    let controller = JobController::new(
        store.clone(),
        hub.clone(),
        Arc::new(acquirer),
        Arc::new(extractor),
        processor.clone(),
        ControllerSettings::from(&config.jobs),
    );
    let reaper = ExpiryReaper::new(
        store,
        hub,
        processor,
        config.jobs.expiry(),
        config.jobs.reaper_interval(),
    );

    Ok((Arc::new(AppState { controller, renderer }), reaper))
}

/// Pick the rendering backend named by `RENDERER` (auto, chromium or none).
pub fn build_renderer(config: &RendererConfig) -> anyhow::Result<Arc<dyn Renderer>> {
    match config.kind.as_str() {
        "none" | "disabled" => {
            info!("Rendered fallback disabled");
            Ok(Arc::new(DisabledRenderer))
        }
        "auto" => chromium_renderer(config, false),
        "chromium" => chromium_renderer(config, true),
        other => anyhow::bail!("unknown renderer '{other}' (expected auto, chromium or none)"),
    }
}

#[cfg(feature = "chromium")]
fn chromium_renderer(config: &RendererConfig, _required: bool) -> anyhow::Result<Arc<dyn Renderer>> {
    info!("Rendered fallback via headless Chromium (launched on first use)");
    Ok(Arc::new(falcon_acquire::ChromiumRenderer::new(config.clone())))
}

#[cfg(not(feature = "chromium"))]
fn chromium_renderer(_config: &RendererConfig, required: bool) -> anyhow::Result<Arc<dyn Renderer>> {
    if required {
        anyhow::bail!("RENDERER=chromium requires a build with --features chromium");
    }
    warn!("Built without the chromium feature; rendered fallback disabled");
    Ok(Arc::new(DisabledRenderer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer_config(kind: &str) -> RendererConfig {
        RendererConfig {
            kind: kind.into(),
            chrome_executable: None,
            navigation_timeout_secs: 45,
        }
    }

    #[test]
    fn test_unknown_renderer_is_rejected() {
        let err = build_renderer(&renderer_config("webkit")).err().unwrap();
        assert!(err.to_string().contains("webkit"));
    }

    #[tokio::test]
    async fn test_disabled_renderer_refuses_pages() {
        let renderer = build_renderer(&renderer_config("none")).unwrap();
        assert!(renderer.open("https://example.org").await.is_err());
    }

    #[tokio::test]
    async fn test_app_state_builds_without_api_key() {
        let mut config = Config::for_profile("falcon_startup_test_unset");
        config.renderer = renderer_config("none");
        config.llm.gemini_api_key = None;
        config.llm.openai_api_key = None;
        config.exploration.overrides_file = None;
        let (state, _reaper) = build_app_state(&config).unwrap();
        assert!(!state.controller.extractor_configured());
        assert!(state.controller.list().is_empty());
    }
}
