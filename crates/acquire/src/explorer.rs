//! Bounded exploration of dynamically loading pages.
//!
//! Infinite-scroll and "load more" pages have no natural end, so the explorer
//! drives a fixed set of actions per iteration and stops on whichever budget
//! or growth heuristic trips first. The outcome is summarized in an
//! [`ExplorationReport`], which is diagnostics only.

use std::time::Duration;

use falcon_core::{ExplorationReport, StopReason};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::ExplorationBudget;
use crate::error::RenderError;
use crate::renderer::{ClickProbe, ProbeMode, RenderedPage};

/// Pagination controls, tried in order; only the first match of each is considered.
const PAGINATION_PROBES: &[ClickProbe] = &[
    ClickProbe::css("button[aria-label*=\"Next\"]"),
    ClickProbe::with_text("button", "next"),
    ClickProbe::with_text("a", "next"),
    ClickProbe::with_text("button", "load more"),
    ClickProbe::with_text("button", "show more"),
    ClickProbe::css(".pagination button:last-child"),
    ClickProbe::css("[data-testid*=\"next\"]"),
    ClickProbe::css("[class*=\"next\"]"),
    ClickProbe::css("[class*=\"pagination\"] button:not([disabled]):last-child"),
    ClickProbe::css("button[class*=\"load\"]"),
    ClickProbe::css("a[rel=\"next\"]"),
];

/// "Load more" style buttons; every match is considered, at most one is clicked.
const LOAD_MORE_PROBES: &[ClickProbe] = &[
    ClickProbe::with_text("button", "load more"),
    ClickProbe::with_text("button", "show more"),
    ClickProbe::with_text("button", "view more"),
    ClickProbe::with_text("button", "see more"),
    ClickProbe::css("button[class*=\"load\"]"),
    ClickProbe::css("button[class*=\"more\"]"),
    ClickProbe::css("[data-testid*=\"load\"]"),
    ClickProbe::css("[data-testid*=\"more\"]"),
    ClickProbe::with_text("a", "load more"),
    ClickProbe::with_text("div[role=\"button\"]", "more"),
];

/// Selectors whose match count approximates the number of visible items.
const ITEM_SELECTORS: &[&str] = &[
    "[data-testid*=\"item\"]",
    "[data-testid*=\"card\"]",
    "[class*=\"item\"]",
    "[class*=\"card\"]",
    "[class*=\"entry\"]",
    "[class*=\"post\"]",
    "[class*=\"listing\"]",
    "article",
    "li[class*=\"item\"]",
    "div[class*=\"row\"]",
];

/// Below this many matched items the count falls back to all `div`s.
const ITEM_FALLBACK_FLOOR: u64 = 5;

/// Heuristic thresholds and delays. Defaults are empirically tuned values.
#[derive(Debug, Clone)]
pub struct ExplorerTuning {
    pub significant_height_delta: u64,
    pub significant_item_delta: u64,
    pub no_change_limit: u32,
    pub stall_window: Duration,
    pub runaway_item_delta: u64,
    pub large_change_delta: u64,
    pub large_change_streak: u32,
    pub pagination_every: u32,
    pub load_more_every: u32,
    pub nudge_delta: i64,
    pub scroll_settle: Duration,
    pub nudge_settle: Duration,
    pub click_settle: Duration,
    pub settle_initial: Duration,
    pub settle_after_change: Duration,
    pub settle_step: Duration,
    pub settle_max: Duration,
}

impl Default for ExplorerTuning {
    fn default() -> Self {
        Self {
            significant_height_delta: 5_000,
            significant_item_delta: 1_000,
            no_change_limit: 3,
            stall_window: Duration::from_secs(20),
            runaway_item_delta: 5_000,
            large_change_delta: 2_000,
            large_change_streak: 5,
            pagination_every: 8,
            load_more_every: 4,
            nudge_delta: -200,
            scroll_settle: Duration::from_millis(1_500),
            nudge_settle: Duration::from_millis(1_000),
            click_settle: Duration::from_millis(2_000),
            settle_initial: Duration::from_millis(1_000),
            settle_after_change: Duration::from_millis(750),
            settle_step: Duration::from_millis(250),
            settle_max: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    height: u64,
    items: u64,
}

#[derive(Debug, Default, Clone)]
pub struct DynamicContentExplorer {
    tuning: ExplorerTuning,
}

impl DynamicContentExplorer {
    pub fn new(tuning: ExplorerTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &ExplorerTuning {
        &self.tuning
    }

    /// Surface as much content as the budget allows and report why it stopped.
    pub async fn explore(&self, page: &dyn RenderedPage, budget: &ExplorationBudget) -> ExplorationReport {
        let t = &self.tuning;
        let start = Instant::now();

        let mut baseline = match self.measure(page).await {
            Ok(s) => s,
            Err(e) => {
                warn!(url = page.url(), error = %e, "initial page measurement failed");
                return report(Snapshot { height: 0, items: 0 }, 0, 0, start, failure_reason(&e));
            }
        };
        let mut current = baseline;
        let mut last_significant = start;
        let mut iterations = 0u32;
        let mut pages = 0u32;
        let mut no_change = 0u32;
        let mut large_streak = 0u32;
        let mut settle = t.settle_initial;

        let reason = loop {
            if iterations >= budget.max_scroll_iterations {
                break StopReason::MaxIterations;
            }
            if no_change >= t.no_change_limit {
                break StopReason::NoChange;
            }
            if start.elapsed() >= budget.max_wall_clock {
                break StopReason::WallClock;
            }
            if last_significant.elapsed() > t.stall_window {
                break StopReason::Stalled;
            }

            iterations += 1;
            self.scroll(page).await;

            if iterations % t.pagination_every == 0
                && pages < budget.max_pagination_pages
                && self.paginate(page).await
            {
                pages += 1;
            }
            if iterations % t.load_more_every == 0 {
                self.load_more(page).await;
            }

            current = match self.measure(page).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(url = page.url(), iteration = iterations, error = %e, "page measurement failed");
                    break failure_reason(&e);
                }
            };

            let height_delta = current.height.saturating_sub(baseline.height);
            let item_delta = current.items.saturating_sub(baseline.items);
            debug!(
                iteration = iterations,
                height = current.height,
                items = current.items,
                height_delta,
                item_delta,
                "exploration step"
            );

            if current.height > budget.max_dom_height {
                break StopReason::DomHeight;
            }
            if current.items > budget.max_content_items {
                break StopReason::ContentItems;
            }
            if item_delta > t.runaway_item_delta {
                break StopReason::RunawayGrowth;
            }
            if item_delta > t.large_change_delta {
                large_streak += 1;
                if large_streak >= t.large_change_streak {
                    break StopReason::SustainedGrowth;
                }
            } else {
                large_streak = 0;
            }

            if height_delta > t.significant_height_delta || item_delta > t.significant_item_delta {
                baseline = current;
                no_change = 0;
                last_significant = Instant::now();
                settle = t.settle_after_change;
            } else {
                no_change += 1;
                settle = (settle + t.settle_step).min(t.settle_max);
            }

            page.settle(settle).await;
        };

        let out = report(current, iterations, pages, start, reason);
        info!(
            url = page.url(),
            stop_reason = %out.stop_reason,
            iterations = out.iterations,
            pages = out.pages,
            final_height = out.final_height,
            final_items = out.final_items,
            elapsed_ms = out.elapsed.as_millis() as u64,
            "dynamic content exploration finished"
        );
        out
    }

    async fn scroll(&self, page: &dyn RenderedPage) {
        let t = &self.tuning;
        if let Err(e) = page.scroll_to_bottom().await {
            debug!(error = %e, "scroll to bottom failed");
        }
        page.settle(t.scroll_settle).await;
        if let Err(e) = page.scroll_by(t.nudge_delta).await {
            debug!(error = %e, "scroll nudge failed");
        }
        if let Err(e) = page.scroll_to_bottom().await {
            debug!(error = %e, "scroll to bottom failed");
        }
        page.settle(t.nudge_settle).await;
    }

    async fn paginate(&self, page: &dyn RenderedPage) -> bool {
        for probe in PAGINATION_PROBES {
            match page.click(probe, ProbeMode::FirstMatch).await {
                Ok(true) => {
                    info!(url = page.url(), selector = probe.selector, "clicked pagination control");
                    page.settle(self.tuning.click_settle).await;
                    return true;
                }
                Ok(false) => {}
                Err(e) => debug!(selector = probe.selector, error = %e, "pagination probe failed"),
            }
        }
        false
    }

    async fn load_more(&self, page: &dyn RenderedPage) -> bool {
        for probe in LOAD_MORE_PROBES {
            match page.click(probe, ProbeMode::AnyMatch).await {
                Ok(true) => {
                    info!(url = page.url(), selector = probe.selector, "clicked load-more control");
                    page.settle(self.tuning.click_settle).await;
                    return true;
                }
                Ok(false) => {}
                Err(e) => debug!(selector = probe.selector, error = %e, "load-more probe failed"),
            }
        }
        false
    }

    async fn measure(&self, page: &dyn RenderedPage) -> Result<Snapshot, RenderError> {
        let height = page.dom_height().await?;
        let items = count_items(page).await?;
        Ok(Snapshot { height, items })
    }
}

async fn count_items(page: &dyn RenderedPage) -> Result<u64, RenderError> {
    let mut best = 0u64;
    for selector in ITEM_SELECTORS {
        match page.count_matches(selector).await {
            Ok(n) => best = best.max(n),
            Err(e @ (RenderError::PageClosed | RenderError::SessionClosed(_))) => return Err(e),
            Err(e) => debug!(selector, error = %e, "item probe failed"),
        }
    }
    if best < ITEM_FALLBACK_FLOOR {
        best = page.count_matches("div").await?;
    }
    Ok(best)
}

fn failure_reason(e: &RenderError) -> StopReason {
    match e {
        RenderError::PageClosed | RenderError::SessionClosed(_) => StopReason::PageClosed,
        _ => StopReason::MeasurementFailed,
    }
}

fn report(last: Snapshot, iterations: u32, pages: u32, start: Instant, stop_reason: StopReason) -> ExplorationReport {
    ExplorationReport {
        final_height: last.height,
        final_items: last.items,
        iterations,
        pages,
        elapsed: start.elapsed(),
        stop_reason,
    }
}
