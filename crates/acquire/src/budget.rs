//! Exploration budgets and their per-domain resolution.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use falcon_core::config::ExplorationConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BudgetError;

/// Resource ceilings bounding one exploration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorationBudget {
    pub max_scroll_iterations: u32,
    pub max_pagination_pages: u32,
    pub max_wall_clock: Duration,
    pub max_dom_height: u64,
    pub max_content_items: u64,
}

impl Default for ExplorationBudget {
    fn default() -> Self {
        Self::from(&ExplorationConfig::default())
    }
}

impl From<&ExplorationConfig> for ExplorationBudget {
    fn from(c: &ExplorationConfig) -> Self {
        Self {
            max_scroll_iterations: c.max_scroll_attempts,
            max_pagination_pages: c.max_pagination_pages,
            max_wall_clock: Duration::from_secs(c.max_dynamic_time_secs),
            max_dom_height: c.max_page_height,
            max_content_items: c.max_content_items,
        }
    }
}

/// A per-domain override. Missing fields keep the default budget's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOverride {
    #[serde(default, alias = "max_scrolls")]
    pub max_scroll_iterations: Option<u32>,
    #[serde(default, alias = "max_pages")]
    pub max_pagination_pages: Option<u32>,
    #[serde(default, alias = "max_time")]
    pub max_wall_clock_seconds: Option<u64>,
    #[serde(default, alias = "max_height")]
    pub max_dom_height: Option<u64>,
    #[serde(default, alias = "max_items")]
    pub max_content_items: Option<u64>,
}

impl BudgetOverride {
    const fn full(scrolls: u32, items: u64, time: u64, height: u64, pages: u32) -> Self {
        Self {
            max_scroll_iterations: Some(scrolls),
            max_pagination_pages: Some(pages),
            max_wall_clock_seconds: Some(time),
            max_dom_height: Some(height),
            max_content_items: Some(items),
        }
    }

    pub fn apply(&self, base: ExplorationBudget) -> ExplorationBudget {
        ExplorationBudget {
            max_scroll_iterations: self.max_scroll_iterations.unwrap_or(base.max_scroll_iterations),
            max_pagination_pages: self.max_pagination_pages.unwrap_or(base.max_pagination_pages),
            max_wall_clock: self
                .max_wall_clock_seconds
                .map(Duration::from_secs)
                .unwrap_or(base.max_wall_clock),
            max_dom_height: self.max_dom_height.unwrap_or(base.max_dom_height),
            max_content_items: self.max_content_items.unwrap_or(base.max_content_items),
        }
    }
}

/// Sites known to expand without bound, with tighter ceilings.
const BUILTIN_OVERRIDES: &[(&str, BudgetOverride)] = &[
    ("vcsheet.com", BudgetOverride::full(3, 5_000, 30, 100_000, 2)),
    ("crunchbase.com", BudgetOverride::full(5, 10_000, 45, 200_000, 3)),
    ("linkedin.com", BudgetOverride::full(4, 3_000, 40, 150_000, 2)),
    ("indeed.com", BudgetOverride::full(6, 8_000, 50, 300_000, 4)),
    ("glassdoor.com", BudgetOverride::full(4, 4_000, 35, 180_000, 2)),
];

/// Default budget plus per-domain overrides.
#[derive(Debug, Clone)]
pub struct BudgetTable {
    default: ExplorationBudget,
    overrides: HashMap<String, BudgetOverride>,
}

impl BudgetTable {
    /// Table with the given default and no overrides.
    pub fn new(default: ExplorationBudget) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Table with the given default and the built-in site overrides.
    pub fn with_builtin(default: ExplorationBudget) -> Self {
        let mut table = Self::new(default);
        for (domain, o) in BUILTIN_OVERRIDES {
            table.insert(domain, *o);
        }
        table
    }

    /// Build from config: env defaults, built-in overrides, then the optional
    /// overrides file on top.
    pub fn from_config(config: &ExplorationConfig) -> Result<Self, BudgetError> {
        let mut table = Self::with_builtin(ExplorationBudget::from(config));
        if let Some(path) = &config.overrides_file {
            let n = table.load_overrides_file(path)?;
            info!(path = %path.display(), overrides = n, "loaded exploration overrides");
        }
        Ok(table)
    }

    /// Merge a JSON object `{ "domain": { ...partial budget... } }` into the table.
    pub fn load_overrides_file(&mut self, path: &Path) -> Result<usize, BudgetError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: HashMap<String, BudgetOverride> = serde_json::from_str(&raw)?;
        let n = parsed.len();
        for (domain, o) in parsed {
            self.insert(&domain, o);
        }
        Ok(n)
    }

    pub fn insert(&mut self, domain: &str, o: BudgetOverride) {
        self.overrides.insert(normalize_host(domain), o);
    }

    pub fn default_budget(&self) -> ExplorationBudget {
        self.default
    }

    /// Resolve the budget for a target URL. The longest rule domain equal to
    /// the host or a dot-suffix of it wins; no match yields the default.
    pub fn resolve(&self, url: &str) -> ExplorationBudget {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(normalize_host))
        else {
            return self.default;
        };

        let best = self
            .overrides
            .iter()
            .filter(|(domain, _)| host_matches(&host, domain))
            .max_by_key(|(domain, _)| domain.len());

        match best {
            Some((domain, o)) => {
                debug!(host = %host, rule = %domain, "applying site-specific exploration limits");
                o.apply(self.default)
            }
            None => self.default,
        }
    }
}

fn normalize_host(host: &str) -> String {
    let lower = host.trim().to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
