pub mod acquirer;
pub mod budget;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod error;
pub mod explorer;
pub mod fetch;
pub mod markup;
pub mod renderer;

pub use acquirer::{ContentAcquirer, ContentSource, RetryPolicy};
pub use budget::{BudgetOverride, BudgetTable, ExplorationBudget};
pub use error::{AcquireError, BudgetError, RenderError};
pub use explorer::{DynamicContentExplorer, ExplorerTuning};
pub use fetch::{HttpFetcher, PageFetcher};
pub use renderer::{ClickProbe, DisabledRenderer, ProbeMode, RenderedPage, Renderer};
#[cfg(feature = "chromium")]
pub use chromium::ChromiumRenderer;
