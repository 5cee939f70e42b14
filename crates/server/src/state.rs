use std::sync::Arc;

use falcon_acquire::Renderer;

use crate::jobs::JobController;

pub struct AppState {
    pub controller: JobController,
    /// Kept so the browser session can be shut down with the server.
    pub renderer: Arc<dyn Renderer>,
}
