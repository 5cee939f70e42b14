//! Job orchestration: submission, stage sequencing, deadline and cancellation.
//!
//! Each job runs in its own task. Stages return `Result<_, StageError>` and
//! `execute` is the only place that turns a failure into a terminal job state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use falcon_acquire::{AcquireError, ContentSource};
use falcon_core::config::JobsConfig;
use falcon_core::{
    ExtractionSpec, FalconError, FetchMethod, Job, PageContent, ScrapeRequest, ScrapeResult, Stage,
};
use falcon_llm::{ExtractError, Extractor};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::{JobHandle, JobStore};
use crate::hub::NotificationHub;
use crate::processor::{ProcessError, Processor, Table};

pub const SLOW_SITE_MESSAGE: &str = "Site is slow to respond, still loading...";

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Hard limit on one whole execution.
    pub deadline: Duration,
    /// Loading time after which a non-fatal warning goes out.
    pub slow_site_threshold: Duration,
}

impl From<&JobsConfig> for ControllerSettings {
    fn from(config: &JobsConfig) -> Self {
        Self {
            deadline: config.deadline(),
            slow_site_threshold: config.slow_site_threshold(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(300),
            slow_site_threshold: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Error)]
enum StageError {
    /// The job went terminal elsewhere; stop without writing.
    #[error("cancelled by user")]
    Cancelled,

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl From<StageError> for FalconError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::Cancelled => FalconError::Cancelled,
            StageError::Acquire(e) if e.is_render_session_failure() => FalconError::RenderSession(e.to_string()),
            StageError::Acquire(e) => FalconError::Acquisition(e.to_string()),
            StageError::Extract(e) => FalconError::Extraction(e.to_string()),
            StageError::Process(e) => FalconError::Processing(e.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct JobController {
    store: Arc<JobStore>,
    hub: Arc<NotificationHub>,
    source: Arc<dyn ContentSource>,
    extractor: Arc<dyn Extractor>,
    processor: Arc<dyn Processor>,
    settings: ControllerSettings,
}

impl JobController {
    pub fn new(
        store: Arc<JobStore>,
        hub: Arc<NotificationHub>,
        source: Arc<dyn ContentSource>,
        extractor: Arc<dyn Extractor>,
        processor: Arc<dyn Processor>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store,
            hub,
            source,
            extractor,
            processor,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub fn extractor_configured(&self) -> bool {
        self.extractor.is_configured()
    }

    /// Create a pending job and start executing it in the background.
    pub fn submit(&self, request: ScrapeRequest) -> Result<Job, FalconError> {
        let url = validate_url(&request.url)?;
        let spec = request.spec();
        if spec.data_type.is_empty() {
            return Err(FalconError::InvalidRequest("data_type must not be empty".into()));
        }

        let job = Job::new(url, spec);
        let job_id = job.job_id;
        self.store.insert(job.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            self.clone()
                .execute(job_id, job.url.clone(), job.spec.clone(), cancel.clone()),
        );
        self.store.attach_handle(job_id, JobHandle { task, cancel });

        info!(%job_id, url = %job.url, data_type = %job.spec.data_type, "job submitted");
        Ok(job)
    }

    pub fn status(&self, job_id: Uuid) -> Result<Job, FalconError> {
        self.store
            .get(job_id)
            .ok_or_else(|| FalconError::not_found(format!("job {job_id}")))
    }

    pub fn result(&self, job_id: Uuid) -> Result<ScrapeResult, FalconError> {
        if !self.store.contains(job_id) {
            return Err(FalconError::not_found(format!("job {job_id}")));
        }
        self.store
            .result(job_id)
            .ok_or_else(|| FalconError::not_found(format!("result for job {job_id}")))
    }

    pub fn list(&self) -> Vec<Job> {
        self.store.list()
    }

    /// Force a running job to Failed. The execution task notices at its next
    /// stage boundary and exits without writing.
    pub fn cancel(&self, job_id: Uuid) -> Result<Job, FalconError> {
        let job = self.status(job_id)?;
        let age = (Utc::now() - job.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        let job = self
            .store
            .finish(job_id, ScrapeResult::failed(job_id, FalconError::Cancelled.to_string(), age))?;
        if let Some(token) = self.store.cancel_token(job_id) {
            token.cancel();
        }
        info!(%job_id, "job cancelled");
        self.hub.notify(job_id, "Cancelled by user", Stage::Failed);
        Ok(job)
    }

    async fn execute(self, job_id: Uuid, url: String, spec: ExtractionSpec, cancel: CancellationToken) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.settings.deadline, self.run_stages(job_id, &url, &spec, &cancel)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let err = match outcome {
            Ok(Ok(table)) => return self.complete(job_id, table, elapsed),
            Ok(Err(StageError::Cancelled)) => {
                info!(%job_id, "execution stopped after cancellation");
                return;
            }
            Ok(Err(e)) => FalconError::from(e),
            Err(_) => FalconError::Timeout(self.settings.deadline.as_secs()),
        };
        self.fail(job_id, err, elapsed);
    }

    async fn run_stages(
        &self,
        job_id: Uuid,
        url: &str,
        spec: &ExtractionSpec,
        cancel: &CancellationToken,
    ) -> Result<Table, StageError> {
        self.checkpoint(job_id, cancel)?;
        self.store.mark_processing(job_id).map_err(|_| StageError::Cancelled)?;
        self.hub.notify(job_id, "Processing started", Stage::Initializing);

        self.checkpoint(job_id, cancel)?;
        self.hub.notify(job_id, &format!("Loading page content from {url}"), Stage::Loading);
        let content = self.load(job_id, url).await?;
        self.hub.notify(
            job_id,
            &format!("Loaded {} words of page content ({})", content.word_count(), method_label(&content)),
            Stage::Loading,
        );
        if content.method == FetchMethod::Rendered {
            if let Some(report) = &content.exploration {
                debug!(
                    %job_id,
                    stop_reason = %report.stop_reason,
                    iterations = report.iterations,
                    pages = report.pages,
                    "exploration finished"
                );
            }
            self.hub.notify(job_id, "Dynamic content and pagination processed", Stage::Loading);
        }

        self.checkpoint(job_id, cancel)?;
        self.hub.notify(job_id, "Analyzing content with AI", Stage::AiProcessing);
        let rows = self.extractor.extract(&content, spec).await?;
        self.hub
            .notify(job_id, &format!("Extracted {} items", rows.len()), Stage::AiProcessing);

        self.checkpoint(job_id, cancel)?;
        self.hub
            .notify(job_id, "Processing and cleaning extracted data", Stage::DataProcessing);
        let table = self.processor.process(rows).await?;

        self.checkpoint(job_id, cancel)?;
        self.hub
            .notify(job_id, "Generating JSON and CSV export files", Stage::Exporting);
        self.processor.export(job_id, &table).await?;

        self.checkpoint(job_id, cancel)?;
        Ok(table)
    }

    /// Acquire content, warning once if the site is slow.
    async fn load(&self, job_id: Uuid, url: &str) -> Result<PageContent, AcquireError> {
        let mut acquire = self.source.acquire(url);
        tokio::select! {
            res = &mut acquire => return res,
            _ = tokio::time::sleep(self.settings.slow_site_threshold) => {}
        }
        warn!(%job_id, url, threshold_secs = self.settings.slow_site_threshold.as_secs(), "slow site");
        self.hub.notify(job_id, SLOW_SITE_MESSAGE, Stage::Loading);
        acquire.await
    }

    fn checkpoint(&self, job_id: Uuid, cancel: &CancellationToken) -> Result<(), StageError> {
        if cancel.is_cancelled() || self.store.is_terminal(job_id) {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    fn complete(&self, job_id: Uuid, table: Table, elapsed: f64) {
        let rows = table.rows.len();
        let result = ScrapeResult::completed(job_id, table.rows, table.columns, elapsed);
        match self.store.finish(job_id, result) {
            Ok(_) => {
                info!(%job_id, rows, elapsed_secs = elapsed, "job completed");
                self.hub.notify(
                    job_id,
                    &format!("Completed! Extracted {rows} rows in {elapsed:.1}s"),
                    Stage::Completed,
                );
            }
            Err(e) => debug!(%job_id, error = %e, "discarding result of finished job"),
        }
    }

    fn fail(&self, job_id: Uuid, err: FalconError, elapsed: f64) {
        let message = err.to_string();
        error!(%job_id, kind = err.kind(), error = %message, "job failed");
        match self
            .store
            .finish(job_id, ScrapeResult::failed(job_id, message.clone(), elapsed))
        {
            Ok(_) => {
                self.hub.notify(job_id, &format!("Failed: {message}"), Stage::Failed);
            }
            Err(e) => debug!(%job_id, error = %e, "job already finished, failure not recorded"),
        }
    }
}

fn method_label(content: &PageContent) -> &'static str {
    match content.method {
        FetchMethod::Lightweight => "lightweight",
        FetchMethod::Rendered => "rendered",
    }
}

/// Absolute http(s) URL with a host.
fn validate_url(raw: &str) -> Result<String, FalconError> {
    let raw = raw.trim();
    let parsed = url::Url::parse(raw).map_err(|e| FalconError::InvalidRequest(format!("invalid URL '{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(FalconError::InvalidRequest(format!(
            "URL must be an absolute http(s) address: '{raw}'"
        )));
    }
    Ok(raw.to_string())
}
