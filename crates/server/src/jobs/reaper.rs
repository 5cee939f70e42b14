//! Periodic removal of expired jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::JobStore;
use crate::hub::NotificationHub;
use crate::processor::Processor;

pub struct ExpiryReaper {
    store: Arc<JobStore>,
    hub: Arc<NotificationHub>,
    processor: Arc<dyn Processor>,
    expiry: Duration,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        store: Arc<JobStore>,
        hub: Arc<NotificationHub>,
        processor: Arc<dyn Processor>,
        expiry: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            processor,
            expiry,
            interval,
        }
    }

    /// Remove every job created before `now - expiry`. Returns how many went.
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(self.expiry).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired = self.store.take_expired(cutoff);
        let removed = expired.len();
        for entry in expired {
            let job_id = entry.job.job_id;
            if let Some(handle) = entry.handle {
                if !handle.task.is_finished() {
                    debug!(%job_id, "aborting execution of expired job");
                    handle.cancel.cancel();
                    handle.task.abort();
                    // Wait until the task can no longer notify before clearing the hub.
                    if let Err(e) = handle.task.await {
                        if e.is_panic() {
                            warn!(%job_id, "execution of expired job panicked");
                        }
                    }
                }
            }
            self.hub.remove_job(job_id);
            match self.processor.remove_artifacts(job_id).await {
                Ok(0) => {}
                Ok(files) => debug!(%job_id, files, "removed export artifacts"),
                Err(e) => warn!(%job_id, error = %e, "failed to remove export artifacts"),
            }
        }

        if removed == 0 {
            debug!(%cutoff, "reaper run: nothing expired");
        } else {
            info!(removed, %cutoff, remaining = self.store.len(), "reaped expired jobs");
        }
        removed
    }

    /// Run forever on a fixed period.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_secs = self.interval.as_secs(),
                expiry_secs = self.expiry.as_secs(),
                "expiry reaper started"
            );
            loop {
                ticker.tick().await;
                self.run_once(Utc::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use falcon_core::{ExtractionSpec, Job, Row, Stage};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::jobs::store::JobHandle;
    use crate::processor::{build_table, ExportFormat, ProcessError, Table};

    #[derive(Default)]
    struct CountingProcessor {
        removals: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Processor for CountingProcessor {
        async fn process(&self, rows: Vec<Row>) -> Result<Table, ProcessError> {
            Ok(build_table(rows))
        }

        async fn export(&self, _job_id: Uuid, _table: &Table) -> Result<Vec<PathBuf>, ProcessError> {
            Ok(vec![])
        }

        fn artifact_path(&self, job_id: Uuid, format: ExportFormat) -> PathBuf {
            PathBuf::from(format!("{job_id}.{}", format.extension()))
        }

        async fn remove_artifacts(&self, _job_id: Uuid) -> Result<usize, ProcessError> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProcessError::Task("disk unavailable".into()));
            }
            Ok(2)
        }
    }

    fn job_aged(now: DateTime<Utc>, hours: i64) -> Job {
        let mut job = Job::new(
            "https://example.org".into(),
            ExtractionSpec {
                data_type: "products".into(),
                instructions: None,
            },
        );
        job.created_at = now - chrono::Duration::hours(hours);
        job
    }

    fn reaper(store: Arc<JobStore>, hub: Arc<NotificationHub>, processor: Arc<CountingProcessor>) -> ExpiryReaper {
        ExpiryReaper::new(
            store,
            hub,
            processor,
            Duration::from_secs(2 * 3600),
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_removes_only_jobs_past_cutoff() {
        let now = Utc::now();
        let store = Arc::new(JobStore::new());
        let hub = Arc::new(NotificationHub::new(Duration::from_secs(60)));
        let processor = Arc::new(CountingProcessor::default());

        let old = job_aged(now, 3);
        let fresh = job_aged(now, 1);
        store.insert(old.clone());
        store.insert(fresh.clone());
        let _sub = hub.subscribe(old.job_id);
        hub.notify(old.job_id, "loading", Stage::Loading);
        hub.notify(fresh.job_id, "loading", Stage::Loading);

        let removed = reaper(store.clone(), hub.clone(), processor.clone()).run_once(now).await;
        assert_eq!(removed, 1);
        assert!(store.get(old.job_id).is_none());
        assert!(store.result(old.job_id).is_none());
        assert!(hub.progress(old.job_id).is_none());
        assert_eq!(hub.subscriber_count(old.job_id), 0);
        assert!(store.get(fresh.job_id).is_some());
        assert!(hub.progress(fresh.job_id).is_some());
        assert_eq!(processor.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_run_and_artifact_failure_do_not_stop_reaper() {
        let now = Utc::now();
        let store = Arc::new(JobStore::new());
        let hub = Arc::new(NotificationHub::new(Duration::from_secs(60)));
        let processor = Arc::new(CountingProcessor {
            removals: AtomicUsize::new(0),
            fail: true,
        });
        let r = reaper(store.clone(), hub, processor.clone());

        assert_eq!(r.run_once(now).await, 0);
        store.insert(job_aged(now, 5));
        assert_eq!(r.run_once(now).await, 1);
        store.insert(job_aged(now, 4));
        assert_eq!(r.run_once(now).await, 1);
        assert_eq!(processor.removals.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_running_task_of_expired_job_is_aborted() {
        let now = Utc::now();
        let store = Arc::new(JobStore::new());
        let hub = Arc::new(NotificationHub::new(Duration::from_secs(60)));
        let old = job_aged(now, 3);
        store.insert(old.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(std::future::pending::<()>());
        store.attach_handle(old.job_id, JobHandle { task, cancel: cancel.clone() });

        reaper(store, hub, Arc::new(CountingProcessor::default()))
            .run_once(now)
            .await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_task_cannot_repopulate_hub_after_reaping() {
        let now = Utc::now();
        let store = Arc::new(JobStore::new());
        let hub = Arc::new(NotificationHub::new(Duration::from_secs(60)));
        let old = job_aged(now, 3);
        let job_id = old.job_id;
        store.insert(old);

        // Blocks between notifications, so an abort lands mid-step.
        let task = tokio::spawn({
            let hub = hub.clone();
            async move {
                loop {
                    std::thread::sleep(Duration::from_millis(20));
                    hub.notify(job_id, "working", Stage::Loading);
                    tokio::task::yield_now().await;
                }
            }
        });
        store.attach_handle(job_id, JobHandle { task, cancel: CancellationToken::new() });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let removed = reaper(store.clone(), hub.clone(), Arc::new(CountingProcessor::default()))
            .run_once(now)
            .await;
        assert_eq!(removed, 1);
        assert!(hub.progress(job_id).is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(hub.progress(job_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_runs_on_interval() {
        let store = Arc::new(JobStore::new());
        let hub = Arc::new(NotificationHub::new(Duration::from_secs(60)));
        let processor = Arc::new(CountingProcessor::default());
        store.insert(job_aged(Utc::now(), 10));

        let handle = reaper(store.clone(), hub, processor).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.is_empty());

        store.insert(job_aged(Utc::now(), 10));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(store.is_empty());
        handle.abort();
    }
}
