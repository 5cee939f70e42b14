//! In-memory job registry.
//!
//! One lock-protected map holds each job together with its result and the
//! handle of the task executing it, so a reader sees either the whole entry or
//! nothing. Insertion order is kept; the newest job is last.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use falcon_core::{FalconError, Job, JobStatus, ScrapeResult};
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Execution task of one job and the flag used to cancel it.
#[derive(Debug)]
pub struct JobHandle {
    pub task: JoinHandle<()>,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct JobEntry {
    job: Job,
    result: Option<ScrapeResult>,
    handle: Option<JobHandle>,
}

/// What the reaper removed for one expired job.
#[derive(Debug)]
pub struct ExpiredJob {
    pub job: Job,
    pub handle: Option<JobHandle>,
}

#[derive(Debug, Default)]
pub struct JobStore {
    entries: RwLock<IndexMap<Uuid, JobEntry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<Uuid, JobEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<Uuid, JobEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: Job) {
        self.write().insert(
            job.job_id,
            JobEntry {
                job,
                result: None,
                handle: None,
            },
        );
    }

    pub fn attach_handle(&self, job_id: Uuid, handle: JobHandle) {
        if let Some(entry) = self.write().get_mut(&job_id) {
            entry.handle = Some(handle);
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.read().get(&job_id).map(|e| e.job.clone())
    }

    pub fn result(&self, job_id: Uuid) -> Option<ScrapeResult> {
        self.read().get(&job_id).and_then(|e| e.result.clone())
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.read().contains_key(&job_id)
    }

    pub fn list(&self) -> Vec<Job> {
        self.read().values().map(|e| e.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Jobs that have not reached a terminal status.
    pub fn active_count(&self) -> usize {
        self.read().values().filter(|e| !e.job.status.is_terminal()).count()
    }

    pub fn is_terminal(&self, job_id: Uuid) -> bool {
        self.read().get(&job_id).map_or(true, |e| e.job.status.is_terminal())
    }

    /// Pending -> Processing.
    pub fn mark_processing(&self, job_id: Uuid) -> Result<(), FalconError> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(&job_id)
            .ok_or_else(|| FalconError::not_found(format!("job {job_id}")))?;
        if !entry.job.status.can_transition_to(JobStatus::Processing) {
            return Err(FalconError::AlreadyFinished(job_id.to_string()));
        }
        entry.job.status = JobStatus::Processing;
        Ok(())
    }

    /// Write the terminal status and the result in one update.
    ///
    /// Fails with `AlreadyFinished` when the job is already terminal, leaving
    /// it untouched.
    pub fn finish(&self, job_id: Uuid, result: ScrapeResult) -> Result<Job, FalconError> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(&job_id)
            .ok_or_else(|| FalconError::not_found(format!("job {job_id}")))?;
        if !entry.job.status.can_transition_to(result.status) {
            return Err(FalconError::AlreadyFinished(job_id.to_string()));
        }
        entry.job.status = result.status;
        entry.job.completed_at = Some(Utc::now());
        entry.job.error_message = result.error_message.clone();
        entry.result = Some(result);
        Ok(entry.job.clone())
    }

    pub fn cancel_token(&self, job_id: Uuid) -> Option<CancellationToken> {
        self.read()
            .get(&job_id)
            .and_then(|e| e.handle.as_ref().map(|h| h.cancel.clone()))
    }

    /// Remove every job created before `cutoff` in a single write.
    pub fn take_expired(&self, cutoff: DateTime<Utc>) -> Vec<ExpiredJob> {
        let mut entries = self.write();
        let mut expired = Vec::new();
        entries.retain(|_, entry| {
            if entry.job.created_at < cutoff {
                expired.push(ExpiredJob {
                    job: entry.job.clone(),
                    handle: entry.handle.take(),
                });
                false
            } else {
                true
            }
        });
        expired
    }
}
