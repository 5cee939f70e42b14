//! Job, result, and progress data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One extracted record: field name -> value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle status of a job. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects
    /// Pending -> Processing -> {Completed | Failed}.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Pending | Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

// ── Request / spec ───────────────────────────────────────────────────

/// What to extract: a data-type label plus optional free-text instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSpec {
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Submission payload for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    pub data_type: String,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

impl ScrapeRequest {
    pub fn spec(&self) -> ExtractionSpec {
        ExtractionSpec {
            data_type: self.data_type.trim().to_string(),
            instructions: self
                .custom_instructions
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

// ── Job ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub url: String,
    pub spec: ExtractionSpec,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(url: String, spec: ExtractionSpec) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            url,
            spec,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

// ── Result ───────────────────────────────────────────────────────────

/// Outcome of a finished job. Produced exactly once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub row_count: usize,
    /// Seconds from execution start to the terminal transition.
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ScrapeResult {
    pub fn completed(job_id: Uuid, data: Vec<Row>, columns: Vec<String>, processing_time: f64) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            row_count: data.len(),
            data: Some(data),
            columns: Some(columns),
            processing_time,
            error_message: None,
        }
    }

    pub fn failed(job_id: Uuid, error: String, processing_time: f64) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            data: None,
            columns: None,
            row_count: 0,
            processing_time,
            error_message: Some(error),
        }
    }
}

// ── Progress ─────────────────────────────────────────────────────────

/// Named phase of job execution, used as the progress stage tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Loading,
    AiProcessing,
    DataProcessing,
    Exporting,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Loading => "loading",
            Self::AiProcessing => "ai_processing",
            Self::DataProcessing => "data_processing",
            Self::Exporting => "exporting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire schema of every message pushed to a job's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub job_id: Uuid,
    pub message: String,
    pub stage: Stage,
    /// Heartbeat age in seconds observed before this update.
    pub progress_age: f64,
    pub is_stuck: bool,
    pub timestamp: DateTime<Utc>,
}
