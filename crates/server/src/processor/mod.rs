//! Cleaning of extracted rows and export of downloadable artifacts.

mod clean;
mod export;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use falcon_core::{FalconError, Row};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub use clean::{build_table, ColumnStats, Summary, Table};

const ARTIFACT_PREFIX: &str = "falcon_parse_";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to write export {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Download format of an export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Json, ExportFormat::Csv];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = FalconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(FalconError::InvalidFormat(s.to_string())),
        }
    }
}

/// Turns extracted rows into a table and the table into artifacts.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, rows: Vec<Row>) -> Result<Table, ProcessError>;

    /// Write every artifact for `job_id`. An empty table writes nothing.
    async fn export(&self, job_id: Uuid, table: &Table) -> Result<Vec<PathBuf>, ProcessError>;

    fn artifact_path(&self, job_id: Uuid, format: ExportFormat) -> PathBuf;

    /// Delete the artifacts of `job_id`, returning how many existed.
    async fn remove_artifacts(&self, job_id: Uuid) -> Result<usize, ProcessError>;
}

/// Writes `falcon_parse_<job_id>.{json,csv}` into a scratch directory.
pub struct DataProcessor {
    export_dir: PathBuf,
}

impl DataProcessor {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

#[async_trait]
impl Processor for DataProcessor {
    async fn process(&self, rows: Vec<Row>) -> Result<Table, ProcessError> {
        let raw = rows.len();
        let table = tokio::task::spawn_blocking(move || build_table(rows))
            .await
            .map_err(|e| ProcessError::Task(e.to_string()))?;
        info!(raw, cleaned = table.rows.len(), columns = table.columns.len(), "rows processed");
        Ok(table)
    }

    async fn export(&self, job_id: Uuid, table: &Table) -> Result<Vec<PathBuf>, ProcessError> {
        if table.rows.is_empty() {
            warn!(%job_id, "no data to export");
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|source| ProcessError::Write {
                path: self.export_dir.clone(),
                source,
            })?;

        let mut written = Vec::with_capacity(ExportFormat::ALL.len());
        for format in ExportFormat::ALL {
            let body = match format {
                ExportFormat::Json => export::render_json(job_id, table)?,
                ExportFormat::Csv => export::render_csv(table),
            };
            let path = self.artifact_path(job_id, format);
            tokio::fs::write(&path, body)
                .await
                .map_err(|source| ProcessError::Write {
                    path: path.clone(),
                    source,
                })?;
            written.push(path);
        }
        info!(%job_id, files = written.len(), dir = %self.export_dir.display(), "exports written");
        Ok(written)
    }

    fn artifact_path(&self, job_id: Uuid, format: ExportFormat) -> PathBuf {
        self.export_dir
            .join(format!("{ARTIFACT_PREFIX}{job_id}.{}", format.extension()))
    }

    async fn remove_artifacts(&self, job_id: Uuid) -> Result<usize, ProcessError> {
        let mut removed = 0;
        for format in ExportFormat::ALL {
            let path = self.artifact_path(job_id, format);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ProcessError::Write { path, source }),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn rows() -> Vec<Row> {
        vec![json!({"Name": "Widget", "Price": "9.99"})]
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        let err = "xml".parse::<ExportFormat>().unwrap_err();
        assert!(matches!(err, FalconError::InvalidFormat(ref f) if f == "xml"));
    }

    #[tokio::test]
    async fn test_export_writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let processor = DataProcessor::new(dir.path());
        let job_id = Uuid::new_v4();

        let table = processor.process(rows()).await.unwrap();
        let written = processor.export(job_id, &table).await.unwrap();
        assert_eq!(written.len(), 2);

        let json_path = processor.artifact_path(job_id, ExportFormat::Json);
        assert_eq!(
            json_path.file_name().unwrap().to_str().unwrap(),
            format!("falcon_parse_{job_id}.json")
        );
        let csv = std::fs::read_to_string(processor.artifact_path(job_id, ExportFormat::Csv)).unwrap();
        assert_eq!(csv, "name,price\nWidget,9.99\n");

        assert_eq!(processor.remove_artifacts(job_id).await.unwrap(), 2);
        assert!(!json_path.exists());
        assert_eq!(processor.remove_artifacts(job_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_table_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let processor = DataProcessor::new(dir.path());
        let job_id = Uuid::new_v4();
        let table = processor.process(vec![]).await.unwrap();
        assert!(processor.export(job_id, &table).await.unwrap().is_empty());
        assert!(!processor.artifact_path(job_id, ExportFormat::Csv).exists());
    }
}
