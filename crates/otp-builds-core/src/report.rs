//! Run report: one entry per version, in processing order.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError};

/// Terminal state of one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Archive and checksum uploaded.
    Published { release_id: u64, asset: String },
    /// An asset with the computed name already existed.
    Skipped { release_id: u64, asset: String },
    Failed { kind: ErrorKind, detail: String },
    /// Not started because the run was cancelled.
    Cancelled,
}

impl Outcome {
    pub fn failed(err: &PipelineError) -> Self {
        Outcome::Failed {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReport {
    pub tag: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Result of a complete batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub repository: String,
    pub platform: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub versions: Vec<VersionReport>,
}

impl RunReport {
    pub fn start(repository: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repository: repository.into(),
            platform: platform.into(),
            started_at: Utc::now(),
            finished_at: None,
            versions: Vec::new(),
        }
    }

    pub fn record(&mut self, tag: &str, outcome: Outcome, duration_ms: u64) {
        self.versions.push(VersionReport {
            tag: tag.to_string(),
            outcome,
            duration_ms,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn outcome_of(&self, tag: &str) -> Option<&Outcome> {
        self.versions
            .iter()
            .find(|v| v.tag == tag)
            .map(|v| &v.outcome)
    }

    pub fn published_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Published { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    pub fn cancelled_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.versions.iter().filter(|v| pred(&v.outcome)).count()
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}
