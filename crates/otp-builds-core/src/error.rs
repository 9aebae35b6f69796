//! Error taxonomy for the build-and-publish pipeline.
//!
//! `Config` and `Platform` are only raised before the per-version loop and
//! abort the run; both report [`ErrorKind::Config`].
//! Every other kind is scoped to a single version: the orchestrator records
//! it in the run report and moves on.

use serde::{Deserialize, Serialize};

/// Closed set of failure kinds, as reported per version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Vcs,
    Registry,
    Build,
    Packaging,
    Upload,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Vcs => "vcs",
            ErrorKind::Registry => "registry",
            ErrorKind::Build => "build",
            ErrorKind::Packaging => "packaging",
            ErrorKind::Upload => "upload",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("platform detection failed: {0}")]
    Platform(String),

    #[error("version control error: {0}")]
    Vcs(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("build stage {stage} failed: {detail}")]
    Build { stage: String, detail: String },

    #[error("packaging error: {0}")]
    Packaging(String),

    #[error("upload of {asset} failed: {detail}")]
    Upload { asset: String, detail: String },

    #[error("version timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("cancelled at stage {stage}")]
    Cancelled { stage: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) | PipelineError::Platform(_) => ErrorKind::Config,
            PipelineError::Vcs(_) => ErrorKind::Vcs,
            PipelineError::Registry(_) => ErrorKind::Registry,
            PipelineError::Build { .. } => ErrorKind::Build,
            PipelineError::Packaging(_) => ErrorKind::Packaging,
            PipelineError::Upload { .. } => ErrorKind::Upload,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn build(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::Build {
            stage: stage.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(PipelineError::Config("x".into()).kind(), ErrorKind::Config);
        assert_eq!(PipelineError::Platform("x".into()).kind(), ErrorKind::Config);
        assert_eq!(PipelineError::Vcs("x".into()).kind(), ErrorKind::Vcs);
        assert_eq!(PipelineError::build("compile", "exit 2").kind(), ErrorKind::Build);
        assert_eq!(
            PipelineError::Upload {
                asset: "a".into(),
                detail: "b".into()
            }
            .kind(),
            ErrorKind::Upload
        );
        assert_eq!(PipelineError::Timeout { secs: 1 }.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn build_error_display_names_stage() {
        let err = PipelineError::build("configure", "exited with code 1");
        let msg = err.to_string();
        assert!(msg.contains("configure"));
        assert!(msg.contains("exited with code 1"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Packaging).unwrap();
        assert_eq!(json, "\"packaging\"");
        assert_eq!(ErrorKind::Cancelled.to_string(), "cancelled");
    }
}
