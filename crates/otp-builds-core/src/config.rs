//! Run settings, validated before the per-version loop starts.

use std::path::PathBuf;
use std::time::Duration;

use otp_builds_registry::{Repository, DEFAULT_API_URL};

use crate::error::{PipelineError, Result};
use crate::version::DEFAULT_TAG_PATTERN;

/// Default per-version wall-clock limit.
pub const DEFAULT_VERSION_TIMEOUT_SECS: u64 = 7200;

/// Raw inputs, typically from command-line flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct RawSettings {
    pub token: Option<String>,
    pub repository: Option<String>,
    pub pattern: Option<String>,
    pub workdir: Option<PathBuf>,
    pub api_url: Option<String>,
    pub version_timeout_secs: Option<u64>,
    pub report_path: Option<PathBuf>,
}

/// Validated settings for one run.
#[derive(Clone)]
pub struct Settings {
    pub token: String,
    pub repository: Repository,
    pub pattern: String,
    pub workdir: PathBuf,
    pub api_url: String,
    /// `None` disables the per-version timeout.
    pub version_timeout: Option<Duration>,
    pub report_path: Option<PathBuf>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("token", &"<redacted>")
            .field("repository", &self.repository)
            .field("pattern", &self.pattern)
            .field("workdir", &self.workdir)
            .field("api_url", &self.api_url)
            .field("version_timeout", &self.version_timeout)
            .field("report_path", &self.report_path)
            .finish()
    }
}

impl Settings {
    /// Validate raw inputs. Missing credential or repository identity, or a
    /// malformed repository, is a configuration error.
    pub fn resolve(raw: RawSettings) -> Result<Self> {
        let token = raw
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::Config("registry token is not set".to_string()))?;

        let repository = raw
            .repository
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("repository is not set".to_string()))?
            .parse::<Repository>()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let pattern = raw
            .pattern
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_TAG_PATTERN.to_string());

        let version_timeout = match raw
            .version_timeout_secs
            .unwrap_or(DEFAULT_VERSION_TIMEOUT_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            token,
            repository,
            pattern,
            workdir: raw.workdir.unwrap_or_else(|| PathBuf::from(".")),
            api_url: raw.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            version_timeout,
            report_path: raw.report_path,
        })
    }
}
