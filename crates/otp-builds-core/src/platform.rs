//! Host platform identity and the asset names derived from it.

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{PipelineError, Result};

/// Extension of every release archive.
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Extension of the checksum sidecar written next to an archive.
pub const CHECKSUM_EXTENSION: &str = ".sha256";

/// Operating system family, as far as patch rules and the build care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Darwin,
    Linux,
    Other,
}

/// Operating system name and kernel release, as reported by `uname`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os_name: String,
    pub kernel_release: String,
}

impl Platform {
    pub fn new(os_name: impl Into<String>, kernel_release: impl Into<String>) -> Self {
        Self {
            os_name: os_name.into(),
            kernel_release: kernel_release.into(),
        }
    }

    /// Query `uname -s` and `uname -r`.
    pub async fn detect() -> Result<Self> {
        let os_name = uname("-s").await?;
        let kernel_release = uname("-r").await?;
        Ok(Self::new(os_name, kernel_release))
    }

    pub fn family(&self) -> OsFamily {
        match self.os_name.trim().to_ascii_lowercase().as_str() {
            "darwin" => OsFamily::Darwin,
            "linux" => OsFamily::Linux,
            _ => OsFamily::Other,
        }
    }

    /// Platform label, e.g. `darwin-19.6.0`.
    pub fn label(&self) -> String {
        format!(
            "{}-{}",
            normalize(&self.os_name),
            normalize(&self.kernel_release)
        )
    }

    /// Archive asset name, e.g. `darwin-19.6.0.tar.gz`.
    pub fn asset_name(&self) -> String {
        format!("{}{}", self.label(), ARCHIVE_EXTENSION)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

fn normalize(part: &str) -> String {
    part.trim().to_lowercase().replace(' ', "-")
}

async fn uname(flag: &str) -> Result<String> {
    host_query("uname", flag).await
}

async fn host_query(program: &str, flag: &str) -> Result<String> {
    let output = Command::new(program)
        .arg(flag)
        .output()
        .await
        .map_err(|e| PipelineError::Platform(format!("could not run {program} {flag}: {e}")))?;
    if !output.status.success() {
        return Err(PipelineError::Platform(format!(
            "{program} {flag} exited with {}",
            output.status
        )));
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        return Err(PipelineError::Platform(format!(
            "{program} {flag} returned empty output"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_name_is_lowercase_and_hyphenated() {
        let p = Platform::new("Darwin", "19.6.0");
        assert_eq!(p.asset_name(), "darwin-19.6.0.tar.gz");

        let spaced = Platform::new("GNU Hurd", "0.9 GNU-Mach");
        assert_eq!(spaced.label(), "gnu-hurd-0.9-gnu-mach");
    }

    #[test]
    fn family_detection() {
        assert_eq!(Platform::new("Darwin", "20.1.0").family(), OsFamily::Darwin);
        assert_eq!(Platform::new("Linux", "5.4.0").family(), OsFamily::Linux);
        assert_eq!(Platform::new("FreeBSD", "13.0").family(), OsFamily::Other);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detect_returns_non_empty_values() {
        let p = Platform::detect().await.expect("uname available");
        assert!(!p.os_name.is_empty());
        assert!(!p.kernel_release.is_empty());
        assert!(p.asset_name().ends_with(ARCHIVE_EXTENSION));
    }

    #[tokio::test]
    async fn missing_uname_is_a_platform_error() {
        let err = host_query("/nonexistent/uname", "-s").await.unwrap_err();
        assert!(matches!(err, PipelineError::Platform(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.to_string().starts_with("platform detection failed"));
        assert!(!err.to_string().contains("configuration error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_is_a_platform_error() {
        let err = host_query("true", "-s").await.unwrap_err();
        assert!(matches!(err, PipelineError::Platform(ref m) if m.contains("empty output")));
    }
}
