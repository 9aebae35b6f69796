//! Per-version build: patch, bootstrap, configure, compile, package.
//!
//! Stages run strictly in order. The first failing stage aborts the rest for
//! this version; nothing is retried. A cancellation check runs before every
//! stage, and the same token is handed to the toolchain so a running stage
//! is stopped as well.

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::patches::PatchRule;
use crate::platform::{OsFamily, Platform};
use crate::toolchain::Toolchain;

/// Feature flag passed to `configure` on every platform.
pub const DIRTY_SCHEDULERS_FLAG: &str = "--enable-dirty-schedulers";

/// Generic SSL flag used where no package-location provider is queried.
pub const GENERIC_SSL_FLAG: &str = "--with-ssl";

/// Where the configure stage gets its SSL location from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SslSource {
    /// Ask the package-location provider at build time (darwin).
    PackageProvider,
    /// Let configure find the system library.
    Generic,
}

/// Inputs of one version's build. Built fresh for every version.
#[derive(Debug, Clone, Serialize)]
pub struct BuildConfiguration {
    pub platform: Platform,
    pub ssl: SslSource,
    pub parallelism: usize,
    pub feature_flags: Vec<String>,
}

impl BuildConfiguration {
    pub fn for_platform(platform: &Platform) -> Self {
        let ssl = match platform.family() {
            OsFamily::Darwin => SslSource::PackageProvider,
            _ => SslSource::Generic,
        };
        Self {
            platform: platform.clone(),
            ssl,
            parallelism: host_parallelism(),
            feature_flags: vec![DIRTY_SCHEDULERS_FLAG.to_string()],
        }
    }
}

/// Logical cores available to this process.
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Drives a [`Toolchain`] through the build stages.
pub struct BuildDriver<'a> {
    toolchain: &'a dyn Toolchain,
    cancel: CancellationToken,
}

impl<'a> BuildDriver<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, cancel: CancellationToken) -> Self {
        Self { toolchain, cancel }
    }

    /// Run every stage and return the build output root.
    pub async fn build(
        &self,
        config: &BuildConfiguration,
        patches: &[&PatchRule],
    ) -> Result<PathBuf> {
        for rule in patches {
            self.checkpoint(rule.name)?;
            info!(patch = rule.name, "Applying patch");
            self.toolchain.apply_patch(rule, &self.cancel).await?;
        }

        self.checkpoint("bootstrap")?;
        self.toolchain.bootstrap(&self.cancel).await?;

        self.checkpoint("configure")?;
        let ssl_flag = match config.ssl {
            SslSource::PackageProvider => {
                let prefix = self.toolchain.locate_ssl(&self.cancel).await?;
                format!("{GENERIC_SSL_FLAG}={prefix}")
            }
            SslSource::Generic => GENERIC_SSL_FLAG.to_string(),
        };
        self.toolchain
            .configure(&ssl_flag, &config.feature_flags, &self.cancel)
            .await?;

        self.checkpoint("compile")?;
        self.toolchain.compile(config.parallelism, &self.cancel).await?;

        self.checkpoint("package")?;
        self.toolchain.package(&self.cancel).await?;

        Ok(self.toolchain.output_root())
    }

    fn checkpoint(&self, stage: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}
