//! Build toolchain collaborator: patching and the OTP build scripts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::patches::PatchRule;
use crate::stage::{StageCommand, StageRunner};

/// Directory, relative to the source tree, that `make release` populates.
pub const RELEASE_DIR: &str = "release";

/// External build steps, each a blocking invocation in the working tree.
///
/// Every step takes the version's cancellation token. A step that is running
/// when the token fires stops its processes before returning
/// [`PipelineError::Cancelled`].
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Apply one patch payload to the working tree.
    async fn apply_patch(&self, rule: &PatchRule, cancel: &CancellationToken) -> Result<()>;

    /// Ask the package-location provider where OpenSSL is installed.
    async fn locate_ssl(&self, cancel: &CancellationToken) -> Result<String>;

    /// Regenerate the configure scripts.
    async fn bootstrap(&self, cancel: &CancellationToken) -> Result<()>;

    async fn configure(
        &self,
        ssl_flag: &str,
        feature_flags: &[String],
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn compile(&self, parallelism: usize, cancel: &CancellationToken) -> Result<()>;

    /// Lay out the release under [`Toolchain::output_root`].
    async fn package(&self, cancel: &CancellationToken) -> Result<()>;

    /// Fixed location the packaging stage writes to.
    fn output_root(&self) -> PathBuf;
}

/// [`Toolchain`] driving an Erlang/OTP source checkout.
#[derive(Debug, Clone)]
pub struct OtpToolchain {
    source_dir: PathBuf,
}

impl OtpToolchain {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    async fn run(&self, stage: StageCommand, cancel: &CancellationToken) -> Result<String> {
        let name = stage.name.clone();
        info!(stage = %name, "Running build stage");
        let output = StageRunner::execute(&stage.with_cancellation(cancel))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::Interrupted => PipelineError::Cancelled {
                    stage: name.clone(),
                },
                _ => PipelineError::build(&name, e.to_string()),
            })?;
        if !output.passed() {
            return Err(PipelineError::build(&name, output.failure_detail()));
        }
        info!(stage = %name, duration_ms = output.duration_ms, "Build stage finished");
        Ok(output.stdout)
    }
}

#[async_trait]
impl Toolchain for OtpToolchain {
    async fn apply_patch(&self, rule: &PatchRule, cancel: &CancellationToken) -> Result<()> {
        let stage = StageCommand::new(
            &format!("patch {}", rule.name),
            &self.source_dir,
            ["patch", "-p1", "--forward", "--batch"],
        )
        .with_stdin(rule.payload);
        self.run(stage, cancel).await.map(|_| ())
    }

    async fn locate_ssl(&self, cancel: &CancellationToken) -> Result<String> {
        let stage = StageCommand::new(
            "locate openssl",
            &self.source_dir,
            ["brew", "--prefix", "openssl"],
        );
        let prefix = self.run(stage, cancel).await?.trim().to_string();
        if prefix.is_empty() {
            return Err(PipelineError::build(
                "locate openssl",
                "brew returned an empty prefix",
            ));
        }
        Ok(prefix)
    }

    async fn bootstrap(&self, cancel: &CancellationToken) -> Result<()> {
        let stage = StageCommand::new("bootstrap", &self.source_dir, ["./otp_build", "autoconf"]);
        self.run(stage, cancel).await.map(|_| ())
    }

    async fn configure(
        &self,
        ssl_flag: &str,
        feature_flags: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut command = vec!["./configure".to_string(), ssl_flag.to_string()];
        command.extend(feature_flags.iter().cloned());
        let stage = StageCommand::new("configure", &self.source_dir, command);
        self.run(stage, cancel).await.map(|_| ())
    }

    async fn compile(&self, parallelism: usize, cancel: &CancellationToken) -> Result<()> {
        let jobs = format!("-j{}", parallelism.max(1));
        let stage = StageCommand::new("compile", &self.source_dir, ["make".to_string(), jobs]);
        self.run(stage, cancel).await.map(|_| ())
    }

    async fn package(&self, cancel: &CancellationToken) -> Result<()> {
        let stage = StageCommand::new("package", &self.source_dir, ["make", "release"]);
        self.run(stage, cancel).await.map(|_| ())
    }

    fn output_root(&self) -> PathBuf {
        self.source_dir.join(RELEASE_DIR)
    }
}
