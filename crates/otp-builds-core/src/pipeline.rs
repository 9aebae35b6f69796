//! Batch orchestration: one pipeline per version tag, strictly sequential.
//!
//! Per version:
//! `Pending -> CheckedOut -> ReleaseResolved -> {Skipped | Built -> Packaged -> Published}`.
//! Any error sends that version to `Failed`; the loop moves on to the next
//! tag. Only errors raised before the loop (tag enumeration) abort the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use otp_builds_registry::{ReleaseRegistry, Repository};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::build_driver::{BuildConfiguration, BuildDriver};
use crate::error::{PipelineError, Result};
use crate::patches::select_patches;
use crate::platform::Platform;
use crate::publish;
use crate::release_registry::ReleaseRegistryApi;
use crate::report::{Outcome, RunReport};
use crate::toolchain::Toolchain;
use crate::vcs::VersionControl;
use crate::version::{list_versions, SemanticTriple};

/// Drives every version through checkout, release resolution, build,
/// packaging and upload.
pub struct Orchestrator<R> {
    vcs: Arc<dyn VersionControl>,
    toolchain: Arc<dyn Toolchain>,
    registry: ReleaseRegistryApi<R>,
    repository: Repository,
    platform: Platform,
    version_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<R> Orchestrator<R>
where
    R: ReleaseRegistry,
{
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        toolchain: Arc<dyn Toolchain>,
        registry: R,
        repository: Repository,
        platform: Platform,
    ) -> Self {
        Self {
            vcs,
            toolchain,
            registry: ReleaseRegistryApi::new(registry),
            repository,
            platform,
            version_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Wall-clock limit for a single version. `None` disables it.
    pub fn with_version_timeout(mut self, limit: Option<Duration>) -> Self {
        self.version_timeout = limit;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enumerate tags matching `pattern` and process each of them.
    ///
    /// Fails only if enumeration fails; per-version errors end up in the
    /// returned report.
    pub async fn run(&self, pattern: &str) -> Result<RunReport> {
        let tags = list_versions(self.vcs.as_ref(), pattern).await?;
        Ok(self.run_tags(&tags).await)
    }

    /// Process the given tags in order.
    pub async fn run_tags(&self, tags: &[String]) -> RunReport {
        let mut report = RunReport::start(self.repository.to_string(), self.platform.label());
        info!(
            run_id = %report.run_id,
            repository = %self.repository,
            platform = %self.platform,
            versions = tags.len(),
            "Starting build run"
        );

        for tag in tags {
            if self.cancel.is_cancelled() {
                report.record(tag, Outcome::Cancelled, 0);
                continue;
            }

            let started = Instant::now();
            let span = info_span!("version", tag = %tag);
            let outcome = self.run_version(tag).instrument(span.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            span.in_scope(|| log_outcome(&outcome, duration_ms));
            report.record(tag, outcome, duration_ms);
        }

        report.finish();
        info!(
            run_id = %report.run_id,
            published = report.published_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled_count(),
            "Build run finished"
        );
        report
    }

    /// Run one version to completion.
    ///
    /// The version gets a child of the run's token. Hitting the deadline
    /// cancels that child and then keeps driving the version until its
    /// running stage has stopped, so nothing from this version is still
    /// writing to the working tree when the next checkout starts.
    async fn run_version(&self, tag: &str) -> Outcome {
        let cancel = self.cancel.child_token();
        let work = self.process_version(tag, &cancel);
        tokio::pin!(work);

        let mut deadline_hit = None;
        let result = match self.version_timeout {
            Some(limit) => tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep(limit) => {
                    warn!(limit_secs = limit.as_secs(), "Version deadline reached, stopping its stages");
                    cancel.cancel();
                    deadline_hit = Some(limit);
                    (&mut work).await
                }
            },
            None => work.await,
        };

        let result = match (result, deadline_hit) {
            (Err(_), Some(limit)) => Err(PipelineError::Timeout {
                secs: limit.as_secs(),
            }),
            (result, _) => result,
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => Outcome::failed(&err),
        }
    }

    async fn process_version(&self, tag: &str, cancel: &CancellationToken) -> Result<Outcome> {
        // Pending -> CheckedOut
        checkpoint(cancel, "checkout")?;
        self.vcs.reset_hard().await?;
        self.vcs.checkout(tag).await?;
        self.vcs.clean_untracked().await?;

        // CheckedOut -> ReleaseResolved
        checkpoint(cancel, "resolve release")?;
        let release = self
            .registry
            .get_or_create_release(&self.repository, tag)
            .await?;

        let asset_name = self.platform.asset_name();
        if let Some(asset_id) = self
            .registry
            .find_asset(&self.repository, release.id, &asset_name)
            .await?
        {
            info!(asset = %asset_name, asset_id, "Asset already published");
            return Ok(Outcome::Skipped {
                release_id: release.id,
                asset: asset_name,
            });
        }

        // ReleaseResolved -> Built
        let triple = SemanticTriple::parse(tag);
        let patches = select_patches(self.platform.family(), &triple);
        info!(
            version = %triple,
            patches = ?patches.iter().map(|p| p.name).collect::<Vec<_>>(),
            "Selected patches"
        );
        let config = BuildConfiguration::for_platform(&self.platform);
        let output_root = BuildDriver::new(self.toolchain.as_ref(), cancel.clone())
            .build(&config, &patches)
            .await?;

        // Built -> Packaged. The blocking task is always awaited.
        checkpoint(cancel, "archive")?;
        let name = asset_name.clone();
        let published = tokio::task::spawn_blocking(move || publish::package(&output_root, &name))
            .await
            .map_err(|e| PipelineError::Packaging(format!("packaging task failed: {e}")))??;

        // Packaged -> Published
        checkpoint(cancel, "upload")?;
        let archive_name = published.archive_name();
        let checksum_name = published.checksum_name();
        futures::try_join!(
            self.registry.upload_asset(
                &release.upload_url,
                &archive_name,
                &published.archive_path
            ),
            self.registry.upload_asset(
                &release.upload_url,
                &checksum_name,
                &published.checksum_path
            ),
        )?;

        Ok(Outcome::Published {
            release_id: release.id,
            asset: asset_name,
        })
    }
}

fn checkpoint(cancel: &CancellationToken, stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            stage: stage.to_string(),
        });
    }
    Ok(())
}

fn log_outcome(outcome: &Outcome, duration_ms: u64) {
    match outcome {
        Outcome::Published { release_id, asset } => {
            info!(release_id, asset = %asset, duration_ms, "Published")
        }
        Outcome::Skipped { release_id, asset } => {
            info!(release_id, asset = %asset, duration_ms, "Skipped, asset already present")
        }
        Outcome::Failed { kind, detail } => {
            error!(kind = %kind, detail = %detail, duration_ms, "Failed")
        }
        Outcome::Cancelled => warn!("Cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fakes::FakeCheckout;
    use otp_builds_registry::fakes::MemoryReleaseRegistry;

    fn orchestrator(
        checkout: Arc<FakeCheckout>,
        registry: Arc<MemoryReleaseRegistry>,
    ) -> Orchestrator<Arc<MemoryReleaseRegistry>> {
        Orchestrator::new(
            checkout.clone(),
            checkout,
            registry,
            Repository::new("erlef", "otp-builds"),
            Platform::new("Linux", "5.4.0"),
        )
    }

    #[tokio::test]
    async fn empty_tag_list_is_a_no_op_run() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = Arc::new(FakeCheckout::new(dir.path(), &[]));
        let registry = Arc::new(MemoryReleaseRegistry::new());
        let report = orchestrator(checkout.clone(), registry.clone())
            .run("OTP-*")
            .await
            .unwrap();
        assert!(report.versions.is_empty());
        assert_eq!(registry.create_calls(), 0);
        assert!(checkout.calls().is_empty());
    }

    #[tokio::test]
    async fn checkout_precedes_release_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-23.0"]));
        let registry = Arc::new(MemoryReleaseRegistry::new());
        orchestrator(checkout.clone(), registry)
            .run("OTP-*")
            .await
            .unwrap();
        assert_eq!(
            checkout.vcs_calls(),
            vec![
                "list_tags OTP-*",
                "reset_hard",
                "checkout OTP-23.0",
                "clean_untracked"
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-22.3", "OTP-23.0"]));
        let registry = Arc::new(MemoryReleaseRegistry::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = orchestrator(checkout.clone(), registry.clone())
            .with_cancellation(cancel)
            .run("OTP-*")
            .await
            .unwrap();
        assert_eq!(report.cancelled_count(), 2);
        assert_eq!(registry.create_calls(), 0);
        assert!(checkout.calls().is_empty());
    }

    #[tokio::test]
    async fn packaging_failure_is_isolated_and_uploads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let checkout =
            Arc::new(FakeCheckout::new(dir.path(), &["OTP-23.0"]).with_release_dirs(2));
        let registry = Arc::new(MemoryReleaseRegistry::new());
        let report = orchestrator(checkout, registry.clone())
            .run("OTP-*")
            .await
            .unwrap();
        assert!(matches!(
            report.outcome_of("OTP-23.0"),
            Some(Outcome::Failed { kind: ErrorKind::Packaging, .. })
        ));
        assert_eq!(registry.upload_calls(), 0);
    }

    #[tokio::test]
    async fn upload_failure_is_reported_as_upload_kind() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-23.0"]));
        let registry = Arc::new(MemoryReleaseRegistry::new());
        registry.fail_uploads_named("linux-5.4.0.sha256");
        let report = orchestrator(checkout, registry)
            .run("OTP-*")
            .await
            .unwrap();
        assert!(matches!(
            report.outcome_of("OTP-23.0"),
            Some(Outcome::Failed { kind: ErrorKind::Upload, .. })
        ));
    }

    /// Toolchain whose compile stage runs until its token is cancelled.
    struct StallingToolchain {
        inner: FakeCheckout,
        cancel_run_on_compile: Option<CancellationToken>,
        stopped: std::sync::atomic::AtomicBool,
    }

    impl StallingToolchain {
        fn new(root: &std::path::Path) -> Self {
            Self {
                inner: FakeCheckout::new(root, &[]),
                cancel_run_on_compile: None,
                stopped: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn stopped(&self) -> bool {
            self.stopped.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Toolchain for StallingToolchain {
        async fn apply_patch(
            &self,
            rule: &crate::patches::PatchRule,
            cancel: &CancellationToken,
        ) -> Result<()> {
            self.inner.apply_patch(rule, cancel).await
        }
        async fn locate_ssl(&self, cancel: &CancellationToken) -> Result<String> {
            self.inner.locate_ssl(cancel).await
        }
        async fn bootstrap(&self, cancel: &CancellationToken) -> Result<()> {
            self.inner.bootstrap(cancel).await
        }
        async fn configure(
            &self,
            ssl_flag: &str,
            flags: &[String],
            cancel: &CancellationToken,
        ) -> Result<()> {
            self.inner.configure(ssl_flag, flags, cancel).await
        }
        async fn compile(&self, _parallelism: usize, cancel: &CancellationToken) -> Result<()> {
            if let Some(run) = &self.cancel_run_on_compile {
                run.cancel();
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(3600)) => Ok(()),
                _ = cancel.cancelled() => {
                    // Simulates reaping the stage's processes.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
                    Err(PipelineError::Cancelled {
                        stage: "compile".to_string(),
                    })
                }
            }
        }
        async fn package(&self, cancel: &CancellationToken) -> Result<()> {
            self.inner.package(cancel).await
        }
        fn output_root(&self) -> std::path::PathBuf {
            self.inner.output_root()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_stops_the_running_stage_before_moving_on() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(FakeCheckout::new(dir.path(), &["OTP-22.3", "OTP-23.0"]));
        let toolchain = Arc::new(StallingToolchain::new(dir.path()));
        let registry = Arc::new(MemoryReleaseRegistry::new());
        let report = Orchestrator::new(
            vcs.clone(),
            toolchain.clone(),
            registry.clone(),
            Repository::new("erlef", "otp-builds"),
            Platform::new("Linux", "5.4.0"),
        )
        .with_version_timeout(Some(Duration::from_secs(60)))
        .run("OTP-*")
        .await
        .unwrap();

        for tag in ["OTP-22.3", "OTP-23.0"] {
            assert!(matches!(
                report.outcome_of(tag),
                Some(Outcome::Failed { kind: ErrorKind::Timeout, .. })
            ));
        }
        assert!(toolchain.stopped());
        assert_eq!(registry.upload_calls(), 0);
        // The second checkout only happens after the first build stopped.
        assert_eq!(
            vcs.vcs_calls()
                .iter()
                .filter(|c| c.starts_with("checkout"))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_build_waits_for_the_stage_and_cancels_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = Arc::new(FakeCheckout::new(dir.path(), &["OTP-22.3", "OTP-23.0"]));
        let run_cancel = CancellationToken::new();
        let mut stalling = StallingToolchain::new(dir.path());
        stalling.cancel_run_on_compile = Some(run_cancel.clone());
        let toolchain = Arc::new(stalling);
        let registry = Arc::new(MemoryReleaseRegistry::new());

        let report = Orchestrator::new(
            vcs,
            toolchain.clone(),
            registry.clone(),
            Repository::new("erlef", "otp-builds"),
            Platform::new("Linux", "5.4.0"),
        )
        .with_cancellation(run_cancel)
        .run("OTP-*")
        .await
        .unwrap();

        assert!(toolchain.stopped());
        assert!(matches!(
            report.outcome_of("OTP-22.3"),
            Some(Outcome::Failed { kind: ErrorKind::Cancelled, .. })
        ));
        assert!(matches!(report.outcome_of("OTP-23.0"), Some(Outcome::Cancelled)));
        assert_eq!(registry.upload_calls(), 0);
    }
}
