//! In-memory collaborator fakes (testing only)
//!
//! `FakeCheckout` plays both the version control and the build toolchain for
//! a scratch directory. It records every call and can be told to fail
//! specific stages or specific tags.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::patches::PatchRule;
use crate::toolchain::{Toolchain, RELEASE_DIR};
use crate::vcs::VersionControl;

/// SSL prefix reported by [`FakeCheckout::locate_ssl`].
pub const FAKE_SSL_PREFIX: &str = "/opt/homebrew/opt/openssl";

#[derive(Debug, Default)]
struct CheckoutState {
    current: Option<String>,
    calls: Vec<String>,
    vcs_calls: Vec<String>,
}

/// Scripted working tree.
#[derive(Debug)]
pub struct FakeCheckout {
    root: PathBuf,
    tags: Vec<String>,
    failing_stages: HashSet<String>,
    failing_builds: HashSet<String>,
    failing_checkouts: HashSet<String>,
    release_dirs: usize,
    state: Mutex<CheckoutState>,
}

impl FakeCheckout {
    pub fn new(root: &Path, tags: &[&str]) -> Self {
        Self {
            root: root.to_path_buf(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            failing_stages: HashSet::new(),
            failing_builds: HashSet::new(),
            failing_checkouts: HashSet::new(),
            release_dirs: 1,
            state: Mutex::new(CheckoutState::default()),
        }
    }

    /// Make a stage (`bootstrap`, `configure`, `compile`, `package`) fail for every tag.
    pub fn fail_stage(mut self, stage: &str) -> Self {
        self.failing_stages.insert(stage.to_string());
        self
    }

    /// Make compilation fail while `tag` is checked out.
    pub fn fail_build_for(mut self, tag: &str) -> Self {
        self.failing_builds.insert(tag.to_string());
        self
    }

    /// Make checking out `tag` fail.
    pub fn fail_checkout_for(mut self, tag: &str) -> Self {
        self.failing_checkouts.insert(tag.to_string());
        self
    }

    /// Number of top-level directories `package` creates under the output root.
    pub fn with_release_dirs(mut self, count: usize) -> Self {
        self.release_dirs = count;
        self
    }

    /// Toolchain calls in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Version control calls in order.
    pub fn vcs_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().vcs_calls.clone()
    }

    fn record(&self, call: String) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.current.clone()
    }

    fn record_vcs(&self, call: String) {
        self.state.lock().unwrap().vcs_calls.push(call);
    }

    fn check_stage(&self, stage: &str) -> Result<()> {
        if self.failing_stages.contains(stage) {
            return Err(PipelineError::build(stage, "exited with code 2: scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionControl for FakeCheckout {
    async fn list_tags(&self, pattern: &str) -> Result<Vec<String>> {
        self.record_vcs(format!("list_tags {pattern}"));
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .tags
            .iter()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn reset_hard(&self) -> Result<()> {
        self.record_vcs("reset_hard".to_string());
        Ok(())
    }

    async fn checkout(&self, tag: &str) -> Result<()> {
        self.record_vcs(format!("checkout {tag}"));
        if self.failing_checkouts.contains(tag) || !self.tags.iter().any(|t| t == tag) {
            return Err(PipelineError::Vcs(format!(
                "git checkout exited with code 1: pathspec '{tag}' did not match"
            )));
        }
        self.state.lock().unwrap().current = Some(tag.to_string());
        Ok(())
    }

    async fn clean_untracked(&self) -> Result<()> {
        self.record_vcs("clean_untracked".to_string());
        let release = self.root.join(RELEASE_DIR);
        if release.exists() {
            std::fs::remove_dir_all(&release)
                .map_err(|e| PipelineError::Vcs(format!("git clean failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Toolchain for FakeCheckout {
    async fn apply_patch(&self, rule: &PatchRule, _cancel: &CancellationToken) -> Result<()> {
        self.record(format!("patch {}", rule.name));
        self.check_stage("patch")
    }

    async fn locate_ssl(&self, _cancel: &CancellationToken) -> Result<String> {
        self.record("locate_ssl".to_string());
        self.check_stage("locate_ssl")?;
        Ok(FAKE_SSL_PREFIX.to_string())
    }

    async fn bootstrap(&self, _cancel: &CancellationToken) -> Result<()> {
        self.record("bootstrap".to_string());
        self.check_stage("bootstrap")
    }

    async fn configure(
        &self,
        ssl_flag: &str,
        feature_flags: &[String],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut call = format!("configure {ssl_flag}");
        for flag in feature_flags {
            call.push(' ');
            call.push_str(flag);
        }
        self.record(call);
        self.check_stage("configure")
    }

    async fn compile(&self, parallelism: usize, _cancel: &CancellationToken) -> Result<()> {
        let current = self.record(format!("compile -j{parallelism}"));
        self.check_stage("compile")?;
        if let Some(tag) = current {
            if self.failing_builds.contains(&tag) {
                return Err(PipelineError::build(
                    "compile",
                    format!("exited with code 2: {tag} does not build"),
                ));
            }
        }
        Ok(())
    }

    async fn package(&self, _cancel: &CancellationToken) -> Result<()> {
        let current = self.record("package".to_string());
        self.check_stage("package")?;
        let tag = current.unwrap_or_default();
        let root = self.output_root();
        std::fs::create_dir_all(&root)
            .map_err(|e| PipelineError::build("package", e.to_string()))?;
        for i in 0..self.release_dirs {
            let bin = root.join(format!("x86_64-unknown-linux-gnu-{i}")).join("bin");
            std::fs::create_dir_all(&bin)
                .map_err(|e| PipelineError::build("package", e.to_string()))?;
            std::fs::write(bin.join("erl"), format!("#!/bin/sh\n# {tag}\n"))
                .map_err(|e| PipelineError::build("package", e.to_string()))?;
        }
        Ok(())
    }

    fn output_root(&self) -> PathBuf {
        self.root.join(RELEASE_DIR)
    }
}
