//! Version control collaborator.
//!
//! The working tree is shared by every version of a run, so it is reset,
//! checked out and cleaned before each one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::stage::{StageCommand, StageRunner};

/// Operations the pipeline needs from version control.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Tags matching a glob, in the order the tool reports them.
    async fn list_tags(&self, pattern: &str) -> Result<Vec<String>>;

    /// Discard local modifications to tracked files.
    async fn reset_hard(&self) -> Result<()>;

    /// Check out the tree at `tag`.
    async fn checkout(&self, tag: &str) -> Result<()>;

    /// Remove untracked and ignored files.
    async fn clean_untracked(&self) -> Result<()>;
}

/// [`VersionControl`] backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct SystemGit {
    repo_dir: PathBuf,
}

impl SystemGit {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let name = format!("git {}", args.first().copied().unwrap_or_default());
        let mut command = vec!["git"];
        command.extend_from_slice(args);
        let stage = StageCommand::new(&name, &self.repo_dir, command)
            .with_env("GIT_TERMINAL_PROMPT", "0");

        let output = StageRunner::execute(&stage)
            .await
            .map_err(|e| PipelineError::Vcs(format!("failed to run {name}: {e}")))?;
        if !output.passed() {
            return Err(PipelineError::Vcs(format!(
                "{name} {}",
                output.failure_detail()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VersionControl for SystemGit {
    async fn list_tags(&self, pattern: &str) -> Result<Vec<String>> {
        let stdout = self.git(&["tag", "--list", pattern]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn reset_hard(&self) -> Result<()> {
        self.git(&["reset", "--hard", "--quiet"]).await.map(|_| ())
    }

    async fn checkout(&self, tag: &str) -> Result<()> {
        let reference = format!("refs/tags/{tag}");
        self.git(&["checkout", "--force", "--quiet", &reference])
            .await
            .map(|_| ())
    }

    async fn clean_untracked(&self) -> Result<()> {
        self.git(&["clean", "-ffdx", "--quiet"]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("VERSION"), "22.3\n").unwrap();
        run_git(dir.path(), &["add", "VERSION"]);
        run_git(dir.path(), &["commit", "--quiet", "-m", "22.3"]);
        run_git(dir.path(), &["tag", "OTP-22.3"]);
        std::fs::write(dir.path().join("VERSION"), "23.0\n").unwrap();
        run_git(dir.path(), &["commit", "--quiet", "-am", "23.0"]);
        run_git(dir.path(), &["tag", "OTP-23.0"]);
        run_git(dir.path(), &["tag", "maint-23"]);
        dir
    }

    #[tokio::test]
    async fn list_tags_filters_by_glob() {
        let repo = make_git_repo();
        let git = SystemGit::new(repo.path());
        let tags = git.list_tags("OTP-*").await.unwrap();
        assert_eq!(tags, vec!["OTP-22.3", "OTP-23.0"]);
        assert!(git.list_tags("OTP-99*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkout_cycle_restores_pristine_tree() {
        let repo = make_git_repo();
        let git = SystemGit::new(repo.path());

        std::fs::write(repo.path().join("VERSION"), "dirty\n").unwrap();
        std::fs::write(repo.path().join("build.log"), "leftover").unwrap();

        git.reset_hard().await.unwrap();
        git.checkout("OTP-22.3").await.unwrap();
        git.clean_untracked().await.unwrap();

        let version = std::fs::read_to_string(repo.path().join("VERSION")).unwrap();
        assert_eq!(version, "22.3\n");
        assert!(!repo.path().join("build.log").exists());
    }

    #[tokio::test]
    async fn checkout_of_unknown_tag_is_vcs_error() {
        let repo = make_git_repo();
        let git = SystemGit::new(repo.path());
        let err = git.checkout("OTP-1.0").await.unwrap_err();
        assert!(matches!(err, PipelineError::Vcs(_)));
    }

    #[tokio::test]
    async fn list_tags_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let git = SystemGit::new(dir.path());
        assert!(git.list_tags("*").await.is_err());
    }
}
