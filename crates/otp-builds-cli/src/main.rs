//! otp-builds - Erlang/OTP release builder
//!
//! Builds a platform archive for every OTP tag in a source checkout and
//! publishes it, with a checksum sidecar, to GitHub Releases.
//!
//! ## Commands
//!
//! - `run` (default): build and publish every matching tag
//! - `list`: print the matching tags
//! - `patches`: print the patches selected for a tag

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use otp_builds_core::{
    init_tracing, list_versions, select_patches, Orchestrator, Outcome, OtpToolchain, Platform,
    RawSettings, RunReport, SemanticTriple, Settings, SystemGit, DEFAULT_TAG_PATTERN,
    DEFAULT_VERSION_TIMEOUT_SECS,
};
use otp_builds_registry::{GitHubConfig, GitHubReleaseRegistry, DEFAULT_API_URL};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "otp-builds")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build Erlang/OTP releases and publish them to GitHub Releases", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    publish: PublishArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct SourceArgs {
    /// Glob selecting the tags to build
    #[arg(long, env = "OTP_TAG_PATTERN", default_value = DEFAULT_TAG_PATTERN, global = true)]
    pattern: String,

    /// OTP source checkout shared by every build
    #[arg(long, env = "OTP_SOURCE_DIR", default_value = ".", global = true)]
    workdir: PathBuf,
}

#[derive(Args)]
struct PublishArgs {
    /// GitHub token used for the releases API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Target repository as owner/repo
    #[arg(long, env = "GITHUB_REPOSITORY", global = true)]
    repository: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    /// Wall-clock limit per version in seconds, 0 to disable
    #[arg(long, default_value_t = DEFAULT_VERSION_TIMEOUT_SECS, global = true)]
    version_timeout_secs: u64,

    /// Write the run report as JSON to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and publish every matching tag (default)
    Run,

    /// List the tags matching the pattern
    List,

    /// Show the patches selected for a tag
    Patches {
        /// Version tag, e.g. OTP-22.3.4
        tag: String,

        /// Operating system name (default: detected via uname)
        #[arg(long)]
        os: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&cli.source, cli.publish).await,
        Commands::List => cmd_list(&cli.source).await,
        Commands::Patches { tag, os } => cmd_patches(&tag, os.as_deref()).await,
    }
}

async fn cmd_run(source: &SourceArgs, publish: PublishArgs) -> Result<()> {
    let settings = Settings::resolve(RawSettings {
        token: publish.token,
        repository: publish.repository,
        pattern: Some(source.pattern.clone()),
        workdir: Some(source.workdir.clone()),
        api_url: Some(publish.api_url),
        version_timeout_secs: Some(publish.version_timeout_secs),
        report_path: publish.report,
    })
    .context("Invalid configuration")?;

    let platform = Platform::detect()
        .await
        .context("Failed to detect host platform")?;
    info!(settings = ?settings, platform = %platform, "Resolved configuration");

    let registry = GitHubReleaseRegistry::new(
        GitHubConfig::new(&settings.token).with_api_url(&settings.api_url),
    )
    .context("Failed to build GitHub client")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let orchestrator = Orchestrator::new(
        Arc::new(SystemGit::new(&settings.workdir)),
        Arc::new(OtpToolchain::new(&settings.workdir)),
        registry,
        settings.repository.clone(),
        platform,
    )
    .with_version_timeout(settings.version_timeout)
    .with_cancellation(cancel);

    let report = orchestrator
        .run(&settings.pattern)
        .await
        .context("Failed to enumerate version tags")?;

    print_summary(&report);
    if let Some(path) = &settings.report_path {
        write_report(&report, path)?;
    }
    Ok(())
}

async fn cmd_list(source: &SourceArgs) -> Result<()> {
    let git = SystemGit::new(&source.workdir);
    let tags = list_versions(&git, &source.pattern)
        .await
        .context("Failed to list version tags")?;
    for tag in tags {
        println!("{tag}");
    }
    Ok(())
}

async fn cmd_patches(tag: &str, os: Option<&str>) -> Result<()> {
    let platform = match os {
        Some(name) => Platform::new(name, ""),
        None => Platform::detect()
            .await
            .context("Failed to detect host platform")?,
    };
    let triple = SemanticTriple::parse(tag);
    let selected = select_patches(platform.family(), &triple);

    println!("{tag} ({triple}) on {:?}:", platform.family());
    if selected.is_empty() {
        println!("  (no patches)");
    }
    for rule in selected {
        println!("  {}", rule.name);
    }
    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining versions");
            cancel.cancel();
        }
    });
}

fn print_summary(report: &RunReport) {
    for version in &report.versions {
        let status = match &version.outcome {
            Outcome::Published { asset, .. } => format!("published {asset}"),
            Outcome::Skipped { asset, .. } => format!("skipped ({asset} exists)"),
            Outcome::Failed { kind, detail } => format!("failed [{kind}] {detail}"),
            Outcome::Cancelled => "cancelled".to_string(),
        };
        println!("{:<16} {status}", version.tag);
    }
    println!(
        "published: {}, skipped: {}, failed: {}, cancelled: {}",
        report.published_count(),
        report.skipped_count(),
        report.failed_count(),
        report.cancelled_count()
    );
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    report
        .write_json(path)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    info!(path = %path.display(), "Wrote run report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_defaults_to_run() {
        let cli = Cli::try_parse_from(["otp-builds", "--repository", "erlef/otp-builds"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.publish.repository.as_deref(), Some("erlef/otp-builds"));
        assert_eq!(
            cli.publish.version_timeout_secs,
            DEFAULT_VERSION_TIMEOUT_SECS
        );
    }

    #[test]
    fn patches_takes_tag_and_os() {
        let cli =
            Cli::try_parse_from(["otp-builds", "patches", "OTP-22.3.0", "--os", "Darwin"]).unwrap();
        match cli.command {
            Some(Commands::Patches { tag, os }) => {
                assert_eq!(tag, "OTP-22.3.0");
                assert_eq!(os.as_deref(), Some("Darwin"));
            }
            _ => panic!("expected patches command"),
        }
    }

    #[tokio::test]
    async fn run_without_token_fails_before_touching_anything() {
        let source = SourceArgs {
            pattern: DEFAULT_TAG_PATTERN.to_string(),
            workdir: PathBuf::from("/nonexistent/otp"),
        };
        let publish = PublishArgs {
            token: None,
            repository: Some("erlef/otp-builds".to_string()),
            api_url: DEFAULT_API_URL.to_string(),
            version_timeout_secs: 0,
            report: None,
        };
        let err = cmd_run(&source, publish).await.unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }
}
