//! otp-builds core: builds Erlang/OTP release archives per version tag and
//! publishes them to a release registry.
//!
//! Provides:
//! - Version enumeration and a declarative patch table
//! - A staged build driver over `git` and the OTP build scripts
//! - Archive and checksum packaging
//! - A sequential orchestrator that isolates per-version failures

pub mod build_driver;
pub mod config;
pub mod error;
pub mod fakes;
pub mod patches;
pub mod pipeline;
pub mod platform;
pub mod publish;
pub mod release_registry;
pub mod report;
pub mod stage;
pub mod telemetry;
pub mod toolchain;
pub mod vcs;
pub mod version;

// Re-export key types
pub use build_driver::{BuildConfiguration, BuildDriver, SslSource};
pub use config::{RawSettings, Settings, DEFAULT_VERSION_TIMEOUT_SECS};
pub use error::{ErrorKind, PipelineError, Result};
pub use patches::{select_patches, PatchRule, PATCH_RULES};
pub use pipeline::Orchestrator;
pub use platform::{OsFamily, Platform};
pub use publish::{archive, checksum, PublishResult};
pub use release_registry::ReleaseRegistryApi;
pub use report::{Outcome, RunReport, VersionReport};
pub use stage::{StageCommand, StageOutput, StageRunner};
pub use telemetry::init_tracing;
pub use toolchain::{OtpToolchain, Toolchain};
pub use vcs::{SystemGit, VersionControl};
pub use version::{list_versions, SemanticTriple, DEFAULT_TAG_PATTERN};
