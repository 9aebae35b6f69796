//! otp-builds-registry: release registry client for otp-builds
//!
//! This crate owns everything that talks to the remote release registry.
//!
//! ## Key Components
//!
//! - `ReleaseRegistry`: backend-agnostic trait (lookup, create, list, upload)
//! - `GitHubReleaseRegistry`: GitHub REST implementation over `reqwest`
//! - `fakes::MemoryReleaseRegistry`: in-memory implementation for tests

mod error;
pub mod fakes;
pub mod github;
pub mod registry_traits;

pub use error::RegistryError;
pub use github::{expand_upload_url, GitHubConfig, GitHubReleaseRegistry, DEFAULT_API_URL};
pub use registry_traits::{
    AssetRecord, ReleaseRecord, ReleaseRegistry, RegistryResult, Repository, ASSET_CONTENT_TYPE,
};
