//! Release registry abstractions
//!
//! The registry holds two kinds of records:
//! - `ReleaseRecord`: one per (owner, repo, tag), carries the upload endpoint
//! - `AssetRecord`: a named file attached to a release
//!
//! Both live remotely and outlive the process. The client only reads or
//! creates them; nothing is ever edited in place. In-memory fakes live in the
//! `fakes` module.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Content type sent with every asset upload.
pub const ASSET_CONTENT_TYPE: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Repository identity
// ---------------------------------------------------------------------------

/// Target repository, parsed from `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for Repository {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, name) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| RegistryError::InvalidRepository(s.to_string()))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(RegistryError::InvalidRepository(s.to_string()));
        }
        Ok(Repository::new(owner, name))
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A release as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: u64,
    /// Upload endpoint, possibly an RFC 6570 template (`...assets{?name,label}`)
    pub upload_url: String,
}

/// A file attached to a release. Unique per release by `name` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: u64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// ReleaseRegistry
// ---------------------------------------------------------------------------

/// Remote release registry.
///
/// Guarantees:
/// - `find_release` maps "no such tag" to `Ok(None)`; any other failure is an error.
/// - `create_release` never edits an existing release.
/// - `list_assets` returns every asset of the release, across all pages.
/// - `upload_asset` sends the file with an explicit length and
///   [`ASSET_CONTENT_TYPE`]; it is never retried.
#[async_trait]
pub trait ReleaseRegistry: Send + Sync {
    /// Look up the release for a tag.
    async fn find_release(
        &self,
        repo: &Repository,
        tag: &str,
    ) -> RegistryResult<Option<ReleaseRecord>>;

    /// Create a release for a tag.
    async fn create_release(&self, repo: &Repository, tag: &str) -> RegistryResult<ReleaseRecord>;

    /// List all assets attached to a release.
    async fn list_assets(
        &self,
        repo: &Repository,
        release_id: u64,
    ) -> RegistryResult<Vec<AssetRecord>>;

    /// Upload a local file as an asset named `name`.
    async fn upload_asset(
        &self,
        upload_url: &str,
        name: &str,
        path: &Path,
    ) -> RegistryResult<AssetRecord>;
}

#[async_trait]
impl<R> ReleaseRegistry for std::sync::Arc<R>
where
    R: ReleaseRegistry + ?Sized,
{
    async fn find_release(
        &self,
        repo: &Repository,
        tag: &str,
    ) -> RegistryResult<Option<ReleaseRecord>> {
        (**self).find_release(repo, tag).await
    }

    async fn create_release(&self, repo: &Repository, tag: &str) -> RegistryResult<ReleaseRecord> {
        (**self).create_release(repo, tag).await
    }

    async fn list_assets(
        &self,
        repo: &Repository,
        release_id: u64,
    ) -> RegistryResult<Vec<AssetRecord>> {
        (**self).list_assets(repo, release_id).await
    }

    async fn upload_asset(
        &self,
        upload_url: &str,
        name: &str,
        path: &Path,
    ) -> RegistryResult<AssetRecord> {
        (**self).upload_asset(upload_url, name, path).await
    }
}
