use std::path::Path;

use otp_builds_registry::{AssetRecord, ReleaseRecord, ReleaseRegistry, Repository};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Thin API layer over a release registry backend.
///
/// Translates registry failures into pipeline error kinds and adds the
/// get-or-create and asset-lookup semantics the pipeline relies on.
pub struct ReleaseRegistryApi<R> {
    registry: R,
}

impl<R> ReleaseRegistryApi<R>
where
    R: ReleaseRegistry,
{
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Return the release for `tag`, creating it when none exists.
    ///
    /// Creates at most one release per call. Two concurrent callers for the
    /// same new tag can both reach the create; the second one fails with a
    /// registry error.
    pub async fn get_or_create_release(
        &self,
        repo: &Repository,
        tag: &str,
    ) -> Result<ReleaseRecord> {
        let existing = self
            .registry
            .find_release(repo, tag)
            .await
            .map_err(|e| PipelineError::Registry(e.to_string()))?;
        if let Some(release) = existing {
            debug!(tag, release_id = release.id, "Release exists");
            return Ok(release);
        }

        let created = self
            .registry
            .create_release(repo, tag)
            .await
            .map_err(|e| PipelineError::Registry(e.to_string()))?;
        info!(tag, release_id = created.id, "Created release");
        Ok(created)
    }

    /// Id of the asset named exactly `name`, if the release has one.
    pub async fn find_asset(
        &self,
        repo: &Repository,
        release_id: u64,
        name: &str,
    ) -> Result<Option<u64>> {
        let assets = self
            .registry
            .list_assets(repo, release_id)
            .await
            .map_err(|e| PipelineError::Registry(e.to_string()))?;
        Ok(assets.into_iter().find(|a| a.name == name).map(|a| a.id))
    }

    /// Upload one file. Not retried.
    pub async fn upload_asset(
        &self,
        upload_endpoint: &str,
        name: &str,
        path: &Path,
    ) -> Result<AssetRecord> {
        let asset = self
            .registry
            .upload_asset(upload_endpoint, name, path)
            .await
            .map_err(|e| PipelineError::Upload {
                asset: name.to_string(),
                detail: e.to_string(),
            })?;
        info!(asset = %asset.name, asset_id = asset.id, "Uploaded asset");
        Ok(asset)
    }
}
