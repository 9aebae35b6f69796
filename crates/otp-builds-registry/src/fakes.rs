//! In-memory fake for the release registry (testing only)
//!
//! `MemoryReleaseRegistry` satisfies the [`ReleaseRegistry`] contract without
//! any network access and counts calls so tests can assert on idempotence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::registry_traits::*;

#[derive(Debug, Clone)]
struct StoredAsset {
    record: AssetRecord,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    /// (repo, tag) -> release
    releases: HashMap<(String, String), ReleaseRecord>,
    /// release id -> assets in upload order
    assets: HashMap<u64, Vec<StoredAsset>>,
    /// tags whose lookup fails with an unexpected status
    broken_tags: Vec<String>,
    /// asset names whose upload fails
    failing_uploads: Vec<String>,
}

/// In-memory release registry.
#[derive(Debug, Default)]
pub struct MemoryReleaseRegistry {
    state: Mutex<State>,
    next_id: AtomicU64,
    creates: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryReleaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make release lookups for `tag` fail with HTTP 500.
    pub fn fail_lookups_for(&self, tag: &str) {
        self.state.lock().unwrap().broken_tags.push(tag.to_string());
    }

    /// Make uploads of an asset named `name` fail with HTTP 422.
    pub fn fail_uploads_named(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_uploads
            .push(name.to_string());
    }

    /// Number of `create_release` calls seen so far.
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful uploads seen so far.
    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Release currently stored for a tag, if any.
    pub fn release_for(&self, repo: &Repository, tag: &str) -> Option<ReleaseRecord> {
        let state = self.state.lock().unwrap();
        state
            .releases
            .get(&(repo.to_string(), tag.to_string()))
            .cloned()
    }

    /// Bytes of an uploaded asset.
    pub fn asset_bytes(&self, release_id: u64, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .assets
            .get(&release_id)?
            .iter()
            .find(|a| a.record.name == name)
            .map(|a| a.bytes.clone())
    }

    /// Attach an asset directly, bypassing upload.
    pub fn seed_asset(&self, release_id: u64, name: &str, bytes: &[u8]) -> AssetRecord {
        let record = AssetRecord {
            id: self.next_id(),
            name: name.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.assets.entry(release_id).or_default().push(StoredAsset {
            record: record.clone(),
            bytes: bytes.to_vec(),
        });
        record
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn upload_url_for(id: u64) -> String {
        format!("memory://releases/{id}/assets{{?name,label}}")
    }

    fn release_id_from_url(upload_url: &str) -> Option<u64> {
        upload_url
            .strip_prefix("memory://releases/")?
            .split('/')
            .next()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl ReleaseRegistry for MemoryReleaseRegistry {
    async fn find_release(
        &self,
        repo: &Repository,
        tag: &str,
    ) -> RegistryResult<Option<ReleaseRecord>> {
        let state = self.state.lock().unwrap();
        if state.broken_tags.iter().any(|t| t == tag) {
            return Err(RegistryError::UnexpectedStatus {
                status: 500,
                url: format!("memory://{repo}/releases/tags/{tag}"),
                body: "injected failure".to_string(),
            });
        }
        Ok(state
            .releases
            .get(&(repo.to_string(), tag.to_string()))
            .cloned())
    }

    async fn create_release(&self, repo: &Repository, tag: &str) -> RegistryResult<ReleaseRecord> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let key = (repo.to_string(), tag.to_string());
        let id = self.next_id();
        let mut state = self.state.lock().unwrap();
        if state.releases.contains_key(&key) {
            return Err(RegistryError::UnexpectedStatus {
                status: 422,
                url: format!("memory://{repo}/releases"),
                body: format!("release for {tag} already exists"),
            });
        }
        let record = ReleaseRecord {
            id,
            upload_url: Self::upload_url_for(id),
        };
        state.releases.insert(key, record.clone());
        Ok(record)
    }

    async fn list_assets(
        &self,
        _repo: &Repository,
        release_id: u64,
    ) -> RegistryResult<Vec<AssetRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .assets
            .get(&release_id)
            .map(|assets| assets.iter().map(|a| a.record.clone()).collect())
            .unwrap_or_default())
    }

    async fn upload_asset(
        &self,
        upload_url: &str,
        name: &str,
        path: &Path,
    ) -> RegistryResult<AssetRecord> {
        let release_id = Self::release_id_from_url(upload_url)
            .ok_or_else(|| RegistryError::InvalidUploadUrl(upload_url.to_string()))?;
        let bytes = tokio::fs::read(path).await?;

        {
            let state = self.state.lock().unwrap();
            if state.failing_uploads.iter().any(|n| n == name) {
                return Err(RegistryError::UnexpectedStatus {
                    status: 422,
                    url: upload_url.to_string(),
                    body: "injected upload failure".to_string(),
                });
            }
            if !state.releases.values().any(|r| r.id == release_id) {
                return Err(RegistryError::ReleaseNotFound(release_id));
            }
        }

        let record = self.seed_asset(release_id, name, &bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }
}
