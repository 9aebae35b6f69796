//! GitHub Releases backend
//!
//! Talks to the GitHub REST API (or a GitHub Enterprise instance via
//! `GITHUB_API_URL`). Uploads go to the per-release `upload_url` template
//! returned by the API, not to the API base.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::registry_traits::{
    AssetRecord, ReleaseRecord, ReleaseRegistry, RegistryResult, Repository, ASSET_CONTENT_TYPE,
};

/// Default public API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Page size used when listing assets (GitHub maximum).
const ASSETS_PER_PAGE: usize = 100;

/// GitHub API configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL, without trailing slash
    pub api_url: String,
    /// Token sent as a bearer credential
    pub token: String,
    /// User agent header (required by the API)
    pub user_agent: String,
}

impl GitHubConfig {
    /// Config for the public API with the given token
    pub fn new(token: &str) -> Self {
        GitHubConfig {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.to_string(),
            user_agent: format!("otp-builds/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Point at a different API base (GitHub Enterprise, test servers)
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct CreateReleaseBody<'a> {
    tag_name: &'a str,
    name: &'a str,
}

#[derive(Deserialize)]
struct ReleasePayload {
    id: u64,
    upload_url: String,
}

#[derive(Deserialize)]
struct AssetPayload {
    id: u64,
    name: String,
}

/// GitHub-backed implementation of [`ReleaseRegistry`].
#[derive(Clone)]
pub struct GitHubReleaseRegistry {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubReleaseRegistry {
    /// Create a new client. Fails if the token is not a valid header value
    /// or the HTTP client cannot be built.
    pub fn new(config: GitHubConfig) -> RegistryResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|e| RegistryError::Http(format!("invalid token header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(GitHubReleaseRegistry {
            config,
            http_client,
        })
    }

    fn repo_url(&self, repo: &Repository, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_url, repo.owner, repo.name, tail
        )
    }
}

#[async_trait]
impl ReleaseRegistry for GitHubReleaseRegistry {
    async fn find_release(
        &self,
        repo: &Repository,
        tag: &str,
    ) -> RegistryResult<Option<ReleaseRecord>> {
        let url = self.repo_url(repo, &format!("releases/tags/{tag}"));
        debug!(%url, "Looking up release by tag");

        let response = self.http_client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let payload: ReleasePayload = expect_success(response, &url).await?.json().await?;
        Ok(Some(ReleaseRecord {
            id: payload.id,
            upload_url: payload.upload_url,
        }))
    }

    async fn create_release(&self, repo: &Repository, tag: &str) -> RegistryResult<ReleaseRecord> {
        let url = self.repo_url(repo, "releases");
        info!(%tag, repo = %repo, "Creating release");

        let response = self
            .http_client
            .post(&url)
            .json(&CreateReleaseBody {
                tag_name: tag,
                name: tag,
            })
            .send()
            .await?;
        let payload: ReleasePayload = expect_success(response, &url).await?.json().await?;
        Ok(ReleaseRecord {
            id: payload.id,
            upload_url: payload.upload_url,
        })
    }

    async fn list_assets(
        &self,
        repo: &Repository,
        release_id: u64,
    ) -> RegistryResult<Vec<AssetRecord>> {
        let mut assets = Vec::new();
        let mut page = 1usize;

        loop {
            let url = self.repo_url(
                repo,
                &format!("releases/{release_id}/assets?per_page={ASSETS_PER_PAGE}&page={page}"),
            );
            let response = self.http_client.get(&url).send().await?;
            let batch: Vec<AssetPayload> = expect_success(response, &url).await?.json().await?;
            let done = batch.len() < ASSETS_PER_PAGE;
            assets.extend(batch.into_iter().map(|a| AssetRecord {
                id: a.id,
                name: a.name,
            }));
            if done {
                break;
            }
            page += 1;
        }

        Ok(assets)
    }

    async fn upload_asset(
        &self,
        upload_url: &str,
        name: &str,
        path: &Path,
    ) -> RegistryResult<AssetRecord> {
        let url = expand_upload_url(upload_url, name)?;
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        info!(asset = %name, bytes = length, "Uploading asset");

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http_client
            .post(url.clone())
            .header(CONTENT_TYPE, ASSET_CONTENT_TYPE)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;
        let payload: AssetPayload = expect_success(response, url.as_str())
            .await?
            .json()
            .await?;
        Ok(AssetRecord {
            id: payload.id,
            name: payload.name,
        })
    }
}

/// Turn a release `upload_url` template into a concrete upload URL for `name`.
///
/// GitHub returns `https://uploads.github.com/.../assets{?name,label}`; the
/// template suffix is dropped and `name` is added as a query parameter.
pub fn expand_upload_url(template: &str, name: &str) -> RegistryResult<Url> {
    let base = match template.find('{') {
        Some(idx) => &template[..idx],
        None => template,
    };
    let mut url =
        Url::parse(base).map_err(|e| RegistryError::InvalidUploadUrl(format!("{template}: {e}")))?;
    url.query_pairs_mut().append_pair("name", name);
    Ok(url)
}

async fn expect_success(
    response: reqwest::Response,
    url: &str,
) -> RegistryResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::UnexpectedStatus {
        status: status.as_u16(),
        url: url.to_string(),
        body,
    })
}
