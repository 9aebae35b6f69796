//! Error types for otp-builds-registry

use thiserror::Error;

/// Errors that can occur while talking to a release registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Transport-level failure (DNS, TLS, connection reset, ...)
    #[error("registry request failed: {0}")]
    Http(String),

    /// The registry answered with a status the operation does not accept
    #[error("unexpected registry response {status} for {url}: {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// Response body could not be decoded
    #[error("malformed registry response: {0}")]
    Decode(String),

    /// Repository identity is not of the form `owner/repo`
    #[error("invalid repository identity: {0}")]
    InvalidRepository(String),

    /// Upload endpoint could not be turned into a request URL
    #[error("invalid upload url: {0}")]
    InvalidUploadUrl(String),

    /// Release id unknown to the registry
    #[error("release not found: {0}")]
    ReleaseNotFound(u64),

    /// Local file could not be read for upload
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Decode(err.to_string())
        } else {
            RegistryError::Http(err.to_string())
        }
    }
}
