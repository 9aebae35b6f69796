//! Version tags and their numeric decomposition.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vcs::VersionControl;

/// Default glob for OTP release tags.
pub const DEFAULT_TAG_PATTERN: &str = "OTP-*";

/// Prefixes stripped before splitting a tag on `.`.
const TAG_PREFIXES: [&str; 2] = ["OTP-", "OTP_"];

/// Numeric view of a version tag used by patch rules.
///
/// Components that are missing or not plain integers are `None`; every bound
/// comparison against `None` is false, so rules touching them never match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTriple {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub rest: Vec<Option<u64>>,
}

impl SemanticTriple {
    /// Parse a tag such as `OTP-22.3.4.1`.
    pub fn parse(tag: &str) -> Self {
        let version = TAG_PREFIXES
            .iter()
            .find_map(|p| tag.strip_prefix(p))
            .unwrap_or(tag);

        let mut parts = version.split('.').map(parse_component);
        let major = parts.next().flatten();
        let minor = parts.next().flatten();
        let rest = parts.collect();

        Self { major, minor, rest }
    }

    /// First trailing component (`rest[0]`), `None` when absent.
    pub fn patch(&self) -> Option<u64> {
        self.rest.first().copied().flatten()
    }
}

impl std::fmt::Display for SemanticTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |c: Option<u64>| c.map_or_else(|| "?".to_string(), |v| v.to_string());
        write!(f, "{}.{}", show(self.major), show(self.minor))?;
        for c in &self.rest {
            write!(f, ".{}", show(*c))?;
        }
        Ok(())
    }
}

fn parse_component(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// List the tags matching `pattern`, exactly as the version control
/// collaborator reports them: same order, no deduplication.
pub async fn list_versions(vcs: &dyn VersionControl, pattern: &str) -> Result<Vec<String>> {
    let tags = vcs.list_tags(pattern).await?;
    tracing::info!(pattern, count = tags.len(), "Enumerated version tags");
    Ok(tags)
}
