//! Integration tests for the orchestrator with in-memory collaborators.

use std::sync::Arc;

use otp_builds_core::fakes::FakeCheckout;
use otp_builds_core::{ErrorKind, Orchestrator, Outcome, Platform};
use otp_builds_registry::fakes::MemoryReleaseRegistry;
use otp_builds_registry::{ReleaseRegistry, Repository};
use sha2::{Digest, Sha256};

const ARCHIVE: &str = "darwin-19.6.0.tar.gz";
const SIDECAR: &str = "darwin-19.6.0.sha256";

fn repo() -> Repository {
    Repository::new("erlef", "otp-builds")
}

fn orchestrator(
    checkout: &Arc<FakeCheckout>,
    registry: &Arc<MemoryReleaseRegistry>,
) -> Orchestrator<Arc<MemoryReleaseRegistry>> {
    Orchestrator::new(
        checkout.clone(),
        checkout.clone(),
        registry.clone(),
        repo(),
        Platform::new("Darwin", "19.6.0"),
    )
}

/// Test: V1's build fails, V2 is still built and published
#[tokio::test]
async fn test_failed_version_does_not_affect_next() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = Arc::new(
        FakeCheckout::new(dir.path(), &["OTP-22.3.1", "OTP-23.0"]).fail_build_for("OTP-22.3.1"),
    );
    let registry = Arc::new(MemoryReleaseRegistry::new());

    let report = orchestrator(&checkout, &registry)
        .run("OTP-*")
        .await
        .expect("enumeration failed");

    assert_eq!(report.versions.len(), 2);
    assert!(matches!(
        report.outcome_of("OTP-22.3.1"),
        Some(Outcome::Failed { kind: ErrorKind::Build, .. })
    ));
    assert!(matches!(
        report.outcome_of("OTP-23.0"),
        Some(Outcome::Published { .. })
    ));

    let v2 = registry.release_for(&repo(), "OTP-23.0").expect("no release");
    assert!(registry.asset_bytes(v2.id, ARCHIVE).is_some());
    assert!(registry.asset_bytes(v2.id, SIDECAR).is_some());

    // The failed version got its release resolved but nothing uploaded.
    let v1 = registry.release_for(&repo(), "OTP-22.3.1").expect("no release");
    assert!(registry.asset_bytes(v1.id, ARCHIVE).is_none());
}

/// Test: uploaded sidecar matches the digest of the uploaded archive
#[tokio::test]
async fn test_uploaded_checksum_matches_archive() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-23.0"]));
    let registry = Arc::new(MemoryReleaseRegistry::new());

    orchestrator(&checkout, &registry).run("OTP-*").await.unwrap();

    let release = registry.release_for(&repo(), "OTP-23.0").unwrap();
    let archive = registry.asset_bytes(release.id, ARCHIVE).unwrap();
    let sidecar = registry.asset_bytes(release.id, SIDECAR).unwrap();
    assert!(!archive.is_empty());
    assert_eq!(
        String::from_utf8(sidecar).unwrap(),
        hex::encode(Sha256::digest(&archive))
    );
}

/// Test: an asset with the platform name already present means no build
#[tokio::test]
async fn test_existing_asset_skips_build() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-23.0"]));
    let registry = Arc::new(MemoryReleaseRegistry::new());
    let release = registry
        .create_release(&repo(), "OTP-23.0")
        .await
        .unwrap()
        .id;
    registry.seed_asset(release, ARCHIVE, b"previous build");

    let report = orchestrator(&checkout, &registry).run("OTP-*").await.unwrap();

    assert!(matches!(
        report.outcome_of("OTP-23.0"),
        Some(Outcome::Skipped { .. })
    ));
    assert!(checkout.calls().is_empty(), "no build stage should run");
    assert_eq!(registry.upload_calls(), 0);
    assert_eq!(
        registry.asset_bytes(release, ARCHIVE).unwrap(),
        b"previous build".to_vec()
    );
}

/// Test: a second run reuses releases and skips everything
#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-22.3", "OTP-23.0"]));
    let registry = Arc::new(MemoryReleaseRegistry::new());

    let first = orchestrator(&checkout, &registry).run("OTP-*").await.unwrap();
    assert_eq!(first.published_count(), 2);
    let ids: Vec<u64> = ["OTP-22.3", "OTP-23.0"]
        .iter()
        .map(|t| registry.release_for(&repo(), t).unwrap().id)
        .collect();

    let second = orchestrator(&checkout, &registry).run("OTP-*").await.unwrap();
    assert_eq!(second.skipped_count(), 2);
    assert_eq!(second.published_count(), 0);
    assert_eq!(registry.create_calls(), 2);
    assert_eq!(registry.upload_calls(), 4);
    for (tag, id) in ["OTP-22.3", "OTP-23.0"].iter().zip(ids) {
        assert_eq!(registry.release_for(&repo(), tag).unwrap().id, id);
    }
}

/// Test: checkout failure and registry 500 are each isolated to their version
#[tokio::test]
async fn test_vcs_and_registry_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = Arc::new(
        FakeCheckout::new(dir.path(), &["OTP-21.3", "OTP-22.0", "OTP-23.0"])
            .fail_checkout_for("OTP-21.3"),
    );
    let registry = Arc::new(MemoryReleaseRegistry::new());
    registry.fail_lookups_for("OTP-22.0");

    let report = orchestrator(&checkout, &registry).run("OTP-*").await.unwrap();

    assert!(matches!(
        report.outcome_of("OTP-21.3"),
        Some(Outcome::Failed { kind: ErrorKind::Vcs, .. })
    ));
    assert!(matches!(
        report.outcome_of("OTP-22.0"),
        Some(Outcome::Failed { kind: ErrorKind::Registry, .. })
    ));
    assert!(matches!(
        report.outcome_of("OTP-23.0"),
        Some(Outcome::Published { .. })
    ));
    assert_eq!(report.failed_count(), 2);
    assert!(registry.release_for(&repo(), "OTP-21.3").is_none());
}

/// Test: darwin patches for the version are applied before bootstrap
#[tokio::test]
async fn test_darwin_patches_precede_build() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = Arc::new(FakeCheckout::new(dir.path(), &["OTP-22.3.0"]));
    let registry = Arc::new(MemoryReleaseRegistry::new());

    orchestrator(&checkout, &registry).run("OTP-*").await.unwrap();

    let calls = checkout.calls();
    assert_eq!(
        &calls[..2],
        &[
            "patch darwin-catalina-no-weak-imports".to_string(),
            "bootstrap".to_string(),
        ]
    );
    assert!(calls.contains(&"locate_ssl".to_string()));
}
