//! Artifact packaging: compressed archive plus SHA-256 sidecar.
//!
//! Both functions are blocking; the pipeline runs them on the blocking pool.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tar::Builder;

use crate::error::{PipelineError, Result};
use crate::platform::{ARCHIVE_EXTENSION, CHECKSUM_EXTENSION};

/// Files produced for one version, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub archive_path: PathBuf,
    pub checksum_path: PathBuf,
}

impl PublishResult {
    /// Asset name of the checksum sidecar.
    pub fn checksum_name(&self) -> String {
        file_name(&self.checksum_path)
    }

    /// Asset name of the archive.
    pub fn archive_name(&self) -> String {
        file_name(&self.archive_path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Archive the contents of the single top-level directory of
/// `build_output_root` into `<parent of root>/<asset_name>`.
///
/// Zero or several top-level directories is a packaging error.
pub fn archive(build_output_root: &Path, asset_name: &str) -> Result<PathBuf> {
    let source = single_subdirectory(build_output_root)?;
    let parent = build_output_root.parent().ok_or_else(|| {
        PipelineError::Packaging(format!(
            "build output root {} has no parent directory",
            build_output_root.display()
        ))
    })?;
    let archive_path = parent.join(asset_name);

    write_tar_gz(&source, &archive_path).map_err(|e| {
        PipelineError::Packaging(format!(
            "failed to write {}: {e}",
            archive_path.display()
        ))
    })?;

    tracing::info!(
        archive = %archive_path.display(),
        source = %source.display(),
        "Archived release tree"
    );
    Ok(archive_path)
}

fn single_subdirectory(root: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(root).map_err(|e| {
        PipelineError::Packaging(format!(
            "cannot read build output root {}: {e}",
            root.display()
        ))
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::Packaging(e.to_string()))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }

    match dirs.len() {
        1 => Ok(dirs.remove(0)),
        n => Err(PipelineError::Packaging(format!(
            "expected exactly one directory in {}, found {n}",
            root.display()
        ))),
    }
}

fn write_tar_gz(source: &Path, destination: &Path) -> io::Result<()> {
    let file = File::create(destination)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source)?;

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Sidecar path for an archive: `darwin-19.6.0.tar.gz` -> `darwin-19.6.0.sha256`.
pub fn checksum_path_for(archive_path: &Path) -> PathBuf {
    let name = file_name(archive_path);
    let stem = name.strip_suffix(ARCHIVE_EXTENSION).unwrap_or_else(|| {
        archive_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name.as_str())
    });
    archive_path.with_file_name(format!("{stem}{CHECKSUM_EXTENSION}"))
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        PipelineError::Packaging(format!("cannot open {} for hashing: {e}", path.display()))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        PipelineError::Packaging(format!("failed to hash {}: {e}", path.display()))
    })?;
    Ok(hex::encode(hasher.finalize()))
}

/// Write the archive's digest to its sidecar and return the sidecar path.
pub fn checksum(archive_path: &Path) -> Result<PathBuf> {
    let digest = sha256_hex(archive_path)?;
    if digest.is_empty() {
        return Err(PipelineError::Packaging(format!(
            "empty digest for {}",
            archive_path.display()
        )));
    }
    let sidecar = checksum_path_for(archive_path);
    fs::write(&sidecar, digest.as_bytes()).map_err(|e| {
        PipelineError::Packaging(format!("cannot write {}: {e}", sidecar.display()))
    })?;
    Ok(sidecar)
}

/// Archive then checksum.
pub fn package(build_output_root: &Path, asset_name: &str) -> Result<PublishResult> {
    let archive_path = archive(build_output_root, asset_name)?;
    let checksum_path = checksum(&archive_path)?;
    Ok(PublishResult {
        archive_path,
        checksum_path,
    })
}
