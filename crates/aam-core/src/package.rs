//! Package codec: the content-addressed `.aam` archive.
//!
//! An archive is a gzip-compressed tar of the package root. Packing is
//! deterministic (sorted entries, zeroed timestamps and owners) so the same
//! tree always yields the same digest.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use aam_schema::{MANIFEST_FILE, Sha256Digest};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::manifest::Manifest;

/// Extension of the detached checksum file written next to an archive.
pub const CHECKSUM_EXTENSION: &str = "sha256";

/// Directory names never packed.
const EXCLUDED_DIRS: &[&str] = &[".git", ".aam"];

/// An immutable archive together with the digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArchive {
    bytes: Vec<u8>,
    digest: Sha256Digest,
}

impl PackageArchive {
    /// Wrap freshly built bytes, computing their digest.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let digest = Sha256Digest::compute(&bytes);
        Self { bytes, digest }
    }

    /// Wrap bytes that are expected to hash to `expected`.
    ///
    /// `subject` names the archive in the error (`name@version`).
    pub fn verified(bytes: Vec<u8>, expected: &Sha256Digest, subject: &str) -> Result<Self> {
        let archive = Self::from_bytes(bytes);
        archive.verify(expected, subject)?;
        Ok(archive)
    }

    /// Read an archive file and verify it against `expected`.
    pub fn read_verified(path: &Path, expected: &Sha256Digest, subject: &str) -> Result<Self> {
        let bytes = fs::read(path).at(path)?;
        Self::verified(bytes, expected, subject)
    }

    /// Pack the package rooted at `root` after validating its manifest.
    pub fn pack(root: &Path) -> Result<(Manifest, Self)> {
        let manifest = Manifest::load(root)?;
        manifest.validate(root)?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let entries = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && e.file_name()
                            .to_str()
                            .is_some_and(|n| EXCLUDED_DIRS.contains(&n)))
            });

        for entry in entries {
            let entry = entry.map_err(|e| Error::Archive(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::Archive(e.to_string()))?;
            let data = fs::read(entry.path()).at(entry.path())?;

            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, archive_path(rel), data.as_slice())
                .map_err(|e| Error::Archive(format!("{}: {e}", rel.display())))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::Archive(e.to_string()))?;
        let bytes = encoder.finish().map_err(|e| Error::Archive(e.to_string()))?;

        let archive = Self::from_bytes(bytes);
        tracing::debug!(
            package = %manifest.name,
            version = %manifest.version,
            digest = archive.digest.short(),
            size = archive.bytes.len(),
            "Packed archive"
        );
        Ok((manifest, archive))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> &Sha256Digest {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Recompute the digest and compare it with `expected`.
    pub fn verify(&self, expected: &Sha256Digest, subject: &str) -> Result<()> {
        let actual = Sha256Digest::compute(&self.bytes);
        if &actual == expected {
            Ok(())
        } else {
            Err(Error::ChecksumMismatch {
                subject: subject.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Parse the manifest stored in the archive.
    pub fn manifest(&self) -> Result<Manifest> {
        let mut archive = tar::Archive::new(GzDecoder::new(self.bytes.as_slice()));
        let entries = archive
            .entries()
            .map_err(|e| Error::Archive(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::Archive(e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| Error::Archive(e.to_string()))?
                .into_owned();
            if path == Path::new(MANIFEST_FILE) {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .map_err(|e| Error::Archive(e.to_string()))?;
                return Manifest::parse(&content, &path);
            }
        }
        Err(Error::Archive(format!("{MANIFEST_FILE} missing from archive")))
    }

    /// Extract into `dest`, returning the relative paths written (sorted).
    ///
    /// Only regular files and directories are accepted. Links, devices and
    /// entries that would escape `dest` abort the extraction.
    pub fn unpack(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dest).at(dest)?;
        let mut archive = tar::Archive::new(GzDecoder::new(self.bytes.as_slice()));
        let mut written = Vec::new();

        let entries = archive
            .entries()
            .map_err(|e| Error::Archive(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::Archive(e.to_string()))?;
            let kind = entry.header().entry_type();
            if kind.is_dir() || kind.is_pax_global_extensions() {
                continue;
            }
            let relative_path: PathBuf = entry
                .path()
                .map_err(|e| Error::Archive(e.to_string()))?
                .components()
                .collect();

            if relative_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                return Err(Error::Archive(format!(
                    "Invalid path in archive: {}",
                    relative_path.display()
                )));
            }

            if !kind.is_file() {
                return Err(Error::Archive(format!(
                    "Unsupported entry type {kind:?} in archive: {}",
                    relative_path.display()
                )));
            }

            let absolute_path = dest.join(&relative_path);
            if let Some(parent) = absolute_path.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            if !entry.unpack_in(dest).at(&absolute_path)? {
                return Err(Error::Archive(format!(
                    "Invalid path in archive: {}",
                    relative_path.display()
                )));
            }
            written.push(relative_path);
        }

        written.sort();
        Ok(written)
    }

    /// Write the archive and its detached checksum file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let mut file = File::create(path).at(path)?;
        file.write_all(&self.bytes).at(path)?;
        file.sync_all().at(path)?;

        let checksum_path = checksum_path(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::write(&checksum_path, format!("{}  {file_name}\n", self.digest))
            .at(&checksum_path)?;
        Ok(())
    }
}

/// Path of the detached checksum for an archive (`<archive>.sha256`).
pub fn checksum_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".");
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// `/`-separated form of a relative path, used inside archives and lock files.
pub fn archive_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
