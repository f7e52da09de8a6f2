//! Layer archive unpacking.
//!
//! Streams an uncompressed tar archive and reproduces its entries under a
//! destination directory. Every entry name is normalised before use and must
//! stay inside the destination: `..`, absolute names and names that would be
//! written through a symlink created by an earlier entry are rejected.
//!
//! Entry policies:
//!
//! | Kind        | Effect                                              |
//! |-------------|-----------------------------------------------------|
//! | Directory   | created with all missing ancestors                  |
//! | RegularFile | truncate-created, body copied, mode bits applied    |
//! | Symlink     | created as-is on Unix, skipped with a warning elsewhere |
//! | Other       | skipped with a warning and counted                  |
//!
//! Nothing is rolled back on failure: entries written before the error stay
//! on disk. Callers that need all-or-nothing semantics unpack into a staging
//! directory (see [`crate::cache::LayerStore`]).

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use layerdb_core::error::{LayerdbError, Result};
use tar::{Archive, EntryType};

/// Kind of an archive entry, as far as unpacking is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
    Other(EntryType),
}

impl From<EntryType> for EntryKind {
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Directory => EntryKind::Directory,
            EntryType::Regular | EntryType::Continuous => EntryKind::RegularFile,
            EntryType::Symlink => EntryKind::Symlink,
            other => EntryKind::Other(other),
        }
    }
}

/// Counts of what an unpack produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnpackSummary {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    /// Entries consumed without a filesystem effect
    pub skipped: u64,
}

/// Unpack an uncompressed tar stream into `dest`.
///
/// `dest` is created if missing. Returns on the first error, leaving any
/// already-written entries in place.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> Result<UnpackSummary> {
    fs::create_dir_all(dest).map_err(|e| {
        archive_error(
            "<archive>",
            format!("Failed to create destination {}: {}", dest.display(), e),
        )
    })?;

    let mut archive = Archive::new(reader);
    let mut summary = UnpackSummary::default();

    let entries = archive
        .entries()
        .map_err(|e| archive_error("<archive>", format!("Failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| archive_error("<header>", format!("Malformed entry header: {}", e)))?;

        let raw_name = entry
            .path()
            .map_err(|e| archive_error("<header>", format!("Invalid entry name: {}", e)))?
            .into_owned();
        let name = raw_name.display().to_string();

        let Some(relative) = normalize_entry_path(&raw_name)? else {
            // The archive root itself ("./") maps onto dest.
            continue;
        };
        reject_symlink_ancestors(dest, &relative, &name)?;
        let target = dest.join(&relative);

        match EntryKind::from(entry.header().entry_type()) {
            EntryKind::Directory => {
                remove_symlink(&target, &name)?;
                fs::create_dir_all(&target).map_err(|e| {
                    archive_error(
                        &name,
                        format!("Failed to create directory {}: {}", target.display(), e),
                    )
                })?;
                summary.directories += 1;
            }
            EntryKind::RegularFile => {
                write_file(&mut entry, &target, &name)?;
                summary.files += 1;
            }
            EntryKind::Symlink => {
                if write_symlink(&entry, &target, &name)? {
                    summary.symlinks += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            EntryKind::Other(entry_type) => {
                tracing::warn!(
                    entry = %name,
                    entry_type = ?entry_type,
                    "Skipping unsupported archive entry"
                );
                summary.skipped += 1;
            }
        }
    }

    tracing::debug!(
        dest = %dest.display(),
        directories = summary.directories,
        files = summary.files,
        symlinks = summary.symlinks,
        skipped = summary.skipped,
        "Unpacked layer archive"
    );

    Ok(summary)
}

/// Reduce an entry name to its normal components.
///
/// Returns `None` for names that denote the archive root.
fn normalize_entry_path(raw: &Path) -> Result<Option<PathBuf>> {
    let mut relative = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(LayerdbError::UnsafeEntryPath {
                    entry: raw.display().to_string(),
                })
            }
        }
    }

    if relative.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(relative))
    }
}

/// Fail if any existing parent of `relative` under `dest` is a symlink.
fn reject_symlink_ancestors(dest: &Path, relative: &Path, name: &str) -> Result<()> {
    let Some(parent) = relative.parent() else {
        return Ok(());
    };

    let mut current = dest.to_path_buf();
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(LayerdbError::UnsafeEntryPath {
                    entry: name.to_string(),
                })
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(archive_error(
                    name,
                    format!("Failed to inspect {}: {}", current.display(), e),
                ))
            }
        }
    }
    Ok(())
}

/// Remove `target` if it is a symlink, so it is replaced rather than followed.
fn remove_symlink(target: &Path, name: &str) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(target).map_err(|e| {
            archive_error(
                name,
                format!("Failed to replace symlink {}: {}", target.display(), e),
            )
        }),
        _ => Ok(()),
    }
}

fn create_parent(target: &Path, name: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            archive_error(
                name,
                format!("Failed to create directory {}: {}", parent.display(), e),
            )
        })?;
    }
    Ok(())
}

fn write_file<R: Read>(entry: &mut tar::Entry<'_, R>, target: &Path, name: &str) -> Result<()> {
    create_parent(target, name)?;
    remove_symlink(target, name)?;

    let mut file = File::create(target).map_err(|e| {
        archive_error(
            name,
            format!("Failed to create file {}: {}", target.display(), e),
        )
    })?;

    let expected = entry.size();
    let copied = io::copy(entry, &mut file).map_err(|e| {
        archive_error(
            name,
            format!("Failed to write file {}: {}", target.display(), e),
        )
    })?;
    if copied != expected {
        return Err(archive_error(
            name,
            format!("Truncated body: expected {} bytes, got {}", expected, copied),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(mode) = entry.header().mode() {
            fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o777)).map_err(
                |e| {
                    archive_error(
                        name,
                        format!("Failed to set permissions on {}: {}", target.display(), e),
                    )
                },
            )?;
        }
    }

    Ok(())
}

/// Returns `false` when the platform cannot represent the link.
fn write_symlink<R: Read>(entry: &tar::Entry<'_, R>, target: &Path, name: &str) -> Result<bool> {
    let link = entry
        .link_name()
        .map_err(|e| archive_error(name, format!("Invalid link name: {}", e)))?
        .ok_or_else(|| archive_error(name, "Symlink entry without link name"))?
        .into_owned();

    #[cfg(unix)]
    {
        create_parent(target, name)?;
        if let Ok(meta) = fs::symlink_metadata(target) {
            if !meta.is_dir() {
                fs::remove_file(target).map_err(|e| {
                    archive_error(
                        name,
                        format!("Failed to replace {}: {}", target.display(), e),
                    )
                })?;
            }
        }
        std::os::unix::fs::symlink(&link, target).map_err(|e| {
            archive_error(
                name,
                format!("Failed to create symlink {}: {}", target.display(), e),
            )
        })?;
        Ok(true)
    }

    #[cfg(not(unix))]
    {
        tracing::warn!(
            entry = %name,
            link = %link.display(),
            "Skipping symlink entry on this platform"
        );
        let _ = target;
        Ok(false)
    }
}

fn archive_error(entry: &str, message: impl Into<String>) -> LayerdbError {
    LayerdbError::ArchiveError {
        entry: entry.to_string(),
        message: message.into(),
    }
}
