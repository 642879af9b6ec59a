use crate::config::Config;
use crate::error::ChainbakError;
use crate::index::{EntryKind, FileEntry};
use crate::Result;
use filetime::FileTime;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// What a single copy step produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Copied {
    File(u64),
    Dir,
    Symlink,
}

/// Copy one walked entry from `source_root` to the same relative path under
/// `dest_root`, creating missing parents. Directory modes and times are queued
/// on `pending` instead of being applied right away.
pub fn copy_entry(
    entry: &FileEntry,
    source_root: &Path,
    dest_root: &Path,
    config: &Config,
    pending: &mut PendingDirs,
) -> Result<Copied> {
    let source = entry.path_under(source_root);
    let dest = entry.path_under(dest_root);

    prepare_destination(&dest, entry.kind)?;
    ensure_parent(&dest)?;

    let copied = match entry.kind {
        EntryKind::Dir => {
            fs::create_dir_all(&dest).map_err(ChainbakError::at(&dest))?;
            pending.push(&dest, entry);
            Copied::Dir
        }
        EntryKind::File => {
            let bytes = copy_file_contents(&source, &dest)?;
            apply_metadata(&dest, entry, config)?;
            Copied::File(bytes)
        }
        EntryKind::Symlink => {
            copy_symlink(&source, &dest)?;
            Copied::Symlink
        }
    };

    debug!("Copied {} -> {}", source.display(), dest.display());
    Ok(copied)
}

/// Copy file bytes, truncating any existing destination
fn copy_file_contents(source: &Path, dest: &Path) -> Result<u64> {
    let mut reader = File::open(source).map_err(ChainbakError::at(source))?;
    let mut writer = File::create(dest).map_err(ChainbakError::at(dest))?;
    io::copy(&mut reader, &mut writer).map_err(ChainbakError::at(dest))
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> Result<()> {
    let target = fs::read_link(source).map_err(ChainbakError::at(source))?;
    std::os::unix::fs::symlink(target, dest).map_err(ChainbakError::at(dest))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> Result<()> {
    // Without portable symlink creation, store what the link points to
    fs::copy(source, dest).map_err(ChainbakError::at(dest))?;
    Ok(())
}

/// Make room for an entry of `kind` at `dest`.
///
/// An existing directory stays when a directory is about to be created there;
/// anything else already at `dest` is removed.
fn prepare_destination(dest: &Path, kind: EntryKind) -> Result<()> {
    let existing = match fs::symlink_metadata(dest) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ChainbakError::at(dest)(e)),
    };

    if existing.is_dir() {
        if kind != EntryKind::Dir {
            fs::remove_dir_all(dest).map_err(ChainbakError::at(dest))?;
        }
    } else {
        fs::remove_file(dest).map_err(ChainbakError::at(dest))?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ChainbakError::at(parent))?;
        }
    }
    Ok(())
}

fn apply_metadata(dest: &Path, entry: &FileEntry, config: &Config) -> Result<()> {
    if config.preserve_permissions {
        fs::set_permissions(dest, entry.permissions.clone()).map_err(ChainbakError::at(dest))?;
    }
    if config.preserve_timestamps {
        set_mtime(dest, entry.modified)?;
    }
    Ok(())
}

fn set_mtime(path: &Path, modified: SystemTime) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::from_system_time(modified))
        .map_err(ChainbakError::at(path))
}

/// Directory metadata waiting until the directory contents are in place.
///
/// Applied deepest path first so that a read-only directory is locked only
/// after everything below it was written. Queuing the same path twice keeps
/// the later entry.
#[derive(Debug, Default)]
pub struct PendingDirs {
    dirs: BTreeMap<PathBuf, (fs::Permissions, SystemTime)>,
}

impl PendingDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dest: &Path, entry: &FileEntry) {
        self.dirs.insert(
            dest.to_path_buf(),
            (entry.permissions.clone(), entry.modified),
        );
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn apply(self, config: &Config) -> Result<()> {
        for (dest, (permissions, modified)) in self.dirs.into_iter().rev() {
            if config.preserve_timestamps {
                set_mtime(&dest, modified)?;
            }
            if config.preserve_permissions {
                fs::set_permissions(&dest, permissions).map_err(ChainbakError::at(&dest))?;
            }
        }
        Ok(())
    }
}

/// Remove `path` with everything in it and recreate it empty
pub fn clear_directory(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ChainbakError::at(path)(e)),
    }
    fs::create_dir_all(path).map_err(ChainbakError::at(path))
}

/// Absolute, symlink-free form of `path`, resolving only the existing prefix
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                return Ok(rest
                    .iter()
                    .rev()
                    .fold(canonical, |acc: PathBuf, part| acc.join(part)));
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    rest.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(absolute),
            },
        }
    }
}

/// Format byte size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    let unit = UNITS[unit_index];
    format!("{size:.1} {unit}")
}
