use crate::error::ChainbakError;
use crate::Result;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Name of the metadata artifact, both inside snapshots and at the backup root
pub const METADATA_FILE: &str = ".backupcache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One filesystem node below a walked root
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the walked root, never empty
    pub rel_path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub permissions: fs::Permissions,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    #[cfg(unix)]
    pub fn mode(&self) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        self.permissions.mode()
    }

    /// Location of this entry below another root
    pub fn path_under(&self, root: &Path) -> PathBuf {
        root.join(&self.rel_path)
    }

    fn from_walk_entry(root: &Path, entry: &walkdir::DirEntry) -> Result<Option<Self>> {
        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            warn!("Skipping special file {}", entry.path().display());
            return Ok(None);
        };

        let metadata = entry
            .metadata()
            .map_err(|e| walk_error(e, entry.path()))?;

        Ok(Some(FileEntry {
            rel_path: relativize(root, entry.path())?,
            kind,
            size: metadata.len(),
            modified: metadata.modified().map_err(ChainbakError::at(entry.path()))?,
            permissions: metadata.permissions(),
        }))
    }
}

/// Lazy walk over every node strictly below a root, parents before children.
///
/// Siblings are visited in file-name order. The top-level metadata artifact is
/// never yielded. After the first error the caller is expected to stop.
pub struct Walk {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

pub fn walk(root: &Path, follow_symlinks: bool) -> Walk {
    Walk {
        root: root.to_path_buf(),
        inner: WalkDir::new(root)
            .min_depth(1)
            .follow_links(follow_symlinks)
            .sort_by_file_name()
            .into_iter(),
    }
}

impl Iterator for Walk {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(&self.root).to_path_buf();
                    return Some(Err(walk_error(e, &path)));
                }
            };

            if entry.depth() == 1 && entry.file_name() == METADATA_FILE {
                debug!("Skipping reserved {}", entry.path().display());
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            match FileEntry::from_walk_entry(&self.root, &entry) {
                Ok(Some(file_entry)) => return Some(Ok(file_entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn walk_error(error: walkdir::Error, path: &Path) -> ChainbakError {
    if error.loop_ancestor().is_some() {
        return ChainbakError::SymlinkLoop {
            path: path.to_path_buf(),
        };
    }
    match error.into_io_error() {
        Some(source) => ChainbakError::FileIo {
            path: path.to_path_buf(),
            source,
        },
        None => ChainbakError::SymlinkLoop {
            path: path.to_path_buf(),
        },
    }
}

/// Complete index of a tree, keyed by relative path, in walk order
#[derive(Debug, Default)]
pub struct PathIndex {
    entries: Vec<FileEntry>,
    by_path: HashMap<PathBuf, usize>,
}

impl PathIndex {
    /// Walk `root` to completion; any failure discards the partial index
    pub fn build(root: &Path, follow_symlinks: bool) -> Result<Self> {
        let mut index = PathIndex::default();
        for entry in walk(root, follow_symlinks) {
            index.insert(entry?);
        }
        debug!("Indexed {} entries under {}", index.len(), root.display());
        Ok(index)
    }

    fn insert(&mut self, entry: FileEntry) {
        self.by_path
            .insert(entry.rel_path.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn get(&self, rel_path: &Path) -> Option<&FileEntry> {
        self.by_path.get(rel_path).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, rel_path: &Path) -> bool {
        self.by_path.contains_key(rel_path)
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail unless every path can be written to a chain record
    pub fn ensure_recordable(&self) -> Result<()> {
        for entry in &self.entries {
            encode_rel_path(&entry.rel_path)?;
        }
        Ok(())
    }

    /// Sum of the sizes of all regular files
    pub fn total_file_size(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::File)
            .map(|e| e.size)
            .sum()
    }
}

impl<'a> IntoIterator for &'a PathIndex {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Express `path` relative to `root`, which must be one of its strict ancestors
pub fn relativize(root: &Path, path: &Path) -> Result<PathBuf> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ChainbakError::PathTraversal {
            path: path.to_path_buf(),
        })?;
    if rel.as_os_str().is_empty() || !is_plain_relative(rel) {
        return Err(ChainbakError::PathTraversal {
            path: path.to_path_buf(),
        });
    }
    Ok(rel.to_path_buf())
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Encode a relative path as a record line: `/`-joined, with a leading `/`.
///
/// Names are written byte for byte. A newline inside a name would split the
/// line, so such paths are refused.
pub fn encode_rel_path(rel_path: &Path) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    for component in rel_path.components() {
        let Component::Normal(part) = component else {
            return Err(ChainbakError::PathTraversal {
                path: rel_path.to_path_buf(),
            });
        };
        let bytes = component_bytes(part).ok_or_else(|| ChainbakError::NonUtf8Path {
            path: rel_path.to_path_buf(),
        })?;
        if bytes.contains(&b'\n') {
            return Err(ChainbakError::UnrecordablePath {
                path: rel_path.to_path_buf(),
            });
        }
        encoded.push(b'/');
        encoded.extend_from_slice(bytes);
    }
    if encoded.is_empty() {
        return Err(ChainbakError::PathTraversal {
            path: rel_path.to_path_buf(),
        });
    }
    Ok(encoded)
}

/// Decode a record line produced by [`encode_rel_path`]
pub fn decode_rel_path(line: &[u8]) -> Option<PathBuf> {
    let body = line.strip_prefix(b"/")?;
    let mut path = PathBuf::new();
    for part in body.split(|&b| b == b'/') {
        if part.is_empty() || part == b"." || part == b".." {
            return None;
        }
        path.push(component_from_bytes(part)?);
    }
    if !is_plain_relative(&path) {
        return None;
    }
    Some(path)
}

#[cfg(unix)]
fn component_bytes(part: &OsStr) -> Option<&[u8]> {
    use std::os::unix::ffi::OsStrExt;
    Some(part.as_bytes())
}

#[cfg(not(unix))]
fn component_bytes(part: &OsStr) -> Option<&[u8]> {
    part.to_str().map(str::as_bytes)
}

#[cfg(unix)]
fn component_from_bytes(bytes: &[u8]) -> Option<&OsStr> {
    use std::os::unix::ffi::OsStrExt;
    Some(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn component_from_bytes(bytes: &[u8]) -> Option<&OsStr> {
    std::str::from_utf8(bytes).ok().map(OsStr::new)
}
