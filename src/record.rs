//! Chain metadata persisted in `.backupcache` files.
//!
//! Every snapshot directory holds a [`ChainRecord`]: the identity of the root
//! full backup on the first line, then one line per relative path that the
//! snapshot did not copy because it was unchanged. The backup root holds a
//! second artifact, managed through [`PointerStore`], naming the most recent
//! full backup.

use crate::error::ChainbakError;
use crate::index::{decode_rel_path, encode_rel_path, METADATA_FILE};
use crate::naming::SnapshotId;
use crate::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRecord {
    /// Root full backup of the chain this snapshot belongs to
    pub root: SnapshotId,
    /// Paths of the predecessor left out of this snapshot, in walk order
    pub unchanged: Vec<PathBuf>,
}

impl ChainRecord {
    /// Record of a full backup: it is its own root and omits nothing
    pub fn full(id: SnapshotId) -> Self {
        ChainRecord {
            root: id,
            unchanged: Vec::new(),
        }
    }

    pub fn incremental(root: SnapshotId, unchanged: Vec<PathBuf>) -> Self {
        ChainRecord { root, unchanged }
    }

    pub fn is_root(&self, id: &SnapshotId) -> bool {
        self.root == *id
    }

    /// Record bytes; fails if an unchanged path cannot be written as one line
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = self.root.to_string().into_bytes();
        for path in &self.unchanged {
            bytes.push(b'\n');
            bytes.extend_from_slice(&encode_rel_path(path)?);
        }
        Ok(bytes)
    }

    /// Parse record bytes; `origin` only names the artifact in errors.
    ///
    /// Whitespace around the identity is ignored. Path lines are taken
    /// verbatim, since a carriage return may belong to a file name.
    pub fn decode(bytes: &[u8], origin: &Path) -> Result<Self> {
        let mut lines = bytes.split(|&b| b == b'\n');

        let first = lines
            .next()
            .and_then(|l| std::str::from_utf8(l).ok())
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| ChainbakError::malformed(origin, "missing root identity"))?;
        let root = SnapshotId::parse(first).map_err(|e| ChainbakError::malformed(origin, e))?;

        let mut unchanged = Vec::new();
        for (number, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let path = decode_rel_path(line).ok_or_else(|| {
                ChainbakError::malformed(
                    origin,
                    format!(
                        "line {}: invalid path {:?}",
                        number + 2,
                        String::from_utf8_lossy(line)
                    ),
                )
            })?;
            unchanged.push(path);
        }

        Ok(ChainRecord { root, unchanged })
    }

    pub fn path_in(snapshot_dir: &Path) -> PathBuf {
        snapshot_dir.join(METADATA_FILE)
    }

    /// Read the record of a snapshot directory
    pub fn read_from(snapshot_dir: &Path) -> Result<Self> {
        let path = Self::path_in(snapshot_dir);
        let bytes = fs::read(&path).map_err(|source| ChainbakError::ChainUnavailable {
            path: path.clone(),
            source,
        })?;
        Self::decode(&bytes, &path)
    }

    pub fn write_to(&self, snapshot_dir: &Path) -> Result<()> {
        Self::write_encoded(snapshot_dir, &self.encode()?)
    }

    /// Write bytes already produced by [`ChainRecord::encode`]
    pub fn write_encoded(snapshot_dir: &Path, encoded: &[u8]) -> Result<()> {
        let path = Self::path_in(snapshot_dir);
        fs::write(&path, encoded).map_err(ChainbakError::at(&path))?;
        debug!("Wrote chain record {} ({} bytes)", path.display(), encoded.len());
        Ok(())
    }
}

/// Persisted pointer to the most recent full backup of a backup root
pub trait PointerStore {
    /// Fails with `ChainUnavailable` when no full backup was ever recorded
    fn load(&self) -> Result<SnapshotId>;

    fn save(&self, id: &SnapshotId) -> Result<()>;
}

/// The pointer kept as `<backup root>/.backupcache`
#[derive(Debug, Clone)]
pub struct RootPointer {
    path: PathBuf,
}

impl RootPointer {
    pub fn new(backup_root: &Path) -> Self {
        RootPointer {
            path: backup_root.join(METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PointerStore for RootPointer {
    fn load(&self) -> Result<SnapshotId> {
        let text = fs::read_to_string(&self.path).map_err(|source| {
            ChainbakError::ChainUnavailable {
                path: self.path.clone(),
                source,
            }
        })?;
        if text.trim().is_empty() {
            return Err(ChainbakError::ChainUnavailable {
                path: self.path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, "pointer file is empty"),
            });
        }
        SnapshotId::parse(&text).map_err(|e| ChainbakError::malformed(&self.path, e))
    }

    fn save(&self, id: &SnapshotId) -> Result<()> {
        fs::write(&self.path, id.to_string()).map_err(ChainbakError::at(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_id() -> SnapshotId {
        SnapshotId::parse("/2024-05-06_07-08-09").unwrap()
    }

    #[test]
    fn test_full_record_encoding() {
        let record = ChainRecord::full(sample_id());
        assert_eq!(record.encode().unwrap(), b"/2024-05-06_07-08-09");
        assert!(record.is_root(&sample_id()));
    }

    #[test]
    fn test_incremental_record_encoding() {
        let record = ChainRecord::incremental(
            sample_id(),
            vec![PathBuf::from("b"), Path::new("b").join("c.txt")],
        );
        assert_eq!(
            record.encode().unwrap(),
            b"/2024-05-06_07-08-09\n/b\n/b/c.txt"
        );
    }

    #[test]
    fn test_decode_incremental() {
        let origin = Path::new("/b/x/.backupcache");
        let record = ChainRecord::decode(b"/2024-05-06_07-08-09\n/b\n/b/c.txt", origin).unwrap();
        assert_eq!(record.root, sample_id());
        assert_eq!(
            record.unchanged,
            vec![PathBuf::from("b"), PathBuf::from("b/c.txt")]
        );
    }

    #[test]
    fn test_decode_tolerates_trailing_newline_and_crlf_identity() {
        let origin = Path::new(".backupcache");
        let record = ChainRecord::decode(b"/2024-05-06_07-08-09\r\n/a.txt\n", origin).unwrap();
        assert_eq!(record.root, sample_id());
        assert_eq!(record.unchanged, vec![PathBuf::from("a.txt")]);
    }

    #[test]
    fn test_carriage_return_in_name_survives() {
        let dir = tempdir().unwrap();
        let record = ChainRecord::incremental(
            sample_id(),
            vec![PathBuf::from("note\r"), Path::new("b").join("x\r.txt")],
        );

        record.write_to(dir.path()).unwrap();
        assert_eq!(
            fs::read(ChainRecord::path_in(dir.path())).unwrap(),
            b"/2024-05-06_07-08-09\n/note\r\n/b/x\r.txt"
        );
        assert_eq!(ChainRecord::read_from(dir.path()).unwrap(), record);
    }

    #[test]
    fn test_newline_in_name_is_refused() {
        let record = ChainRecord::incremental(sample_id(), vec![PathBuf::from("x\ny")]);
        assert!(matches!(
            record.encode(),
            Err(ChainbakError::UnrecordablePath { .. })
        ));

        let dir = tempdir().unwrap();
        assert!(record.write_to(dir.path()).is_err());
        assert!(!ChainRecord::path_in(dir.path()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_survives() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let name = PathBuf::from(OsStr::from_bytes(b"caf\xE9.txt"));
        let record = ChainRecord::incremental(sample_id(), vec![name]);

        record.write_to(dir.path()).unwrap();
        assert_eq!(ChainRecord::read_from(dir.path()).unwrap(), record);
    }

    #[test]
    fn test_decode_rejects_bad_identity() {
        let origin = Path::new("/snap/.backupcache");
        match ChainRecord::decode(b"yesterday\n/a.txt", origin) {
            Err(ChainbakError::MalformedChainRecord { path, .. }) => assert_eq!(path, origin),
            other => panic!("Expected MalformedChainRecord, got {other:?}"),
        }
        assert!(ChainRecord::decode(b"", origin).is_err());
    }

    #[test]
    fn test_decode_rejects_escaping_path() {
        let origin = Path::new(".backupcache");
        match ChainRecord::decode(b"/2024-05-06_07-08-09\n/../secret", origin) {
            Err(ChainbakError::MalformedChainRecord { reason, .. }) => {
                assert!(reason.contains("line 2"))
            }
            other => panic!("Expected MalformedChainRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_write_and_read_record() {
        let dir = tempdir().unwrap();
        let record = ChainRecord::incremental(sample_id(), vec![PathBuf::from("docs")]);

        record.write_to(dir.path()).unwrap();
        assert!(dir.path().join(METADATA_FILE).exists());
        assert_eq!(ChainRecord::read_from(dir.path()).unwrap(), record);
    }

    #[test]
    fn test_read_missing_record() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ChainRecord::read_from(dir.path()),
            Err(ChainbakError::ChainUnavailable { .. })
        ));
    }

    #[test]
    fn test_root_pointer_round_trip() {
        let dir = tempdir().unwrap();
        let pointer = RootPointer::new(dir.path());

        assert!(matches!(
            pointer.load(),
            Err(ChainbakError::ChainUnavailable { .. })
        ));

        pointer.save(&sample_id()).unwrap();
        assert_eq!(
            fs::read_to_string(pointer.path()).unwrap(),
            "/2024-05-06_07-08-09"
        );
        assert_eq!(pointer.load().unwrap(), sample_id());
    }

    #[test]
    fn test_root_pointer_empty_or_corrupt() {
        let dir = tempdir().unwrap();
        let pointer = RootPointer::new(dir.path());

        fs::write(pointer.path(), "").unwrap();
        assert!(matches!(
            pointer.load(),
            Err(ChainbakError::ChainUnavailable { .. })
        ));

        fs::write(pointer.path(), "garbage").unwrap();
        assert!(matches!(
            pointer.load(),
            Err(ChainbakError::MalformedChainRecord { .. })
        ));
    }
}
