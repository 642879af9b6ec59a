use crate::config::Config;
use crate::error::ChainbakError;
use crate::index::PathIndex;
use crate::naming::SnapshotId;
use crate::progress::Progress;
use crate::record::ChainRecord;
use crate::utils::{clear_directory, copy_entry, format_size, resolve_path, Copied, PendingDirs};
use crate::Result;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct RestoreReport {
    pub snapshot_dir: PathBuf,
    pub destination: PathBuf,
    /// Root full backup replayed first; `None` when the target is a full backup
    pub root_dir: Option<PathBuf>,
    pub from_root: usize,
    pub from_snapshot: usize,
    pub bytes_restored: u64,
    pub duration: Duration,
}

impl RestoreReport {
    fn new(snapshot_dir: PathBuf, destination: PathBuf, root_dir: Option<PathBuf>) -> Self {
        Self {
            snapshot_dir,
            destination,
            root_dir,
            from_root: 0,
            from_snapshot: 0,
            bytes_restored: 0,
            duration: Duration::from_secs(0),
        }
    }

    pub fn summary(&self) -> String {
        match &self.root_dir {
            Some(root_dir) => format!(
                "Restored {} into {} ({} entries from {}, {} from the snapshot, {})",
                self.snapshot_dir.display(),
                self.destination.display(),
                self.from_root,
                root_dir.display(),
                self.from_snapshot,
                format_size(self.bytes_restored)
            ),
            None => format!(
                "Restored {} into {} ({} entries, {})",
                self.snapshot_dir.display(),
                self.destination.display(),
                self.from_snapshot,
                format_size(self.bytes_restored)
            ),
        }
    }
}

/// Replace `working_dir` with the state captured by `snapshot_dir`.
///
/// For an incremental snapshot the root full backup is replayed first, limited
/// to the paths the snapshot recorded as unchanged; the snapshot's own entries
/// are copied afterwards and win over anything already in place. Everything
/// that can fail before the destination is touched (reading the record,
/// locating the root full backup, walking both layers) runs before the
/// destination is cleared.
pub fn restore(snapshot_dir: &Path, working_dir: &Path, config: &Config) -> Result<RestoreReport> {
    let start_time = Instant::now();

    let snapshot_dir = resolve_path(snapshot_dir)?;
    let record = ChainRecord::read_from(&snapshot_dir)?;
    let root_dir = root_layer_dir(&snapshot_dir, &record)?;
    validate_destination(working_dir, &snapshot_dir, root_dir.as_deref())?;

    let root_layer = match &root_dir {
        Some(dir) => Some(PathIndex::build(dir, false)?),
        None => None,
    };
    let target_layer = PathIndex::build(&snapshot_dir, false)?;

    if let Some(layer) = &root_layer {
        for path in record.unchanged.iter().filter(|p| !layer.contains(p)) {
            warn!(
                "{} is listed as unchanged but missing from the root full backup",
                path.display()
            );
        }
    }

    info!(
        "Restoring {} into {}",
        snapshot_dir.display(),
        working_dir.display()
    );
    clear_directory(working_dir)?;

    let mut report = RestoreReport::new(
        snapshot_dir.clone(),
        working_dir.to_path_buf(),
        root_dir.clone(),
    );
    let mut pending = PendingDirs::new();

    if let (Some(dir), Some(layer)) = (&root_dir, &root_layer) {
        let keep: HashSet<&Path> = record.unchanged.iter().map(PathBuf::as_path).collect();
        let progress = Progress::new(config.progress, keep.len(), "Root layer");
        for entry in layer.iter().filter(|e| keep.contains(e.rel_path.as_path())) {
            let copied = copy_entry(entry, dir, working_dir, config, &mut pending)?;
            report.from_root += 1;
            add_bytes(&mut report, copied);
            progress.advance(&entry.rel_path);
        }
        progress.finish();
        debug!("Replayed {} entries from {}", report.from_root, dir.display());
    }

    let progress = Progress::new(config.progress, target_layer.len(), "Snapshot");
    for entry in &target_layer {
        let copied = copy_entry(entry, &snapshot_dir, working_dir, config, &mut pending)?;
        report.from_snapshot += 1;
        add_bytes(&mut report, copied);
        progress.advance(&entry.rel_path);
    }
    progress.finish();

    pending.apply(config)?;
    report.duration = start_time.elapsed();
    Ok(report)
}

fn add_bytes(report: &mut RestoreReport, copied: Copied) {
    if let Copied::File(bytes) = copied {
        report.bytes_restored += bytes;
    }
}

/// Directory of the root full backup, if the snapshot is not itself the root.
///
/// The root lives next to the snapshot, under the same backup root.
fn root_layer_dir(snapshot_dir: &Path, record: &ChainRecord) -> Result<Option<PathBuf>> {
    let own_id = snapshot_dir
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| SnapshotId::parse(name).ok());
    if own_id.is_some_and(|id| record.is_root(&id)) {
        return Ok(None);
    }

    let backup_root = snapshot_dir.parent().ok_or_else(|| {
        ChainbakError::validation(format!(
            "Snapshot {} has no parent backup root",
            snapshot_dir.display()
        ))
    })?;
    let root_dir = record.root.snapshot_dir(backup_root);
    if !root_dir.is_dir() {
        return Err(ChainbakError::ChainUnavailable {
            path: root_dir,
            source: io::Error::new(io::ErrorKind::NotFound, "root full backup is missing"),
        });
    }
    Ok(Some(root_dir))
}

/// Clearing the destination must not touch the layers being restored
fn validate_destination(
    working_dir: &Path,
    snapshot_dir: &Path,
    root_dir: Option<&Path>,
) -> Result<()> {
    let destination = resolve_path(working_dir)?;
    for layer in std::iter::once(snapshot_dir).chain(root_dir) {
        if layer.starts_with(&destination) || destination.starts_with(layer) {
            return Err(ChainbakError::validation(format!(
                "Destination {} overlaps backup {}",
                working_dir.display(),
                layer.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{full_backup_at, incremental_backup_at};
    use crate::config::default_config;
    use crate::index::{EntryKind, METADATA_FILE};
    use crate::naming::TimeBasis;
    use filetime::FileTime;
    use std::collections::BTreeMap;
    #[cfg(unix)]
    use std::ffi::OsStr;
    use std::fs;
    use tempfile::tempdir;

    const T0: i64 = 1_577_836_800;
    const T2: i64 = 1_640_995_200;

    type Tree = BTreeMap<PathBuf, (EntryKind, Option<Vec<u8>>, Option<u32>)>;

    fn test_config() -> Config {
        Config {
            timestamps: TimeBasis::Utc,
            progress: false,
            ..default_config()
        }
    }

    fn id(value: &str) -> SnapshotId {
        SnapshotId::parse(value).unwrap()
    }

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    /// Kind, content and mode of every entry under `root`
    fn tree(root: &Path) -> Tree {
        PathIndex::build(root, false)
            .unwrap()
            .iter()
            .map(|e| {
                let content = (e.kind == EntryKind::File)
                    .then(|| fs::read(e.path_under(root)).unwrap());
                #[cfg(unix)]
                let mode = (e.kind != EntryKind::Symlink).then(|| e.mode() & 0o7777);
                #[cfg(not(unix))]
                let mode = None;
                (e.rel_path.clone(), (e.kind, content, mode))
            })
            .collect()
    }

    fn pin_mtimes(root: &Path, secs: i64) {
        for entry in PathIndex::build(root, false).unwrap().iter() {
            set_mtime(&entry.path_under(root), secs);
        }
    }

    fn sample_tree(work: &Path) {
        fs::write(work.join("a.txt"), "hi").unwrap();
        fs::create_dir_all(work.join("b").join("deep")).unwrap();
        fs::write(work.join("b").join("one.txt"), "one").unwrap();
        fs::write(work.join("b").join("deep").join("two.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::create_dir(work.join("empty")).unwrap();
        pin_mtimes(work, T0);
    }

    #[test]
    fn test_restore_full_backup_reproduces_tree() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        sample_tree(work.path());

        let backup =
            full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();
        let report = restore(&backup.snapshot_dir, dest.path(), &config).unwrap();

        assert_eq!(tree(dest.path()), tree(work.path()));
        assert!(report.root_dir.is_none());
        assert_eq!(report.from_root, 0);
        assert_eq!(report.from_snapshot, 6);
        assert!(!dest.path().join(METADATA_FILE).exists());
    }

    #[test]
    fn test_restore_incremental_scenario() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        fs::write(work.path().join("a.txt"), "hi").unwrap();
        fs::create_dir(work.path().join("b")).unwrap();
        pin_mtimes(work.path(), T0);

        full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();
        fs::write(work.path().join("a.txt"), "hello").unwrap();
        set_mtime(&work.path().join("a.txt"), T2);
        let incremental =
            incremental_backup_at(work.path(), root.path(), id("/2023-01-01_00-00-00"), &config)
                .unwrap();

        let target = dest.path().join("restored");
        let report = restore(&incremental.snapshot_dir, &target, &config).unwrap();

        assert_eq!(
            fs::read_to_string(target.join("a.txt")).unwrap(),
            "hello"
        );
        assert!(target.join("b").is_dir());
        assert_eq!(tree(&target).len(), 2);
        assert_eq!(report.from_root, 1);
        assert_eq!(report.from_snapshot, 1);
        assert_eq!(
            report.root_dir.as_deref(),
            Some(
                root.path()
                    .canonicalize()
                    .unwrap()
                    .join("2021-01-01_00-00-00")
                    .as_path()
            )
        );
    }

    #[test]
    fn test_restore_incremental_reproduces_mutated_tree() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        sample_tree(work.path());

        full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();

        // Edit a nested file, add a new directory and file, keep the rest
        fs::write(work.path().join("b").join("one.txt"), "one, edited").unwrap();
        fs::create_dir(work.path().join("c")).unwrap();
        fs::write(work.path().join("c").join("new.txt"), "new").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                work.path().join("c").join("new.txt"),
                fs::Permissions::from_mode(0o600),
            )
            .unwrap();
        }

        let incremental =
            incremental_backup_at(work.path(), root.path(), id("/2099-01-01_00-00-00"), &config)
                .unwrap();
        restore(&incremental.snapshot_dir, dest.path(), &config).unwrap();

        assert_eq!(tree(dest.path()), tree(work.path()));
    }

    #[test]
    fn test_restore_handles_kind_change() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        fs::create_dir(work.path().join("node")).unwrap();
        fs::write(work.path().join("node").join("x.txt"), "x").unwrap();
        pin_mtimes(work.path(), T0);

        full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();

        fs::remove_dir_all(work.path().join("node")).unwrap();
        fs::write(work.path().join("node"), "now a file").unwrap();

        let incremental =
            incremental_backup_at(work.path(), root.path(), id("/2099-01-01_00-00-00"), &config)
                .unwrap();
        restore(&incremental.snapshot_dir, dest.path(), &config).unwrap();

        assert_eq!(
            fs::read_to_string(dest.path().join("node")).unwrap(),
            "now a file"
        );
    }

    #[test]
    fn test_deleted_file_reappears_from_root_layer() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        sample_tree(work.path());

        full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();
        fs::remove_file(work.path().join("a.txt")).unwrap();

        let incremental =
            incremental_backup_at(work.path(), root.path(), id("/2023-01-01_00-00-00"), &config)
                .unwrap();
        restore(&incremental.snapshot_dir, dest.path(), &config).unwrap();

        // Deletions are not tracked by the chain record
        assert_eq!(fs::read_to_string(dest.path().join("a.txt")).unwrap(), "hi");
    }

    /// Full backup, unchanged incremental, restore; the name comes from the root layer
    #[cfg(unix)]
    fn restore_unchanged_name(name: &OsStr) -> PathBuf {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        fs::write(work.path().join("plain.txt"), "plain").unwrap();
        fs::write(work.path().join(name), "odd name").unwrap();
        pin_mtimes(work.path(), T0);

        full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();
        let incremental =
            incremental_backup_at(work.path(), root.path(), id("/2023-01-01_00-00-00"), &config)
                .unwrap();
        assert_eq!(incremental.files_copied, 0);

        let record = ChainRecord::read_from(&incremental.snapshot_dir).unwrap();
        assert!(record.unchanged.contains(&PathBuf::from(name)));

        restore(&incremental.snapshot_dir, dest.path(), &config).unwrap();
        assert_eq!(tree(dest.path()), tree(work.path()));
        dest.path().join(name)
    }

    #[cfg(unix)]
    #[test]
    fn test_carriage_return_name_restored_from_root_layer() {
        let restored = restore_unchanged_name(OsStr::new("note\r"));
        assert!(restored.ends_with("note\r"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_restored_from_root_layer() {
        use std::os::unix::ffi::OsStrExt;

        let restored = restore_unchanged_name(OsStr::from_bytes(b"caf\xE9.txt"));
        assert!(restored.file_name().is_some());
    }

    #[test]
    fn test_restore_replaces_existing_destination() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        sample_tree(work.path());
        fs::write(dest.path().join("stale.txt"), "old").unwrap();
        fs::write(dest.path().join("a.txt"), "a much longer stale body").unwrap();

        let backup =
            full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();
        restore(&backup.snapshot_dir, dest.path(), &config).unwrap();

        assert!(!dest.path().join("stale.txt").exists());
        assert_eq!(tree(dest.path()), tree(work.path()));
    }

    #[test]
    fn test_missing_record_leaves_destination_alone() {
        let snapshot = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(dest.path().join("keep.txt"), "keep").unwrap();

        let result = restore(snapshot.path(), dest.path(), &test_config());
        assert!(matches!(
            result,
            Err(ChainbakError::ChainUnavailable { .. })
        ));
        assert!(dest.path().join("keep.txt").exists());
    }

    #[test]
    fn test_missing_root_full_backup() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let config = test_config();
        sample_tree(work.path());
        fs::write(dest.path().join("keep.txt"), "keep").unwrap();

        let full =
            full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();
        let incremental =
            incremental_backup_at(work.path(), root.path(), id("/2023-01-01_00-00-00"), &config)
                .unwrap();
        fs::remove_dir_all(&full.snapshot_dir).unwrap();

        match restore(&incremental.snapshot_dir, dest.path(), &config) {
            Err(ChainbakError::ChainUnavailable { path, .. }) => {
                assert!(path.ends_with("2021-01-01_00-00-00"))
            }
            other => panic!("Expected ChainUnavailable, got {other:?}"),
        }
        assert!(dest.path().join("keep.txt").exists());
    }

    #[test]
    fn test_corrupt_record() {
        let snapshot = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(snapshot.path().join(METADATA_FILE), "not a timestamp").unwrap();

        assert!(matches!(
            restore(snapshot.path(), dest.path(), &test_config()),
            Err(ChainbakError::MalformedChainRecord { .. })
        ));
    }

    #[test]
    fn test_destination_overlapping_backup_is_rejected() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let config = test_config();
        sample_tree(work.path());

        let backup =
            full_backup_at(work.path(), root.path(), id("/2021-01-01_00-00-00"), &config).unwrap();

        assert!(matches!(
            restore(&backup.snapshot_dir, root.path(), &config),
            Err(ChainbakError::Validation { .. })
        ));
        assert!(matches!(
            restore(&backup.snapshot_dir, &backup.snapshot_dir.join("inner"), &config),
            Err(ChainbakError::Validation { .. })
        ));
        assert!(backup.snapshot_dir.join("a.txt").exists());
    }

    #[test]
    fn test_summary() {
        let report = RestoreReport::new(
            PathBuf::from("/b/2023-01-01_00-00-00"),
            PathBuf::from("/w"),
            Some(PathBuf::from("/b/2021-01-01_00-00-00")),
        );
        let summary = report.summary();
        assert!(summary.contains("Restored /b/2023-01-01_00-00-00 into /w"));
        assert!(summary.contains("/b/2021-01-01_00-00-00"));

        let report = RestoreReport::new(PathBuf::from("/b/s"), PathBuf::from("/w"), None);
        assert!(report.summary().contains("0 entries"));
    }
}
