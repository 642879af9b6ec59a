use crate::config::Config;
use crate::error::ChainbakError;
use crate::index::{FileEntry, PathIndex};
use crate::naming::SnapshotId;
use crate::progress::Progress;
use crate::record::{ChainRecord, PointerStore, RootPointer};
use crate::utils::{copy_entry, format_size, resolve_path, Copied, PendingDirs};
use crate::Result;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
}

impl FromStr for BackupKind {
    type Err = ChainbakError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            other => Err(ChainbakError::validation(format!(
                "undefined mode: {other} (expected full or incremental)"
            ))),
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => f.write_str("full"),
            BackupKind::Incremental => f.write_str("incremental"),
        }
    }
}

#[derive(Debug)]
pub struct BackupReport {
    pub kind: BackupKind,
    pub snapshot: SnapshotId,
    /// Root full backup of the chain; equals `snapshot` for full backups
    pub root: SnapshotId,
    pub snapshot_dir: PathBuf,
    pub files_copied: usize,
    pub dirs_created: usize,
    pub links_copied: usize,
    pub unchanged: usize,
    pub bytes_copied: u64,
    pub duration: Duration,
}

impl BackupReport {
    pub fn new(
        kind: BackupKind,
        snapshot: SnapshotId,
        root: SnapshotId,
        snapshot_dir: PathBuf,
    ) -> Self {
        Self {
            kind,
            snapshot,
            root,
            snapshot_dir,
            files_copied: 0,
            dirs_created: 0,
            links_copied: 0,
            unchanged: 0,
            bytes_copied: 0,
            duration: Duration::from_secs(0),
        }
    }

    fn record(&mut self, copied: Copied) {
        match copied {
            Copied::File(bytes) => {
                self.files_copied += 1;
                self.bytes_copied += bytes;
            }
            Copied::Dir => self.dirs_created += 1,
            Copied::Symlink => self.links_copied += 1,
        }
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Created {} backup: {} ({} files, {} dirs, {})",
            self.kind,
            self.snapshot_dir.display(),
            self.files_copied,
            self.dirs_created,
            format_size(self.bytes_copied)
        );
        if self.kind == BackupKind::Incremental {
            summary.push_str(&format!(
                "; {} unchanged since {}",
                self.unchanged, self.root
            ));
        }
        summary
    }
}

/// What an incremental backup would copy and what it would leave out
#[derive(Debug)]
pub struct IncrementalPlan {
    /// Snapshot the working tree is compared against
    pub previous: SnapshotId,
    pub previous_dir: PathBuf,
    /// Root identity inherited from the previous snapshot's record
    pub root: SnapshotId,
    /// Working-tree entries to copy, in walk order
    pub copy: Vec<FileEntry>,
    /// Paths of the previous snapshot left out of the new one, in walk order
    pub unchanged: Vec<PathBuf>,
    /// Chain record of the new snapshot, encoded before anything is written
    pub record_bytes: Vec<u8>,
}

impl IncrementalPlan {
    pub fn bytes_to_copy(&self) -> u64 {
        self.copy
            .iter()
            .filter(|e| !e.is_dir())
            .map(|e| e.size)
            .sum()
    }
}

/// Size and time heuristic: same kind, same size, not modified after `since`
pub fn is_unchanged(current: &FileEntry, previous: &FileEntry, since: SystemTime) -> bool {
    current.kind == previous.kind && current.size == previous.size && current.modified <= since
}

/// Split the working tree into entries to copy and baseline paths to leave out.
///
/// Every entry failing [`is_unchanged`] against the baseline entry of the same
/// path is copied, together with its ancestor directories so that the copy has
/// the source metadata. Every baseline path that is not copied is reported as
/// unchanged, including paths no longer present in the working tree.
pub fn diff_trees(
    working: &PathIndex,
    baseline: &PathIndex,
    since: SystemTime,
) -> (Vec<FileEntry>, Vec<PathBuf>) {
    let mut copy_set: HashSet<&Path> = HashSet::new();

    for entry in working {
        let changed = match baseline.get(&entry.rel_path) {
            Some(previous) => !is_unchanged(entry, previous, since),
            None => true,
        };
        if changed {
            copy_set.insert(entry.rel_path.as_path());
            for ancestor in entry.rel_path.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() || !copy_set.insert(ancestor) {
                    break;
                }
            }
        }
    }

    let copy = working
        .iter()
        .filter(|e| copy_set.contains(e.rel_path.as_path()))
        .cloned()
        .collect();
    let unchanged = baseline
        .iter()
        .filter(|e| !copy_set.contains(e.rel_path.as_path()))
        .map(|e| e.rel_path.clone())
        .collect();

    (copy, unchanged)
}

/// Full backup of `working_dir` into a new snapshot under `backup_root`
pub fn full_backup(working_dir: &Path, backup_root: &Path, config: &Config) -> Result<BackupReport> {
    full_backup_at(
        working_dir,
        backup_root,
        SnapshotId::now(config.timestamps),
        config,
    )
}

pub fn full_backup_at(
    working_dir: &Path,
    backup_root: &Path,
    snapshot: SnapshotId,
    config: &Config,
) -> Result<BackupReport> {
    let pointer = RootPointer::new(backup_root);
    full_backup_with(working_dir, backup_root, snapshot, &pointer, config)
}

pub fn full_backup_with(
    working_dir: &Path,
    backup_root: &Path,
    snapshot: SnapshotId,
    pointer: &dyn PointerStore,
    config: &Config,
) -> Result<BackupReport> {
    let start_time = Instant::now();
    validate_dirs(working_dir, backup_root)?;

    let working = PathIndex::build(working_dir, config.follow_symlinks)?;
    // Later incrementals list these paths in their records
    working.ensure_recordable()?;
    let snapshot_dir = create_snapshot_dir(backup_root, &snapshot)?;
    info!(
        "Full backup of {} into {}",
        working_dir.display(),
        snapshot_dir.display()
    );

    let mut report =
        BackupReport::new(BackupKind::Full, snapshot, snapshot, snapshot_dir.clone());
    copy_entries(
        working.entries(),
        working_dir,
        &snapshot_dir,
        config,
        &mut report,
    )?;

    ChainRecord::full(snapshot).write_to(&snapshot_dir)?;
    pointer.save(&snapshot)?;

    report.duration = start_time.elapsed();
    Ok(report)
}

/// Compute the incremental plan without writing anything
pub fn plan_incremental(
    working_dir: &Path,
    backup_root: &Path,
    config: &Config,
) -> Result<IncrementalPlan> {
    let pointer = RootPointer::new(backup_root);
    plan_incremental_with(working_dir, backup_root, &pointer, config)
}

pub fn plan_incremental_with(
    working_dir: &Path,
    backup_root: &Path,
    pointer: &dyn PointerStore,
    config: &Config,
) -> Result<IncrementalPlan> {
    validate_dirs(working_dir, backup_root)?;

    let previous = pointer.load()?;
    let previous_dir = previous.snapshot_dir(backup_root);
    let previous_record = ChainRecord::read_from(&previous_dir)?;
    let since = previous.instant(config.timestamps)?;
    debug!(
        "Comparing against {} (root {})",
        previous_dir.display(),
        previous_record.root
    );

    // Snapshot contents are never followed: links in them are stored links
    let baseline = PathIndex::build(&previous_dir, false)?;
    let working = PathIndex::build(working_dir, config.follow_symlinks)?;
    let (copy, unchanged) = diff_trees(&working, &baseline, since);
    let record_bytes =
        ChainRecord::incremental(previous_record.root, unchanged.clone()).encode()?;

    Ok(IncrementalPlan {
        previous,
        previous_dir,
        root: previous_record.root,
        copy,
        unchanged,
        record_bytes,
    })
}

/// Incremental backup against the snapshot named by the backup root pointer
pub fn incremental_backup(
    working_dir: &Path,
    backup_root: &Path,
    config: &Config,
) -> Result<BackupReport> {
    incremental_backup_at(
        working_dir,
        backup_root,
        SnapshotId::now(config.timestamps),
        config,
    )
}

pub fn incremental_backup_at(
    working_dir: &Path,
    backup_root: &Path,
    snapshot: SnapshotId,
    config: &Config,
) -> Result<BackupReport> {
    let pointer = RootPointer::new(backup_root);
    incremental_backup_with(working_dir, backup_root, snapshot, &pointer, config)
}

pub fn incremental_backup_with(
    working_dir: &Path,
    backup_root: &Path,
    snapshot: SnapshotId,
    pointer: &dyn PointerStore,
    config: &Config,
) -> Result<BackupReport> {
    let start_time = Instant::now();

    let plan = plan_incremental_with(working_dir, backup_root, pointer, config)?;
    let snapshot_dir = create_snapshot_dir(backup_root, &snapshot)?;
    info!(
        "Incremental backup of {} into {} ({} to copy, {} unchanged)",
        working_dir.display(),
        snapshot_dir.display(),
        plan.copy.len(),
        plan.unchanged.len()
    );

    let mut report = BackupReport::new(
        BackupKind::Incremental,
        snapshot,
        plan.root,
        snapshot_dir.clone(),
    );
    copy_entries(&plan.copy, working_dir, &snapshot_dir, config, &mut report)?;

    report.unchanged = plan.unchanged.len();
    ChainRecord::write_encoded(&snapshot_dir, &plan.record_bytes)?;

    report.duration = start_time.elapsed();
    Ok(report)
}

fn copy_entries(
    entries: &[FileEntry],
    source_root: &Path,
    dest_root: &Path,
    config: &Config,
    report: &mut BackupReport,
) -> Result<()> {
    let progress = Progress::new(config.progress, entries.len(), "Copying");
    let mut pending = PendingDirs::new();

    for entry in entries {
        let copied = copy_entry(entry, source_root, dest_root, config, &mut pending)?;
        report.record(copied);
        progress.advance(&entry.rel_path);
    }

    pending.apply(config)?;
    progress.finish();
    Ok(())
}

fn create_snapshot_dir(backup_root: &Path, snapshot: &SnapshotId) -> Result<PathBuf> {
    fs::create_dir_all(backup_root).map_err(ChainbakError::at(backup_root))?;

    let dir = snapshot.snapshot_dir(backup_root);
    match fs::create_dir(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(ChainbakError::AlreadyExists { path: dir })
        }
        Err(e) => Err(ChainbakError::at(&dir)(e)),
    }
}

/// The working directory must exist and must not contain the backup root
fn validate_dirs(working_dir: &Path, backup_root: &Path) -> Result<()> {
    if !working_dir.is_dir() {
        return Err(ChainbakError::validation(format!(
            "Working directory not found: {}",
            working_dir.display()
        )));
    }

    let working = resolve_path(working_dir)?;
    let root = resolve_path(backup_root)?;
    if root.starts_with(&working) {
        return Err(ChainbakError::validation(format!(
            "Backup root {} lies inside the working directory {}",
            backup_root.display(),
            working_dir.display()
        )));
    }
    Ok(())
}
