pub mod backup;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod naming;
pub mod progress;
pub mod record;
pub mod restore;
pub mod utils;

pub use backup::{
    diff_trees, full_backup, full_backup_at, full_backup_with, incremental_backup,
    incremental_backup_at, incremental_backup_with, is_unchanged, plan_incremental,
    plan_incremental_with, BackupKind, BackupReport, IncrementalPlan,
};
pub use config::{default_config, dump_config, load_config, load_config_from, Config};
pub use error::ChainbakError;
pub use index::{EntryKind, FileEntry, PathIndex, METADATA_FILE};
pub use logging::init_logging;
pub use naming::{SnapshotId, TimeBasis};
pub use record::{ChainRecord, PointerStore, RootPointer};
pub use restore::{restore, RestoreReport};
pub use utils::format_size;

/// Main library result type
pub type Result<T> = std::result::Result<T, ChainbakError>;
