use crate::error::ChainbakError;
use crate::Result;
use chrono::{Local, NaiveDateTime, SubsecRound, TimeZone, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

const IDENTITY_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Clock used to create snapshot identities and to read them back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBasis {
    #[default]
    Local,
    Utc,
}

impl FromStr for TimeBasis {
    type Err = ChainbakError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Ok(TimeBasis::Local),
            "utc" => Ok(TimeBasis::Utc),
            other => Err(ChainbakError::config(format!(
                "Invalid timestamps value: {other} (expected local or utc)"
            ))),
        }
    }
}

impl fmt::Display for TimeBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBasis::Local => f.write_str("local"),
            TimeBasis::Utc => f.write_str("utc"),
        }
    }
}

/// Identity of one snapshot, derived from the wall clock at second resolution.
///
/// Rendered as `/YYYY-MM-DD_HH-MM-SS`: the leading slash makes it usable as a
/// directory-name suffix of the backup root, and the same string doubles as the
/// chain pointer stored in `.backupcache` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(NaiveDateTime);

impl SnapshotId {
    /// Identity for the current second
    pub fn now(basis: TimeBasis) -> Self {
        let now = match basis {
            TimeBasis::Local => Local::now().naive_local(),
            TimeBasis::Utc => Utc::now().naive_utc(),
        };
        SnapshotId(now.trunc_subsecs(0))
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        SnapshotId(datetime.trunc_subsecs(0))
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Parse an identity, with or without the leading slash
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let trimmed = value.trim();
        let bare = trimmed.strip_prefix('/').unwrap_or(trimmed);
        NaiveDateTime::parse_from_str(bare, IDENTITY_FORMAT)
            .map(SnapshotId)
            .map_err(|e| format!("invalid snapshot identity {trimmed:?}: {e}"))
    }

    /// Directory name of this snapshot under the backup root
    pub fn dir_name(&self) -> String {
        self.0.format(IDENTITY_FORMAT).to_string()
    }

    pub fn snapshot_dir(&self, backup_root: &Path) -> PathBuf {
        backup_root.join(self.dir_name())
    }

    /// The instant this identity denotes, read in the given basis
    pub fn instant(&self, basis: TimeBasis) -> Result<SystemTime> {
        match basis {
            TimeBasis::Utc => Ok(SystemTime::from(Utc.from_utc_datetime(&self.0))),
            TimeBasis::Local => Local
                .from_local_datetime(&self.0)
                .earliest()
                .map(SystemTime::from)
                .ok_or_else(|| {
                    ChainbakError::malformed(
                        self.dir_name(),
                        "identity does not exist in the local time zone",
                    )
                }),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.dir_name())
    }
}
