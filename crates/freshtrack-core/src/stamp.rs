//! Filesystem modification stamps.
//!
//! A [`FileStamp`] is the last-observed modification time of a file, kept at
//! nanosecond precision so it round-trips through the stamp database without
//! losing filesystem-native resolution.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Modification timestamp of a file, in nanoseconds since the Unix epoch.
///
/// Negative values encode pre-epoch mtimes. Stamps are only ever compared
/// for equality: a changed mtime in either direction means the file moved
/// out from under its recorded stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileStamp(i64);

impl FileStamp {
    /// Reads the current modification time of `path`.
    ///
    /// Errors propagate: a permission problem or the file vanishing between
    /// an existence check and this query is not masked.
    pub fn of(path: &Path) -> Result<Self> {
        let metadata =
            fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
        let mtime = metadata
            .modified()
            .with_context(|| format!("Failed to read mtime of {}", path.display()))?;
        Ok(Self::from(mtime))
    }

    /// Reconstructs a stamp from raw nanoseconds (database round-trip).
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Raw nanoseconds since the Unix epoch.
    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

impl From<SystemTime> for FileStamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_nanos() as i64),
            Err(e) => Self(-(e.duration().as_nanos() as i64)),
        }
    }
}
