//! Freshness queries and self-throttling writes for generated files.

use crate::cache::{CacheLease, StampCache};
use crate::fsio;
use crate::paths;
use crate::stamp::FileStamp;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Freshness table bound to a root directory.
///
/// Answers whether generated files under the root need regenerating, and
/// performs content-aware writes that keep the stamp records current. Paths
/// outside the root are never tracked: they are regenerated on every
/// request.
///
/// Construction acquires a lease on the shared cache; dropping the table
/// releases it, and the last table to go persists the stamps.
pub struct FreshnessTable {
    root_dir: PathBuf,
    lease: CacheLease,
}

impl FreshnessTable {
    /// Creates a table rooted at the parent of `config_dir`.
    ///
    /// When `config_dir` has no parent (e.g. `/`), the directory itself
    /// becomes the containment boundary.
    pub fn new(cache: &Arc<StampCache>, config_dir: &Path) -> Result<Self> {
        let root_dir = config_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir.to_path_buf());
        let root_dir = paths::normalize(&root_dir);
        let lease = cache.acquire()?;
        debug!(root = %root_dir.display(), "Freshness table opened");
        Ok(Self { root_dir, lease })
    }

    /// The containment boundary for stamp tracking.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Returns true when `path` must be regenerated.
    ///
    /// A missing file is always stale, even outside the root. With
    /// suppression on, any existing file reports fresh. Otherwise untracked
    /// (outside-root) paths are always stale, and tracked paths are stale
    /// when the on-disk mtime differs from the recorded stamp — including
    /// when no stamp is recorded at all.
    pub fn is_stale(&self, path: &Path) -> Result<bool> {
        let exists = path
            .try_exists()
            .with_context(|| format!("Failed to check existence of {}", path.display()))?;
        if !exists {
            return Ok(true);
        }

        let cache = self.lease.cache();
        if cache.updates_suppressed() {
            return Ok(false);
        }
        if !self.is_under_root(path) {
            return Ok(true);
        }

        let current = FileStamp::of(path)?;
        let recorded = cache.stamp_of(&paths::normalize(path));
        Ok(recorded != Some(current))
    }

    /// Reports the global suppression flag.
    pub fn updates_suppressed(&self) -> bool {
        self.lease.cache().updates_suppressed()
    }

    /// Writes `content` (only if it differs from what is on disk) and
    /// records the file's resulting mtime as the new stamp.
    ///
    /// Always re-stamps, regardless of staleness or suppression: an
    /// identical-content call refreshes the record without touching the
    /// file.
    pub fn record_write(&self, path: &Path, content: &[u8]) -> Result<()> {
        fsio::write_if_different(path, content)?;
        let stamp = FileStamp::of(path)?;
        self.lease.cache().set_stamp(paths::normalize(path), stamp);
        Ok(())
    }

    /// Writes `content` only when `path` is stale.
    ///
    /// Outside-root paths get an unconditional content-aware write with no
    /// stamp bookkeeping. This is the entry point generators should use.
    pub fn write_if_stale(&self, path: &Path, content: &[u8]) -> Result<()> {
        if !self.is_under_root(path) {
            fsio::write_if_different(path, content)?;
            return Ok(());
        }
        if self.is_stale(path)? {
            self.record_write(path, content)?;
        }
        Ok(())
    }

    /// Drops every stamp recorded under `subtree` (inclusive), forcing the
    /// next staleness check of those paths to report stale. Returns the
    /// number of records removed.
    pub fn invalidate_subtree(&self, subtree: &Path) -> usize {
        let removed = self
            .lease
            .cache()
            .remove_under(&paths::normalize(subtree));
        debug!(subtree = %subtree.display(), removed, "Stamps invalidated");
        removed
    }

    /// Toggles update suppression for every table sharing the cache.
    pub fn set_suppress_updates(&self, suppress: bool) {
        self.lease.cache().set_suppress_updates(suppress);
    }

    fn is_under_root(&self, path: &Path) -> bool {
        paths::is_under(path, &self.root_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: Arc<StampCache>,
        root: PathBuf,
        outside: PathBuf,
    }

    // Layout: <tmp>/proj is the root (parent of the config dir), and
    // <tmp>/elsewhere is outside it.
    fn fixture() -> (Fixture, FreshnessTable) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        let outside = dir.path().join("elsewhere");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();

        let cache = StampCache::open(&dir.path().join("cache")).unwrap();
        let table = FreshnessTable::new(&cache, &root.join("config")).unwrap();

        let fx = Fixture {
            _dir: dir,
            cache,
            root,
            outside,
        };
        (fx, table)
    }

    #[test]
    fn root_is_parent_of_config_dir() {
        let (fx, table) = fixture();
        assert_eq!(table.root_dir(), fx.root.as_path());
    }

    #[test]
    fn missing_file_is_stale() {
        let (fx, table) = fixture();
        assert!(table.is_stale(&fx.root.join("nope.txt")).unwrap());
    }

    #[test]
    fn missing_file_is_stale_even_outside_root_and_suppressed() {
        let (fx, table) = fixture();
        table.set_suppress_updates(true);
        assert!(table.is_stale(&fx.outside.join("nope.txt")).unwrap());
    }

    #[test]
    fn existing_file_outside_root_is_always_stale() {
        let (fx, table) = fixture();
        let path = fx.outside.join("gen.txt");
        fs::write(&path, "x").unwrap();
        assert!(table.is_stale(&path).unwrap());
    }

    #[test]
    fn suppression_freezes_existing_files_as_fresh() {
        let (fx, table) = fixture();
        let path = fx.root.join("out.txt");
        fs::write(&path, "x").unwrap();

        // No stamp recorded: stale without suppression
        assert!(table.is_stale(&path).unwrap());

        table.set_suppress_updates(true);
        assert!(!table.is_stale(&path).unwrap());
        assert!(table.updates_suppressed());

        table.set_suppress_updates(false);
        assert!(table.is_stale(&path).unwrap());
    }

    #[test]
    fn record_write_makes_path_fresh() {
        let (fx, table) = fixture();
        let path = fx.root.join("out.txt");

        table.record_write(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(!table.is_stale(&path).unwrap());
    }

    #[test]
    fn matching_stamp_is_fresh_mismatched_is_stale() {
        let (fx, table) = fixture();
        let path = fx.root.join("out.txt");
        table.record_write(&path, b"v1").unwrap();
        assert!(!table.is_stale(&path).unwrap());

        // External modification moves the mtime away from the stamp
        sleep(Duration::from_millis(20));
        fs::write(&path, "v2").unwrap();
        assert!(table.is_stale(&path).unwrap());
    }

    #[test]
    fn record_write_with_identical_content_refreshes_stamp_only() {
        let (fx, table) = fixture();
        let path = fx.root.join("out.txt");
        table.record_write(&path, b"hello").unwrap();

        // Externally touch: same bytes, new mtime
        sleep(Duration::from_millis(20));
        fs::write(&path, "hello").unwrap();
        let touched_mtime = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(table.is_stale(&path).unwrap());

        table.record_write(&path, b"hello").unwrap();
        // File untouched, stamp refreshed
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(touched_mtime, after);
        assert!(!table.is_stale(&path).unwrap());
    }

    #[test]
    fn write_if_stale_skips_fresh_paths() {
        let (fx, table) = fixture();
        let path = fx.root.join("out.txt");
        table.write_if_stale(&path, b"v1").unwrap();
        assert!(!table.is_stale(&path).unwrap());
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        sleep(Duration::from_millis(20));
        table.write_if_stale(&path, b"v2").unwrap();
        // Fresh: neither content nor mtime may change
        assert_eq!(fs::read(&path).unwrap(), b"v1");
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), mtime);
    }

    #[test]
    fn write_if_stale_outside_root_tracks_nothing() {
        let (fx, table) = fixture();
        let path = fx.outside.join("gen.txt");

        table.write_if_stale(&path, b"v1").unwrap();
        assert_eq!(fx.cache.tracked_count(), 0);

        // No stamp gating: a changed payload is rewritten every time
        table.write_if_stale(&path, b"v2").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"v2");
        assert_eq!(fx.cache.tracked_count(), 0);

        // No stamps recorded, so nothing to invalidate either
        assert_eq!(table.invalidate_subtree(fx.outside.as_path()), 0);
    }

    #[test]
    fn invalidate_subtree_forces_regeneration() {
        let (fx, table) = fixture();
        let gen_dir = fx.root.join("gen");
        let a = gen_dir.join("a.txt");
        let b = gen_dir.join("b.txt");
        let sibling = fx.root.join("keep.txt");
        table.record_write(&a, b"a").unwrap();
        table.record_write(&b, b"b").unwrap();
        table.record_write(&sibling, b"s").unwrap();

        let removed = table.invalidate_subtree(&gen_dir);
        assert_eq!(removed, 2);

        assert!(table.is_stale(&a).unwrap());
        assert!(table.is_stale(&b).unwrap());
        assert!(!table.is_stale(&sibling).unwrap());
    }

    #[test]
    fn stale_check_normalizes_paths() {
        let (fx, table) = fixture();
        let path = fx.root.join("out.txt");
        table.record_write(&path, b"hello").unwrap();

        let dotted = fx.root.join(".").join("out.txt");
        assert!(!table.is_stale(&dotted).unwrap());
    }

    #[test]
    fn two_tables_share_stamp_state() {
        let (fx, table1) = fixture();
        let table2 = FreshnessTable::new(&fx.cache, &fx.root.join("config")).unwrap();

        let path = fx.root.join("out.txt");
        table1.record_write(&path, b"hello").unwrap();
        assert!(!table2.is_stale(&path).unwrap());

        // Suppression is global across tables
        table2.set_suppress_updates(true);
        assert!(table1.updates_suppressed());
    }
}
