//! Shared stamp cache with a leased load/flush lifecycle.
//!
//! One [`StampCache`] is created per stamp database and passed as an `Arc`
//! to every [`FreshnessTable`](crate::table::FreshnessTable) that should
//! share it. Each table holds a [`CacheLease`]: the first lease loads the
//! mapping from the database, the last one to drop writes the accumulated
//! updates back. Intermediate acquisitions and releases do no I/O.

use crate::db::StampDb;
use crate::paths;
use crate::settings::CacheSettings;
use crate::stamp::FileStamp;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

struct CacheState {
    stamps: HashMap<PathBuf, FileStamp>,
    suppress_updates: bool,
    leases: u32,
}

/// Shared path→stamp cache backed by a [`StampDb`].
///
/// The in-memory mapping mirrors the database only while at least one lease
/// is outstanding. The mutex makes mutation through `Arc` sound; callers
/// still serialize logically as this core has no cross-thread transactional
/// guarantees.
pub struct StampCache {
    db: StampDb,
    state: Mutex<CacheState>,
}

impl StampCache {
    /// Opens the stamp database under `cache_dir` and wraps it in a fresh
    /// cache. The suppression flag is seeded from the settings file.
    pub fn open(cache_dir: &Path) -> Result<Arc<Self>> {
        let settings = CacheSettings::load(cache_dir);
        let db = StampDb::open(cache_dir)?;
        Ok(Arc::new(Self {
            db,
            state: Mutex::new(CacheState {
                stamps: HashMap::new(),
                suppress_updates: settings.suppress_updates,
                leases: 0,
            }),
        }))
    }

    /// Takes a lease on the cache. The first outstanding lease loads the
    /// full mapping from the database; nested leases reuse it without
    /// touching disk.
    pub fn acquire(self: &Arc<Self>) -> Result<CacheLease> {
        let mut state = self.state.lock();
        if state.leases == 0 {
            state.stamps = self.db.load_all().context("Failed to load stamp cache")?;
            debug!(count = state.stamps.len(), "Stamp cache populated");
        }
        state.leases += 1;
        Ok(CacheLease {
            cache: Arc::clone(self),
        })
    }

    /// Writes the in-memory mapping back to the database regardless of the
    /// lease count. The error-propagating counterpart to drop-time saves.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        self.db
            .save_all(&state.stamps)
            .context("Failed to flush stamp cache")
    }

    /// Discards every stamp, in memory and on disk, immediately.
    ///
    /// Does not wait for lease release and does not touch the lease count.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.stamps.clear();
        self.db.clear().context("Failed to reset stamp database")
    }

    /// Sets the global suppression flag. Affects every table sharing this
    /// cache, current and future, immediately.
    pub fn set_suppress_updates(&self, suppress: bool) {
        self.state.lock().suppress_updates = suppress;
        debug!(suppress, "Update suppression toggled");
    }

    /// Reports the global suppression flag.
    pub fn updates_suppressed(&self) -> bool {
        self.state.lock().suppress_updates
    }

    /// Number of stamps currently tracked in memory.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().stamps.len()
    }

    pub(crate) fn stamp_of(&self, key: &Path) -> Option<FileStamp> {
        self.state.lock().stamps.get(key).copied()
    }

    pub(crate) fn set_stamp(&self, key: PathBuf, stamp: FileStamp) {
        self.state.lock().stamps.insert(key, stamp);
    }

    /// Removes every stamp under `root` (inclusive). Two-phase: the matching
    /// keys are collected first, then erased, so the map is never mutated
    /// while it is being scanned.
    pub(crate) fn remove_under(&self, root: &Path) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<PathBuf> = state
            .stamps
            .keys()
            .filter(|key| paths::is_under(key, root))
            .cloned()
            .collect();
        for key in &doomed {
            state.stamps.remove(key);
        }
        doomed.len()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.leases -= 1;
        if state.leases > 0 {
            return;
        }
        match self.db.save_all(&state.stamps) {
            Ok(()) => debug!(count = state.stamps.len(), "Stamps persisted on final release"),
            Err(e) => warn!("Failed to persist stamps on final release: {:#}", e),
        }
    }
}

/// RAII acquisition of a [`StampCache`].
///
/// Dropping the last outstanding lease persists the mapping; a failure there
/// is logged rather than raised. Call [`StampCache::flush`] first when
/// persistence failures must be fatal.
pub struct CacheLease {
    cache: Arc<StampCache>,
}

impl CacheLease {
    /// The cache this lease holds open.
    pub fn cache(&self) -> &Arc<StampCache> {
        &self.cache
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        self.cache.release();
    }
}
