//! Cache settings persistence.
//!
//! Deployment-level knobs live in `<cache_dir>/freshtrack-settings.json` and
//! are applied when a stamp cache is opened.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SETTINGS_FILE: &str = "freshtrack-settings.json";

/// Settings applied when a stamp cache is opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Start with update suppression enabled: every existing file reports
    /// as fresh until the flag is lowered at runtime.
    pub suppress_updates: bool,
}

impl CacheSettings {
    /// Loads settings from `<cache_dir>/freshtrack-settings.json`.
    /// Returns defaults on any I/O or parse error (graceful degradation).
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join(SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Persists settings to `<cache_dir>/freshtrack-settings.json`.
    pub fn save(&self, cache_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(cache_dir)
            .context("Failed to create cache directory for settings")?;
        let path = cache_dir.join(SETTINGS_FILE);
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
