//! Version cache for discovered publish assets.
//!
//! The cache maps `publish_path -> asset_key -> [version labels]` with the
//! version lists sorted newest-first (descending lexicographic order of
//! `v###` labels). It is built by scanning a publish directory plus its
//! `v###` subdirectories, queried by asset key, and persisted as a JSON
//! snapshot whose wire shape is exactly the in-memory map.
//!
//! There is no invalidation: callers rebuild a path's entry (`build_cache`)
//! whenever they want fresh data, or drop everything with `clear`.

use std::collections::BTreeMap;
use std::path::Path;

use core_patterns::PatternSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub mod scan;

pub use scan::{
    CAMERA_TYPE, CAMERA_VARIANT, DEFAULT_EXTENSIONS, ScannedAsset, VersionSource, asset_key,
    extract_version_label, is_version_dir, normalize_path, parse_filename_fallback,
    scan_publish_directory, scan_publish_directory_with,
};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed for {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cache snapshot at {path} is not valid JSON: {reason}")]
    Format { path: String, reason: String },
}

type CacheMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Per-publish-path version lists, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct VersionCache {
    cache: CacheMap,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `publish_path` (its direct files plus every `v###`
    /// subdirectory) and replaces this path's cache entry with the result.
    ///
    /// Returns the freshly built `asset_key -> versions` map for the path.
    /// A missing directory yields an empty entry and a warning, not an
    /// error.
    pub fn build_cache(
        &mut self,
        publish_path: &Path,
        patterns: Option<&PatternSet>,
    ) -> BTreeMap<String, Vec<String>> {
        let key = scan::normalize_path(publish_path);
        let mut data: BTreeMap<String, Vec<String>> = BTreeMap::new();

        if !publish_path.exists() {
            warn!(target: "cache", path = %key, "publish path does not exist");
            self.cache.insert(key, data.clone());
            return data;
        }

        // Files directly under publish/ carry their version in the filename.
        for asset in scan::scan_publish_directory(publish_path, patterns) {
            let Some(version) = asset.version.clone() else {
                continue;
            };
            let versions = data.entry(asset.asset_key()).or_default();
            if !versions.contains(&version) {
                versions.push(version);
            }
        }

        // publish/v###/ subdirectories: the directory name is the version.
        if let Ok(entries) = std::fs::read_dir(publish_path) {
            for entry in entries.flatten() {
                let entry_path = entry.path();
                let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !entry_path.is_dir() || !scan::is_version_dir(name) {
                    continue;
                }
                let version = name.to_string();
                for asset in scan::scan_publish_directory(&entry_path, patterns) {
                    let versions = data.entry(asset.asset_key()).or_default();
                    if !versions.contains(&version) {
                        versions.push(version.clone());
                    }
                }
            }
        }

        // Newest first: descending lexicographic order of v### labels.
        for versions in data.values_mut() {
            versions.sort_unstable_by(|a, b| b.cmp(a));
        }

        let total: usize = data.values().map(Vec::len).sum();
        info!(
            target: "cache",
            path = %key,
            assets = data.len(),
            versions = total,
            "cache built"
        );

        self.cache.insert(key, data.clone());
        data
    }

    /// Cached version list for an asset, newest first. Empty when the path
    /// was never scanned or the key is unknown.
    pub fn versions(&self, publish_path: &str, asset_key: &str) -> &[String] {
        self.cache
            .get(publish_path)
            .and_then(|assets| assets.get(asset_key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Latest cached version for an asset.
    pub fn latest(&self, publish_path: &str, asset_key: &str) -> Option<&str> {
        self.versions(publish_path, asset_key)
            .first()
            .map(String::as_str)
    }

    /// Asset keys cached for a publish path.
    pub fn asset_keys(&self, publish_path: &str) -> Vec<&str> {
        self.cache
            .get(publish_path)
            .map(|assets| assets.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn publish_paths(&self) -> Vec<&str> {
        self.cache.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Writes the snapshot (`{publish_path: {asset_key: [versions]}}`).
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let file = std::fs::File::create(path).map_err(|e| CacheError::Io {
            path: scan::normalize_path(path),
            reason: e.to_string(),
        })?;
        serde_json::to_writer_pretty(file, &self.cache).map_err(|e| CacheError::Io {
            path: scan::normalize_path(path),
            reason: e.to_string(),
        })
    }

    /// Loads a snapshot, replacing the current contents. A missing file is a
    /// no-op, matching the scanner's lenient failure semantics.
    pub fn load(&mut self, path: &Path) -> Result<(), CacheError> {
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::Io {
            path: scan::normalize_path(path),
            reason: e.to_string(),
        })?;
        self.cache = serde_json::from_str(&content).map_err(|e| CacheError::Format {
            path: scan::normalize_path(path),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::PathBuf;

    /// publish/ with v001..v003 each holding one CatStompie file.
    fn versioned_publish_tree() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let publish = dir.path().join("publish");
        for version in ["v001", "v002", "v003"] {
            let vdir = publish.join(version);
            fs::create_dir_all(&vdir).unwrap();
            fs::write(vdir.join("Ep04_sq0070_SH0170__CHAR_CatStompie_001.abc"), b"").unwrap();
        }
        (dir, publish)
    }

    #[test]
    fn build_cache_sorts_versions_newest_first() {
        let (_tmp, publish) = versioned_publish_tree();
        let mut cache = VersionCache::new();
        let patterns = PatternSet::defaults();
        cache.build_cache(&publish, Some(&patterns));

        let key = scan::normalize_path(&publish);
        assert_eq!(
            cache.versions(&key, "CHAR_CatStompie_001"),
            &["v003", "v002", "v001"]
        );
        assert_eq!(cache.latest(&key, "CHAR_CatStompie_001"), Some("v003"));
    }

    #[test]
    fn files_in_publish_root_use_filename_versions() {
        let dir = tempfile::tempdir().unwrap();
        for version in ["v001", "v002"] {
            fs::write(
                dir.path()
                    .join(format!("Ep04_sq0070_SH0170__FX_Smoke_001_{version}.vdb")),
                b"",
            )
            .unwrap();
        }
        let mut cache = VersionCache::new();
        let data = cache.build_cache(dir.path(), None);
        assert_eq!(data.get("FX_Smoke_001").unwrap(), &["v002", "v001"]);
    }

    #[test]
    fn camera_assets_are_keyed_by_name_only() {
        let dir = tempfile::tempdir().unwrap();
        let vdir = dir.path().join("v001");
        fs::create_dir(&vdir).unwrap();
        fs::write(vdir.join("Ep04_sq0070_SH0170__SWA_Ep04_SH0170_camera.abc"), b"").unwrap();

        let mut cache = VersionCache::new();
        let patterns = PatternSet::defaults();
        cache.build_cache(dir.path(), Some(&patterns));
        let key = scan::normalize_path(dir.path());
        assert_eq!(cache.latest(&key, "SWA_Ep04_SH0170_camera"), Some("v001"));
    }

    #[test]
    fn missing_publish_path_yields_empty_entry() {
        let mut cache = VersionCache::new();
        let data = cache.build_cache(Path::new("/nonexistent/publish"), None);
        assert!(data.is_empty());
        assert_eq!(cache.versions("/nonexistent/publish", "X_Y_001"), &[] as &[String]);
        assert_eq!(cache.latest("/nonexistent/publish", "X_Y_001"), None);
    }

    #[test]
    fn rebuild_replaces_previous_entry() {
        let (_tmp, publish) = versioned_publish_tree();
        let mut cache = VersionCache::new();
        cache.build_cache(&publish, None);
        let key = scan::normalize_path(&publish);
        assert_eq!(cache.versions(&key, "CHAR_CatStompie_001").len(), 3);

        fs::remove_dir_all(publish.join("v003")).unwrap();
        cache.build_cache(&publish, None);
        assert_eq!(cache.versions(&key, "CHAR_CatStompie_001"), &["v002", "v001"]);
    }

    #[test]
    fn snapshot_round_trip_is_lossless() {
        let (_tmp, publish) = versioned_publish_tree();
        let mut cache = VersionCache::new();
        cache.build_cache(&publish, None);

        let snapshot_dir = tempfile::tempdir().unwrap();
        let snapshot = snapshot_dir.path().join("version_cache.json");
        cache.save(&snapshot).unwrap();

        let mut restored = VersionCache::new();
        restored.load(&snapshot).unwrap();
        assert_eq!(restored, cache);

        let key = scan::normalize_path(&publish);
        assert_eq!(
            restored.versions(&key, "CHAR_CatStompie_001"),
            cache.versions(&key, "CHAR_CatStompie_001")
        );
    }

    #[test]
    fn load_missing_snapshot_is_a_no_op() {
        let mut cache = VersionCache::new();
        cache.load(Path::new("/nonexistent/cache.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn load_malformed_snapshot_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{broken").unwrap();
        let mut cache = VersionCache::new();
        let err = cache.load(&path).unwrap_err();
        assert!(matches!(err, CacheError::Format { .. }));
    }

    #[test]
    fn clear_drops_everything() {
        let (_tmp, publish) = versioned_publish_tree();
        let mut cache = VersionCache::new();
        cache.build_cache(&publish, None);
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
