//! Platform detection and cross-OS path mapping.
//!
//! Paths inside the core are normalized POSIX-style strings (forward
//! slashes); conversion to native separators happens only at the backend
//! boundary. Mapping replaces the longest matching root prefix from the
//! source platform's table with the same root's prefix from the target
//! platform's table. A path whose prefix matches no root passes through
//! unchanged, which also makes mapping idempotent when source and target
//! agree.
//!
//! The mapper's tables are the normalized `roots` overlaid with the optional
//! `platform_mapping` section, so a config that only declares one of the two
//! still maps.

use crate::{ProjectConfig, RootTables};
use tracing::trace;

/// Operating-system families the pipeline distinguishes.
///
/// macOS shares mount conventions with Linux here; unknown systems fall back
/// to Windows, matching the studio deployment default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    Windows,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") || cfg!(target_os = "macos") {
            Platform::Linux
        } else {
            Platform::Windows
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
        }
    }

    /// Parses a config section key (`windows` / `linux`).
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "windows" => Some(Platform::Windows),
            "linux" => Some(Platform::Linux),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Platform::Windows => Platform::Linux,
            Platform::Linux => Platform::Windows,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps root-prefixed paths between OS mount conventions.
#[derive(Debug, Clone)]
pub struct PlatformMapper {
    tables: RootTables,
    current: Platform,
}

/// Normalizes separators to forward slashes. Drive letters (`V:/`) and UNC
/// prefixes (`//server/share`) survive unchanged apart from the slashes.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

impl PlatformMapper {
    /// Builds a mapper for the detected platform.
    pub fn new(config: &ProjectConfig) -> Self {
        Self::with_platform(config, Platform::current())
    }

    /// Builds a mapper pretending to run on `current`; tests and remote
    /// submission tooling use this to map for a machine they are not on.
    pub fn with_platform(config: &ProjectConfig, current: Platform) -> Self {
        let tables = config.roots().overlaid(config.platform_mapping());
        Self { tables, current }
    }

    pub fn current_platform(&self) -> Platform {
        self.current
    }

    /// Root prefix by name for `target` (current platform when `None`).
    pub fn root_for(&self, root_name: &str, target: Option<Platform>) -> Option<&str> {
        let platform = target.unwrap_or(self.current);
        self.tables.get(root_name, Some(platform))
    }

    pub fn root_names(&self) -> Vec<&str> {
        self.tables.names()
    }

    /// Rewrites `path` for `target` (current platform when `None`).
    ///
    /// Steps: normalize separators, detect the source platform by longest
    /// root-prefix match, and replace that prefix with the same root's
    /// target-platform prefix. Unmatched paths are returned normalized but
    /// otherwise untouched.
    pub fn map(&self, path: &str, target: Option<Platform>) -> String {
        let target = target.unwrap_or(self.current);
        let normalized = normalize_separators(path);

        let source = self.detect_path_platform(&normalized);
        if source == target {
            return normalized;
        }

        // Longest source prefix wins so nested roots (e.g. projRoot inside
        // siteRoot) pick the most specific mapping.
        let mut best: Option<(String, &str)> = None;
        for (name, source_root) in self.tables.table(source) {
            let source_prefix = normalize_separators(source_root);
            if !normalized.starts_with(&source_prefix) {
                continue;
            }
            let Some(target_root) = self.tables.get(name, Some(target)) else {
                continue;
            };
            let better = best
                .as_ref()
                .map(|(prefix, _)| source_prefix.len() > prefix.len())
                .unwrap_or(true);
            if better {
                best = Some((source_prefix, target_root));
            }
        }

        match best {
            Some((source_prefix, target_root)) => {
                let mapped = format!("{target_root}{}", &normalized[source_prefix.len()..]);
                let mapped = normalize_separators(&mapped);
                trace!(
                    target: "platform",
                    from = %source,
                    to = %target,
                    path = %normalized,
                    mapped = %mapped,
                    "path mapped"
                );
                mapped
            }
            None => normalized,
        }
    }

    /// Which platform's root tables contain the longest prefix of `path`.
    /// Falls back to the current platform when nothing matches.
    fn detect_path_platform(&self, normalized: &str) -> Platform {
        let mut best: Option<(usize, Platform)> = None;
        for platform in [Platform::Windows, Platform::Linux] {
            for root in self.tables.table(platform).values() {
                let prefix = normalize_separators(root);
                if normalized.starts_with(&prefix) {
                    let better = best.map(|(len, _)| prefix.len() > len).unwrap_or(true);
                    if better {
                        best = Some((prefix.len(), platform));
                    }
                }
            }
        }
        best.map(|(_, platform)| platform).unwrap_or(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectConfig;
    use serde_json::json;

    fn mapper(current: Platform) -> PlatformMapper {
        let doc = json!({
            "version": "1.1",
            "project": {"name": "Shadow Wars", "code": "SWA"},
            "roots": {
                "windows": {"projRoot": "V:/"},
                "linux": {"projRoot": "/mnt/igloo_swa_v/"}
            },
            "staticPaths": {"sceneBase": "all/scene"},
            "templates": {"publishPath": "$projRoot$project"},
            "patterns": {},
            "platform_mapping": {
                "windows": {"projRoot": "V:/", "imgRoot": "W:/"},
                "linux": {"projRoot": "/mnt/igloo_swa_v/", "imgRoot": "/mnt/igloo_swa_w/"}
            }
        });
        let config = ProjectConfig::from_document(doc, None).unwrap();
        PlatformMapper::with_platform(&config, current)
    }

    #[test]
    fn maps_windows_path_to_linux() {
        let m = mapper(Platform::Windows);
        assert_eq!(
            m.map("V:/SWA/all/scene/Ep04", Some(Platform::Linux)),
            "/mnt/igloo_swa_v/SWA/all/scene/Ep04"
        );
    }

    #[test]
    fn maps_linux_path_back_to_windows() {
        let m = mapper(Platform::Linux);
        assert_eq!(
            m.map("/mnt/igloo_swa_v/SWA/all/scene/Ep04", Some(Platform::Windows)),
            "V:/SWA/all/scene/Ep04"
        );
    }

    #[test]
    fn round_trip_is_identity_modulo_normalization() {
        let m = mapper(Platform::Windows);
        let original = r"V:\SWA\all\scene\Ep04";
        let there = m.map(original, Some(Platform::Linux));
        let back = m.map(&there, Some(Platform::Windows));
        assert_eq!(back, normalize_separators(original));
    }

    #[test]
    fn same_platform_map_only_normalizes() {
        let m = mapper(Platform::Windows);
        assert_eq!(
            m.map(r"V:\SWA\all\scene", Some(Platform::Windows)),
            "V:/SWA/all/scene"
        );
    }

    #[test]
    fn unmatched_prefix_passes_through() {
        let m = mapper(Platform::Windows);
        assert_eq!(
            m.map("X:/elsewhere/file.abc", Some(Platform::Linux)),
            "X:/elsewhere/file.abc"
        );
    }

    #[test]
    fn source_platform_detected_from_path_not_host() {
        // Host claims Windows, path is clearly a Linux mount: mapping to
        // linux must be a no-op rather than double-applied.
        let m = mapper(Platform::Windows);
        assert_eq!(
            m.map("/mnt/igloo_swa_v/SWA", Some(Platform::Linux)),
            "/mnt/igloo_swa_v/SWA"
        );
    }

    #[test]
    fn default_target_is_current_platform() {
        let m = mapper(Platform::Linux);
        assert_eq!(m.map("V:/SWA/shot", None), "/mnt/igloo_swa_v/SWA/shot");
    }

    #[test]
    fn root_for_reads_merged_tables() {
        let m = mapper(Platform::Windows);
        // imgRoot comes only from platform_mapping, projRoot from roots.
        assert_eq!(m.root_for("imgRoot", None), Some("W:/"));
        assert_eq!(m.root_for("projRoot", Some(Platform::Linux)), Some("/mnt/igloo_swa_v/"));
        assert_eq!(m.root_for("missing", None), None);
    }

    #[test]
    fn unc_prefix_survives_normalization() {
        let m = mapper(Platform::Windows);
        assert_eq!(
            m.map(r"\\server\share\SWA", Some(Platform::Windows)),
            "//server/share/SWA"
        );
    }
}
