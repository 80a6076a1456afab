//! Publish-directory scanning.
//!
//! A publish tree holds versioned files in one of two shapes: directly under
//! `publish/` with the version embedded in the filename, or grouped into
//! `publish/v###/` subdirectories. The scanner handles both and records
//! where each version label came from.
//!
//! Scanning is deliberately forgiving: a missing or non-directory path, an
//! unreadable entry, or an unparseable filename is logged and skipped, never
//! fatal. Parsing tries the configured `fullFilename` pattern first and
//! falls back to a hand-written splitter that also understands the camera
//! naming rule (asset part ending in `_camera`).

use std::path::Path;
use std::sync::OnceLock;

use core_patterns::PatternSet;
use regex::Regex;
use tracing::{debug, info, warn};

/// Extensions scanned when the caller supplies no list.
pub const DEFAULT_EXTENSIONS: &[&str] = &["abc", "ma", "mb", "vdb", "ass", "rs"];

/// Asset type assigned to camera publishes.
pub const CAMERA_TYPE: &str = "CAM";

/// Variant assigned to camera publishes (cameras carry no variant segment).
pub const CAMERA_VARIANT: &str = "001";

fn version_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v\d{3}$").expect("version dir regex compiles"))
}

fn version_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"v\d{3}").expect("version label regex compiles"))
}

/// Where a scanned file's version label was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    /// Enclosing `publish/v###/` directory name.
    Directory,
    /// `v###` embedded in the filename.
    Filename,
}

/// One parsed file from a publish tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedAsset {
    pub ep: String,
    pub seq: String,
    pub shot: String,
    pub asset_type: String,
    pub asset_name: String,
    pub variant: String,
    pub extension: String,
    pub filename: String,
    /// Normalized (forward-slash) absolute path.
    pub full_path: String,
    pub version: Option<String>,
    pub version_source: Option<VersionSource>,
}

impl ScannedAsset {
    /// Publish-level asset key: `TYPE_name_variant`, or the bare name for
    /// cameras.
    pub fn asset_key(&self) -> String {
        asset_key(&self.asset_type, &self.asset_name, &self.variant)
    }
}

/// Builds the publish-level asset key. Cameras use the name verbatim.
pub fn asset_key(asset_type: &str, asset_name: &str, variant: &str) -> String {
    if asset_type == CAMERA_TYPE {
        asset_name.to_string()
    } else {
        format!("{asset_type}_{asset_name}_{variant}")
    }
}

/// Normalizes a filesystem path into the core's POSIX-style string form.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Is `name` a `v###` version directory name?
pub fn is_version_dir(name: &str) -> bool {
    version_dir_regex().is_match(name)
}

/// Extracts the first `v###` label from a string, if any.
pub fn extract_version_label(text: &str) -> Option<String> {
    version_label_regex()
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Hand-written filename parser used when no pattern set is supplied or the
/// configured pattern does not match.
///
/// Standard shape: `<ep>_<seq>_<shot>__<TYPE>_<Name>_<variant>.<ext>` with a
/// possibly multi-part name. Files published directly into `publish/` append
/// a version segment (`..._<variant>_v###.<ext>`); a trailing `v###` segment
/// is recognized and excluded from the variant. Camera shape: the asset part
/// ends in `_camera`; the whole asset part becomes the name, type `CAM`,
/// variant `001`.
pub fn parse_filename_fallback(filename: &str) -> Option<ScannedAsset> {
    let (stem, extension) = filename.rsplit_once('.')?;
    let (shot_part, asset_part) = stem.split_once("__")?;

    let mut shot_parts = shot_part.split('_');
    let ep = shot_parts.next()?;
    let seq = shot_parts.next()?;
    let shot = shot_parts.next()?;
    if !(ep.starts_with("Ep") && seq.starts_with("sq") && shot.starts_with("SH")) {
        return None;
    }

    let (asset_type, asset_name, variant) = if asset_part.ends_with("_camera") {
        (
            CAMERA_TYPE.to_string(),
            asset_part.to_string(),
            CAMERA_VARIANT.to_string(),
        )
    } else {
        let mut parts: Vec<&str> = asset_part.split('_').collect();
        // Trailing v### is a version suffix, not the variant.
        if parts.len() >= 4 && is_version_dir(parts[parts.len() - 1]) {
            parts.pop();
        }
        if parts.len() < 3 {
            return None;
        }
        let asset_type = parts[0].to_string();
        let variant = parts[parts.len() - 1].to_string();
        let asset_name = parts[1..parts.len() - 1].join("_");
        (asset_type, asset_name, variant)
    };

    Some(ScannedAsset {
        ep: ep.to_string(),
        seq: seq.to_string(),
        shot: shot.to_string(),
        asset_type,
        asset_name,
        variant,
        extension: extension.to_string(),
        filename: filename.to_string(),
        full_path: String::new(),
        version: None,
        version_source: None,
    })
}

fn parse_entry(filename: &str, patterns: Option<&PatternSet>) -> Option<ScannedAsset> {
    if let Some(patterns) = patterns {
        if let Some(parts) = patterns.parse_filename(filename) {
            return Some(ScannedAsset {
                ep: parts.ep,
                seq: parts.seq,
                shot: parts.shot,
                asset_type: parts.asset_type,
                asset_name: parts.asset_name,
                variant: parts.variant,
                extension: parts.extension,
                filename: filename.to_string(),
                full_path: String::new(),
                version: None,
                version_source: None,
            });
        }
    }
    // Cameras and pattern misses both land here.
    parse_filename_fallback(filename)
}

/// Scans one directory level for publish files, using the default extension
/// set.
pub fn scan_publish_directory(path: &Path, patterns: Option<&PatternSet>) -> Vec<ScannedAsset> {
    let extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect();
    scan_publish_directory_with(path, patterns, &extensions)
}

/// Scans one directory level for publish files with an explicit extension
/// list (no leading dots). Subdirectories are not descended into here; the
/// cache layer walks `v###` subdirectories itself.
pub fn scan_publish_directory_with(
    path: &Path,
    patterns: Option<&PatternSet>,
    extensions: &[String],
) -> Vec<ScannedAsset> {
    if !path.exists() {
        warn!(target: "cache.scan", path = %path.display(), "publish directory does not exist");
        return Vec::new();
    }
    if !path.is_dir() {
        warn!(target: "cache.scan", path = %path.display(), "path is not a directory");
        return Vec::new();
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(target: "cache.scan", path = %path.display(), error = %e, "failed to read directory");
            return Vec::new();
        }
    };

    let mut assets = Vec::new();
    let mut unparseable = 0usize;

    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            continue;
        }
        let Some(filename) = entry_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = filename.to_ascii_lowercase();
        let matches_ext = extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext.to_ascii_lowercase())));
        if !matches_ext {
            continue;
        }

        match parse_entry(filename, patterns) {
            Some(mut asset) => {
                asset.full_path = normalize_path(&entry_path);
                let parent_name = entry_path
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .unwrap_or("");
                if let Some(label) = extract_version_label(parent_name) {
                    asset.version = Some(label);
                    asset.version_source = Some(VersionSource::Directory);
                } else if let Some(label) = extract_version_label(filename) {
                    asset.version = Some(label);
                    asset.version_source = Some(VersionSource::Filename);
                }
                assets.push(asset);
            }
            None => {
                unparseable += 1;
                debug!(target: "cache.scan", filename, "could not parse filename");
            }
        }
    }

    // Directory iteration order is platform-dependent; sort for stable output.
    assets.sort_by(|a, b| a.filename.cmp(&b.filename));

    if assets.is_empty() {
        warn!(target: "cache.scan", path = %path.display(), "no valid assets found");
    } else {
        info!(
            target: "cache.scan",
            path = %path.display(),
            found = assets.len(),
            unparseable,
            "publish directory scanned"
        );
    }

    assets
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn fallback_parses_standard_filename() {
        let asset = parse_filename_fallback("Ep04_sq0070_SH0170__CHAR_CatStompie_001.abc").unwrap();
        assert_eq!(asset.ep, "Ep04");
        assert_eq!(asset.seq, "sq0070");
        assert_eq!(asset.shot, "SH0170");
        assert_eq!(asset.asset_type, "CHAR");
        assert_eq!(asset.asset_name, "CatStompie");
        assert_eq!(asset.variant, "001");
        assert_eq!(asset.extension, "abc");
        assert_eq!(asset.asset_key(), "CHAR_CatStompie_001");
    }

    #[test]
    fn fallback_parses_camera_filename() {
        let asset =
            parse_filename_fallback("Ep04_sq0070_SH0170__SWA_Ep04_SH0170_camera.abc").unwrap();
        assert_eq!(asset.asset_type, "CAM");
        assert_eq!(asset.asset_name, "SWA_Ep04_SH0170_camera");
        assert_eq!(asset.variant, "001");
        assert_eq!(asset.extension, "abc");
        // Camera key is the bare name.
        assert_eq!(asset.asset_key(), "SWA_Ep04_SH0170_camera");
    }

    #[test]
    fn fallback_handles_multi_part_names() {
        let asset = parse_filename_fallback("Ep01_sq0010_SH0010__PROP_Old_Lantern_002.ma").unwrap();
        assert_eq!(asset.asset_name, "Old_Lantern");
        assert_eq!(asset.variant, "002");
    }

    #[test]
    fn fallback_strips_trailing_version_segment() {
        let asset =
            parse_filename_fallback("Ep04_sq0070_SH0170__FX_Smoke_001_v002.vdb").unwrap();
        assert_eq!(asset.asset_type, "FX");
        assert_eq!(asset.asset_name, "Smoke");
        assert_eq!(asset.variant, "001");
        assert_eq!(asset.asset_key(), "FX_Smoke_001");
    }

    #[test]
    fn fallback_rejects_bad_shapes() {
        assert!(parse_filename_fallback("no_double_underscore.abc").is_none());
        assert!(parse_filename_fallback("Xx04_sq0070_SH0170__CHAR_Cat_001.abc").is_none());
        assert!(parse_filename_fallback("Ep04_sq0070_SH0170__CHAR_001.abc").is_none());
        assert!(parse_filename_fallback("noextension").is_none());
    }

    #[test]
    fn scan_missing_directory_returns_empty() {
        let assets = scan_publish_directory(Path::new("/nonexistent/publish"), None);
        assert!(assets.is_empty());
    }

    #[test]
    fn scan_picks_up_versions_from_filenames() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Ep04_sq0070_SH0170__CHAR_CatStompie_001_v002.abc"),
            b"",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let patterns = PatternSet::defaults();
        let assets = scan_publish_directory(dir.path(), Some(&patterns));
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].version.as_deref(), Some("v002"));
        assert_eq!(assets[0].version_source, Some(VersionSource::Filename));
    }

    #[test]
    fn scan_inside_version_dir_takes_dir_label() {
        let dir = tempfile::tempdir().unwrap();
        let vdir = dir.path().join("v003");
        fs::create_dir(&vdir).unwrap();
        fs::write(vdir.join("Ep04_sq0070_SH0170__CHAR_CatStompie_001.abc"), b"").unwrap();

        let assets = scan_publish_directory(&vdir, None);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].version.as_deref(), Some("v003"));
        assert_eq!(assets[0].version_source, Some(VersionSource::Directory));
        assert!(assets[0].full_path.ends_with("CHAR_CatStompie_001.abc"));
        assert!(!assets[0].full_path.contains('\\'));
    }

    #[test]
    fn scan_skips_subdirectories_and_unparseable_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("v001")).unwrap();
        fs::write(dir.path().join("garbage.abc"), b"").unwrap();
        fs::write(dir.path().join("Ep04_sq0070_SH0170__CHAR_Cat_001.abc"), b"").unwrap();

        let assets = scan_publish_directory(dir.path(), None);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].asset_name, "Cat");
    }

    #[test]
    fn missing_directory_warns_on_scan_target() {
        use std::io::Write;
        use std::sync::{Arc, Mutex, MutexGuard};
        use tracing::Level;
        use tracing::subscriber::with_default;
        use tracing_subscriber::fmt::MakeWriter;

        #[derive(Clone)]
        struct BufferWriter {
            inner: Arc<Mutex<Vec<u8>>>,
        }

        struct LockedWriter<'a> {
            guard: MutexGuard<'a, Vec<u8>>,
        }

        impl Write for LockedWriter<'_> {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.guard.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl<'a> MakeWriter<'a> for BufferWriter {
            type Writer = LockedWriter<'a>;

            fn make_writer(&'a self) -> Self::Writer {
                LockedWriter {
                    guard: self.inner.lock().expect("log buffer poisoned"),
                }
            }
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = BufferWriter {
            inner: buffer.clone(),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        with_default(subscriber, || {
            let assets = scan_publish_directory(Path::new("/nonexistent/publish"), None);
            assert!(assets.is_empty());
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(output.contains("cache.scan"));
        assert!(output.contains("publish directory does not exist"));
    }

    #[test]
    fn version_dir_name_check() {
        assert!(is_version_dir("v001"));
        assert!(is_version_dir("v123"));
        assert!(!is_version_dir("v1"));
        assert!(!is_version_dir("v0001"));
        assert!(!is_version_dir("ver001"));
    }
}
