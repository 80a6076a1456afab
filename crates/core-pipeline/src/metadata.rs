//! Sidecar shot-metadata ingest.
//!
//! A shot may carry a JSON sidecar file at its root (default name
//! `.{shot_id}.json`) holding editorial data: frame range and fps. The
//! field names and the frame-range layout are configurable per project
//! (`shotMetadata.fieldMapping`); three layouts are recognized:
//!
//! * `range`: `"sequence_frames": "1001-1030"`
//! * `nested`: `"shot_info": {"start_frame": 1001, "end_frame": 1030}`
//! * `separate`: root-level `start_frame` / `end_frame`
//!
//! Everything here is best-effort: a missing file, unknown field, or
//! malformed value yields `None` for that piece of metadata, logged at
//! DEBUG/WARN, never an error.

use std::path::{Path, PathBuf};

use core_config::{FrameRangeFormat, ShotMetadataConfig};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Metadata recovered from a sidecar file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShotMetadata {
    pub frame_range: Option<(i64, i64)>,
    pub fps: Option<f64>,
}

impl ShotMetadata {
    pub fn is_empty(&self) -> bool {
        self.frame_range.is_none() && self.fps.is_none()
    }
}

/// Reads sidecar files per the project's `shotMetadata` conventions.
#[derive(Debug, Clone, Copy)]
pub struct ShotMetadataLoader<'a> {
    config: &'a ShotMetadataConfig,
}

impl<'a> ShotMetadataLoader<'a> {
    pub fn new(config: &'a ShotMetadataConfig) -> Self {
        Self { config }
    }

    /// Sidecar path for a shot: the configured filename pattern with
    /// `{shot_id}` substituted, under the shot root.
    pub fn sidecar_path(&self, shot_id: &str, shot_root: &Path) -> PathBuf {
        let filename = self.config.filename_pattern.replace("{shot_id}", shot_id);
        shot_root.join(filename)
    }

    fn read_document(path: &Path) -> Option<Value> {
        if !path.exists() {
            debug!(target: "pipeline.metadata", path = %path.display(), "sidecar file not found");
            return None;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(target: "pipeline.metadata", path = %path.display(), error = %e, "failed to read sidecar");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(target: "pipeline.metadata", path = %path.display(), error = %e, "sidecar is not valid JSON");
                None
            }
        }
    }

    /// Frame range from a sidecar document on disk.
    pub fn load_frame_range(&self, sidecar: &Path) -> Option<(i64, i64)> {
        let doc = Self::read_document(sidecar)?;
        self.frame_range_from(&doc)
    }

    fn frame_range_from(&self, doc: &Value) -> Option<(i64, i64)> {
        let mapping = &self.config.field_mapping.frame_range;
        match mapping.parse_format {
            FrameRangeFormat::Nested => {
                let nested = doc.get(&mapping.json_field)?;
                let nested = nested.as_object().or_else(|| {
                    warn!(
                        target: "pipeline.metadata",
                        field = %mapping.json_field,
                        "frame-range field is not an object"
                    );
                    None
                })?;
                let start = nested
                    .get(&mapping.start_field)
                    .and_then(Value::as_i64)
                    .unwrap_or(mapping.default_start);
                let end = nested
                    .get(&mapping.end_field)
                    .and_then(Value::as_i64)
                    .unwrap_or(mapping.default_end);
                Some((start, end))
            }
            FrameRangeFormat::Range => {
                let value = doc.get(&mapping.json_field)?.as_str()?;
                let (start, end) = value.trim().split_once('-')?;
                let start = start.trim().parse().ok()?;
                let end = end.trim().parse().ok()?;
                Some((start, end))
            }
            FrameRangeFormat::Separate => {
                let start = doc
                    .get(&mapping.start_field)
                    .and_then(Value::as_i64)
                    .unwrap_or(mapping.default_start);
                let end = doc
                    .get(&mapping.end_field)
                    .and_then(Value::as_i64)
                    .unwrap_or(mapping.default_end);
                Some((start, end))
            }
        }
    }

    /// FPS from a sidecar document on disk.
    pub fn load_fps(&self, sidecar: &Path) -> Option<f64> {
        let doc = Self::read_document(sidecar)?;
        self.fps_from(&doc)
    }

    fn fps_from(&self, doc: &Value) -> Option<f64> {
        let mapping = &self.config.field_mapping.fps;
        let value = doc.get(&mapping.json_field)?;
        match value.as_f64() {
            Some(fps) => Some(fps),
            None => {
                // A quoted number ("25") still counts.
                value.as_str().and_then(|s| s.trim().parse().ok())
            }
        }
    }

    /// Loads whatever metadata the sidecar holds for `shot_id`.
    pub fn load_all(&self, shot_id: &str, shot_root: &Path) -> ShotMetadata {
        let sidecar = self.sidecar_path(shot_id, shot_root);
        let Some(doc) = Self::read_document(&sidecar) else {
            return ShotMetadata::default();
        };
        let metadata = ShotMetadata {
            frame_range: self.frame_range_from(&doc),
            fps: self.fps_from(&doc),
        };
        info!(
            target: "pipeline.metadata",
            shot = shot_id,
            sidecar = %sidecar.display(),
            frame_range = ?metadata.frame_range,
            fps = ?metadata.fps,
            "sidecar metadata loaded"
        );
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(parse_format: &str) -> ShotMetadataConfig {
        let json_field = match parse_format {
            "nested" => "shot_info",
            _ => "sequence_frames",
        };
        serde_json::from_value(json!({
            "enabled": true,
            "fieldMapping": {
                "frameRange": {
                    "jsonField": json_field,
                    "parseFormat": parse_format
                }
            }
        }))
        .unwrap()
    }

    fn write_sidecar(dir: &Path, shot_id: &str, doc: &Value) -> PathBuf {
        let path = dir.join(format!(".{shot_id}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
        path
    }

    #[test]
    fn sidecar_path_uses_filename_pattern() {
        let cfg = config("range");
        let loader = ShotMetadataLoader::new(&cfg);
        let path = loader.sidecar_path("Ep04_sq0070_SH0180", Path::new("/shots/SH0180"));
        assert_eq!(
            path,
            Path::new("/shots/SH0180/.Ep04_sq0070_SH0180.json")
        );
    }

    #[test]
    fn range_format_parses_start_dash_end() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("range");
        let loader = ShotMetadataLoader::new(&cfg);
        write_sidecar(
            dir.path(),
            "Ep04_sq0070_SH0180",
            &json!({"sequence_frames": "1001-1030", "fps": 24.0}),
        );
        let metadata = loader.load_all("Ep04_sq0070_SH0180", dir.path());
        assert_eq!(metadata.frame_range, Some((1001, 1030)));
        assert_eq!(metadata.fps, Some(24.0));
    }

    #[test]
    fn nested_format_reads_subobject_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("nested");
        let loader = ShotMetadataLoader::new(&cfg);
        write_sidecar(
            dir.path(),
            "Ep04_sq0070_SH0180",
            &json!({"shot_info": {"start_frame": 1009}}),
        );
        let metadata = loader.load_all("Ep04_sq0070_SH0180", dir.path());
        // end_frame missing: the configured default fills in.
        assert_eq!(metadata.frame_range, Some((1009, 1100)));
    }

    #[test]
    fn separate_format_reads_root_fields() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("separate");
        let loader = ShotMetadataLoader::new(&cfg);
        write_sidecar(
            dir.path(),
            "Ep04_sq0070_SH0180",
            &json!({"start_frame": 1001, "end_frame": 1050}),
        );
        let metadata = loader.load_all("Ep04_sq0070_SH0180", dir.path());
        assert_eq!(metadata.frame_range, Some((1001, 1050)));
    }

    #[test]
    fn missing_sidecar_yields_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("range");
        let loader = ShotMetadataLoader::new(&cfg);
        let metadata = loader.load_all("Ep04_sq0070_SH0180", dir.path());
        assert!(metadata.is_empty());
    }

    #[test]
    fn malformed_range_string_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("range");
        let loader = ShotMetadataLoader::new(&cfg);
        write_sidecar(
            dir.path(),
            "Ep04_sq0070_SH0180",
            &json!({"sequence_frames": "not a range", "fps": "25"}),
        );
        let metadata = loader.load_all("Ep04_sq0070_SH0180", dir.path());
        assert_eq!(metadata.frame_range, None);
        // Quoted fps still parses.
        assert_eq!(metadata.fps, Some(25.0));
    }
}
