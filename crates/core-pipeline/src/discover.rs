//! Asset discovery: publish trees -> asset records.
//!
//! For each department of a shot, every `v###` directory under the resolved
//! publish path is scanned (newest first) and collapsed to unique
//! `(type, name, variant)` asset identities — the first version a file is
//! seen in is therefore its latest. A new asset record is created for each
//! identity the shot does not already hold, stamped with its department,
//! latest version, extension, token template (camera-adjusted), and the
//! on-disk file path, then mirrored into the backend and auto-linked to a
//! host reference whose namespace matches.
//!
//! Cameras publish without a type prefix or variant segment, so their
//! template drops `$assetType_` and `_$variant` from the filename portion.

use std::path::{Path, PathBuf};

use core_backend::{AttrValue, RecordKind};
use core_cache::scan_publish_directory_with;
use core_model::{AssetId, CAMERA_TYPE, ShotId};
use core_resolve::ASSET_PATH_TEMPLATE;
use tracing::{debug, info, warn};

use crate::{Pipeline, PipelineError};

/// Filename portion of the standard asset template.
const STANDARD_FILENAME_SEGMENT: &str = "$ep_$seq_$shot__$assetType_$assetName_$variant.$ext";

/// Camera replacement: no type prefix, no variant.
const CAMERA_FILENAME_SEGMENT: &str = "$ep_$seq_$shot__$assetName.$ext";

/// One asset record created by a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAsset {
    pub asset_id: AssetId,
    pub version: String,
    pub file_path: String,
    /// Whether a matching host reference was linked during discovery.
    pub linked: bool,
}

impl Pipeline {
    /// Scans the given (or all) departments of a shot and creates asset
    /// records for every published asset the shot does not already hold.
    pub fn discover_shot_assets(
        &mut self,
        shot_id: &ShotId,
        departments: Option<&[String]>,
    ) -> Result<Vec<DiscoveredAsset>, PipelineError> {
        let departments: Vec<String> = match departments {
            Some(list) => list.to_vec(),
            None => self.departments(),
        };
        let mut created = Vec::new();
        for dept in &departments {
            created.extend(self.discover_department(shot_id, dept)?);
        }
        info!(
            target: "pipeline.discover",
            shot = shot_id.as_str(),
            created = created.len(),
            "asset discovery finished"
        );
        Ok(created)
    }

    fn discover_department(
        &mut self,
        shot_id: &ShotId,
        dept: &str,
    ) -> Result<Vec<DiscoveredAsset>, PipelineError> {
        let publish_path = match self.publish_path(shot_id, dept) {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    target: "pipeline.discover",
                    shot = shot_id.as_str(),
                    dept,
                    error = %e,
                    "publish path unresolvable, skipping department"
                );
                return Ok(Vec::new());
            }
        };
        let publish = Path::new(&publish_path);
        if !publish.exists() {
            debug!(target: "pipeline.discover", path = %publish_path, "publish path does not exist");
            return Ok(Vec::new());
        }

        // Newest first, so the first sighting of an identity is its latest.
        let mut version_dirs: Vec<(String, PathBuf)> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(publish) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if path.is_dir() && core_cache::is_version_dir(name) {
                    version_dirs.push((name.to_string(), path));
                }
            }
        }
        if version_dirs.is_empty() {
            debug!(target: "pipeline.discover", path = %publish_path, "no version directories");
            return Ok(Vec::new());
        }
        version_dirs.sort_by(|a, b| b.0.cmp(&a.0));
        info!(
            target: "pipeline.discover",
            dept,
            path = %publish_path,
            versions = version_dirs.len(),
            "scanning publish versions"
        );

        let extensions = self.config.supported_extensions().to_vec();
        let mut unique: Vec<(String, core_cache::ScannedAsset)> = Vec::new();
        for (version, dir) in &version_dirs {
            for scanned in scan_publish_directory_with(dir, Some(&self.patterns), &extensions) {
                let seen = unique.iter().any(|(_, existing)| {
                    existing.asset_type == scanned.asset_type
                        && existing.asset_name == scanned.asset_name
                        && existing.variant == scanned.variant
                });
                if !seen {
                    unique.push((version.clone(), scanned));
                }
            }
        }

        let mut created = Vec::new();
        for (version, scanned) in unique {
            let exists = self.graph.shot(shot_id)?.assets().iter().any(|a| {
                a.asset_type() == scanned.asset_type
                    && a.asset_name() == scanned.asset_name
                    && a.variant() == scanned.variant
                    && a.department() == dept
            });
            if exists {
                debug!(
                    target: "pipeline.discover",
                    asset = %scanned.asset_key(),
                    dept,
                    "asset already exists, skipping"
                );
                continue;
            }

            let asset_id = self.graph.create_asset(
                shot_id,
                &scanned.asset_type,
                &scanned.asset_name,
                &scanned.variant,
                Some(dept),
            )?;

            let template = self.asset_template_for(&scanned.asset_type);
            if template.is_none() {
                warn!(
                    target: "pipeline.discover",
                    asset = asset_id.as_str(),
                    "no '{ASSET_PATH_TEMPLATE}' template in config; path refresh disabled for this asset"
                );
            }
            {
                let asset = self.graph.asset_mut(&asset_id)?;
                asset.version = Some(version.clone());
                asset.extension = Some(scanned.extension.clone());
                asset.template = template;
                asset.resolved_file_path = Some(scanned.full_path.clone());
            }

            self.mirror_asset(shot_id, &asset_id)?;
            let linked = self.autolink_asset(&asset_id)?;

            info!(
                target: "pipeline.discover",
                asset = asset_id.as_str(),
                version = %version,
                linked,
                "asset record created"
            );
            created.push(DiscoveredAsset {
                asset_id,
                version,
                file_path: scanned.full_path,
                linked,
            });
        }
        Ok(created)
    }

    /// The raw token template stored on new assets; cameras get the
    /// filename segment rewritten to drop type and variant.
    fn asset_template_for(&self, asset_type: &str) -> Option<String> {
        let base = self.config.template(ASSET_PATH_TEMPLATE)?;
        if asset_type == CAMERA_TYPE {
            Some(base.replace(STANDARD_FILENAME_SEGMENT, CAMERA_FILENAME_SEGMENT))
        } else {
            Some(base.to_string())
        }
    }

    /// Mirrors an asset record into the backend and connects it to its
    /// shot's record.
    pub(crate) fn mirror_asset(
        &mut self,
        shot_id: &ShotId,
        asset_id: &AssetId,
    ) -> Result<(), PipelineError> {
        let (name, asset_type, asset_name, variant, namespace, department, version) = {
            let asset = self.graph.asset(asset_id)?;
            (
                format!("CTX_Asset_{}", asset.asset_key()),
                asset.asset_type().to_string(),
                asset.asset_name().to_string(),
                asset.variant().to_string(),
                asset.namespace.clone(),
                asset.department().to_string(),
                asset.version().unwrap_or_default().to_string(),
            )
        };
        let record = self.backend.create_record(RecordKind::Asset, &name)?;
        self.backend
            .set_attr(&record, "asset_type", AttrValue::Str(asset_type))?;
        self.backend
            .set_attr(&record, "asset_name", AttrValue::Str(asset_name))?;
        self.backend
            .set_attr(&record, "variant", AttrValue::Str(variant))?;
        self.backend
            .set_attr(&record, "namespace", AttrValue::Str(namespace))?;
        self.backend
            .set_attr(&record, "department", AttrValue::Str(department))?;
        self.backend
            .set_attr(&record, "version", AttrValue::Str(version))?;
        if let Some(shot_record) = self.shot_records.get(shot_id).cloned() {
            self.backend
                .connect(&record, "shot", &shot_record, "assets")?;
        }
        self.asset_records.insert(asset_id.clone(), record);
        Ok(())
    }

    /// Links a freshly discovered asset to the host reference matching its
    /// namespace, when one is loaded.
    fn autolink_asset(&mut self, asset_id: &AssetId) -> Result<bool, PipelineError> {
        let namespace = self.graph.asset(asset_id)?.namespace.clone();
        match self.backend.find_reference_by_namespace(&namespace) {
            Some(ref_id) => {
                self.backend.link(asset_id.as_str(), &ref_id)?;
                self.graph.asset_mut(asset_id)?.host_ref = Some(ref_id);
                Ok(true)
            }
            None => {
                debug!(
                    target: "pipeline.discover",
                    asset = asset_id.as_str(),
                    namespace = %namespace,
                    "no matching host reference; will link when loaded"
                );
                Ok(false)
            }
        }
    }
}
