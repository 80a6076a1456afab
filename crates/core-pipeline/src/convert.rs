//! Scene adoption: existing host references -> managed asset records.
//!
//! A scene that predates the pipeline (or was assembled by hand) holds
//! references the graph knows nothing about. Adoption walks the backend's
//! reference list, parses each namespace with the pattern engine, and
//! creates linked asset records for the ones that fit the naming scheme —
//! the inverse of discovery, which starts from disk instead of the scene.

use core_cache::extract_version_label;
use core_model::{AssetId, ShotId};
use core_resolve::ASSET_PATH_TEMPLATE;
use tracing::{debug, info, warn};

use crate::{Pipeline, PipelineError};

/// One host reference and its management status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneAssetInfo {
    pub host_ref_id: String,
    pub namespace: String,
    pub file_path: Option<String>,
    /// Whether some asset record already links to this reference.
    pub managed: bool,
    pub linked_assets: Vec<String>,
}

impl Pipeline {
    /// Enumerates the host's references with their management status.
    pub fn detect_scene_assets(&self) -> Vec<SceneAssetInfo> {
        self.backend
            .list_references()
            .into_iter()
            .map(|reference| {
                let linked_assets = self.backend.linked_assets(&reference.id);
                SceneAssetInfo {
                    file_path: self.backend.reference_file_path(&reference.id),
                    managed: !linked_assets.is_empty(),
                    host_ref_id: reference.id,
                    namespace: reference.namespace,
                    linked_assets,
                }
            })
            .collect()
    }

    /// Adopts one reference into a shot: parses its namespace, creates the
    /// asset record (department `dept`), and links it. Returns `None` when
    /// the namespace does not fit the naming scheme. An existing record
    /// with the same identity is linked instead of duplicated.
    pub fn adopt_reference(
        &mut self,
        shot_id: &ShotId,
        host_ref_id: &str,
        dept: &str,
    ) -> Result<Option<AssetId>, PipelineError> {
        let Some(reference) = self
            .backend
            .list_references()
            .into_iter()
            .find(|r| r.id == host_ref_id)
        else {
            warn!(target: "pipeline.convert", reference = host_ref_id, "unknown reference");
            return Ok(None);
        };

        let Some(parts) = self.patterns.parse_namespace(&reference.namespace) else {
            debug!(
                target: "pipeline.convert",
                namespace = %reference.namespace,
                "namespace does not fit the naming scheme"
            );
            return Ok(None);
        };

        let existing = self
            .graph
            .shot(shot_id)?
            .assets()
            .iter()
            .find(|a| {
                a.asset_type() == parts.asset_type
                    && a.asset_name() == parts.asset_name
                    && a.variant() == parts.variant
                    && a.department() == dept
            })
            .map(|a| a.id().clone());

        let asset_id = match existing {
            Some(asset_id) => asset_id,
            None => {
                let asset_id = self.graph.create_asset(
                    shot_id,
                    &parts.asset_type,
                    &parts.asset_name,
                    &parts.variant,
                    Some(dept),
                )?;
                let file_path = self.backend.reference_file_path(host_ref_id);
                {
                    let asset = self.graph.asset_mut(&asset_id)?;
                    asset.template = self.config.template(ASSET_PATH_TEMPLATE).map(str::to_string);
                    if let Some(path) = &file_path {
                        asset.extension = path.rsplit_once('.').map(|(_, ext)| ext.to_string());
                        asset.version = extract_version_label(path);
                        asset.resolved_file_path = Some(path.clone());
                    }
                }
                self.mirror_asset(shot_id, &asset_id)?;
                asset_id
            }
        };

        self.backend.link(asset_id.as_str(), host_ref_id)?;
        self.graph.asset_mut(&asset_id)?.host_ref = Some(host_ref_id.to_string());
        info!(
            target: "pipeline.convert",
            asset = asset_id.as_str(),
            reference = host_ref_id,
            "reference adopted"
        );
        Ok(Some(asset_id))
    }

    /// Adopts every unmanaged reference whose namespace fits the naming
    /// scheme into `shot_id` under `dept`.
    pub fn adopt_scene_references(
        &mut self,
        shot_id: &ShotId,
        dept: &str,
    ) -> Result<Vec<AssetId>, PipelineError> {
        let candidates: Vec<String> = self
            .detect_scene_assets()
            .into_iter()
            .filter(|info| !info.managed)
            .map(|info| info.host_ref_id)
            .collect();
        let mut adopted = Vec::new();
        for host_ref_id in candidates {
            if let Some(asset_id) = self.adopt_reference(shot_id, &host_ref_id, dept)? {
                adopted.push(asset_id);
            }
        }
        info!(
            target: "pipeline.convert",
            shot = shot_id.as_str(),
            adopted = adopted.len(),
            "scene references adopted"
        );
        Ok(adopted)
    }
}
