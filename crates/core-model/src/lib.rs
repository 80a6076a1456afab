//! In-memory scene graph: Manager, Shot, and Asset records.
//!
//! The graph is the core's source of truth for shot/asset state, independent
//! of any host application; a scene backend mirrors these records outward.
//! One [`SceneGraph`] owns exactly one [`Manager`], the manager owns its
//! shots, and each shot owns its assets. Deleting a shot cascades to its
//! assets.
//!
//! Core invariants (must hold after every public call):
//! * No two shots share an `(ep, seq, shot)` triple.
//! * No two assets under one shot share `(type, name, variant, department)`.
//! * At most one shot has `is_active == true`.
//! * Every [`AssetId`] in the index names an existing asset in an existing
//!   shot.
//!
//! Handles ([`ShotId`], [`AssetId`]) are opaque strings minted at creation.
//! Operations on a handle whose record has been deleted fail with
//! [`GraphError::StaleHandle`]; handles are never reused to mean a different
//! record.
//!
//! Event emission: `create_shot` emits `ShotCreated` and `set_asset_version`
//! emits `VersionUpdated` before returning. `activate` is deliberately
//! emission-free — the shot switcher owns the full switch sequence and emits
//! `ShotSwitched` itself once visibility and history are settled.

use std::collections::BTreeMap;

use core_events::{ObserverId, ObserverRegistry, PipelineEvent};
use thiserror::Error;
use tracing::{debug, info};

/// Asset type that triggers the camera naming rule.
pub const CAMERA_TYPE: &str = "CAM";

/// Display-group name prefix shared with the visibility policy.
pub const DISPLAY_GROUP_PREFIX: &str = "CTX_";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("shot '{shot_id}' already exists")]
    DuplicateShot { shot_id: String },

    #[error("asset '{identity}' already exists in shot '{shot_id}'")]
    DuplicateAsset { identity: String, shot_id: String },

    #[error("stale handle: '{id}' does not name a live record")]
    StaleHandle { id: String },
}

/// Identifier for a shot: the `Ep04_sq0070_SH0170` triple join.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShotId(String);

impl ShotId {
    pub fn new(ep: &str, seq: &str, shot: &str) -> Self {
        Self(format!("{ep}_{seq}_{shot}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for an asset record, unique across the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(String);

impl AssetId {
    fn new(shot_id: &ShotId, key: &str, department: &str) -> Self {
        Self(format!("{}:{}:{}", shot_id.as_str(), key, department))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Default namespace for an asset: `TYPE_name_variant`, except cameras,
/// whose namespace is the asset name verbatim.
pub fn default_namespace(asset_type: &str, asset_name: &str, variant: &str) -> String {
    if asset_type == CAMERA_TYPE {
        asset_name.to_string()
    } else {
        format!("{asset_type}_{asset_name}_{variant}")
    }
}

/// Singleton root record.
#[derive(Debug, Clone, Default)]
pub struct Manager {
    config_path: Option<String>,
    project_root: Option<String>,
    active_shot_id: Option<ShotId>,
}

impl Manager {
    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    pub fn project_root(&self) -> Option<&str> {
        self.project_root.as_deref()
    }

    pub fn active_shot_id(&self) -> Option<&ShotId> {
        self.active_shot_id.as_ref()
    }
}

/// Per-shot record. Identity fields are immutable after creation.
#[derive(Debug, Clone)]
pub struct Shot {
    id: ShotId,
    ep: String,
    seq: String,
    shot: String,
    is_active: bool,
    assets: Vec<Asset>,
    /// Host-side visibility partition for this shot.
    pub display_group_name: String,
    pub frame_range: Option<(i64, i64)>,
    pub fps: Option<f64>,
    pub handles: Option<u32>,
    pub frame_offset: Option<i64>,
}

impl Shot {
    pub fn id(&self) -> &ShotId {
        &self.id
    }

    pub fn ep(&self) -> &str {
        &self.ep
    }

    pub fn seq(&self) -> &str {
        &self.seq
    }

    pub fn shot(&self) -> &str {
        &self.shot
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn asset_ids(&self) -> Vec<AssetId> {
        self.assets.iter().map(|a| a.id.clone()).collect()
    }

    /// `{ep, seq, shot}` pairs for template expansion.
    pub fn context_pairs(&self) -> [(String, String); 3] {
        [
            ("ep".to_string(), self.ep.clone()),
            ("seq".to_string(), self.seq.clone()),
            ("shot".to_string(), self.shot.clone()),
        ]
    }
}

/// Per-asset record inside a shot.
#[derive(Debug, Clone)]
pub struct Asset {
    id: AssetId,
    asset_type: String,
    asset_name: String,
    variant: String,
    department: String,
    /// Host namespace the asset's reference lives under.
    pub namespace: String,
    /// Raw token template resolved on shot activation.
    pub template: Option<String>,
    /// Alternative to `template`: a named template from the config.
    pub template_name: Option<String>,
    pub extension: Option<String>,
    /// Last resolved path, cached for display and relink.
    pub resolved_file_path: Option<String>,
    pub version: Option<String>,
    /// Weak handle to the linked host reference, when one is linked.
    pub host_ref: Option<String>,
}

impl Asset {
    pub fn id(&self) -> &AssetId {
        &self.id
    }

    pub fn asset_type(&self) -> &str {
        &self.asset_type
    }

    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Publish-level key (`TYPE_name_variant`; bare name for cameras).
    pub fn asset_key(&self) -> String {
        if self.asset_type == CAMERA_TYPE {
            self.asset_name.clone()
        } else {
            format!("{}_{}_{}", self.asset_type, self.asset_name, self.variant)
        }
    }

    fn identity(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.asset_type, self.asset_name, self.variant, self.department
        )
    }
}

/// The scene graph: one manager, its shots, their assets, plus the observer
/// registry events flow through.
#[derive(Debug, Default)]
pub struct SceneGraph {
    manager: Manager,
    shots: BTreeMap<ShotId, Shot>,
    asset_index: BTreeMap<AssetId, ShotId>,
    observers: ObserverRegistry,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // --- manager ---------------------------------------------------------

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn set_config_path(&mut self, path: Option<String>) {
        self.manager.config_path = path;
    }

    pub fn set_project_root(&mut self, root: Option<String>) {
        self.manager.project_root = root;
    }

    // --- shots -----------------------------------------------------------

    /// Creates a shot; fails with [`GraphError::DuplicateShot`] when the
    /// triple already exists. Emits `ShotCreated`.
    pub fn create_shot(&mut self, ep: &str, seq: &str, shot: &str) -> Result<ShotId, GraphError> {
        let id = ShotId::new(ep, seq, shot);
        if self.shots.contains_key(&id) {
            return Err(GraphError::DuplicateShot {
                shot_id: id.as_str().to_string(),
            });
        }
        let record = Shot {
            id: id.clone(),
            ep: ep.to_string(),
            seq: seq.to_string(),
            shot: shot.to_string(),
            is_active: false,
            assets: Vec::new(),
            display_group_name: format!("{DISPLAY_GROUP_PREFIX}{ep}_{seq}_{shot}"),
            frame_range: None,
            fps: None,
            handles: None,
            frame_offset: None,
        };
        self.shots.insert(id.clone(), record);
        info!(target: "graph", shot = id.as_str(), "shot created");
        self.observers.notify(&PipelineEvent::ShotCreated {
            shot_id: id.as_str().to_string(),
        });
        Ok(id)
    }

    /// Deletes a shot and every asset it owns. Clears the active pointer if
    /// it referenced this shot.
    pub fn delete_shot(&mut self, id: &ShotId) -> Result<(), GraphError> {
        let shot = self.shots.remove(id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })?;
        for asset in &shot.assets {
            self.asset_index.remove(&asset.id);
        }
        if self.manager.active_shot_id.as_ref() == Some(id) {
            self.manager.active_shot_id = None;
        }
        info!(target: "graph", shot = id.as_str(), assets = shot.assets.len(), "shot deleted");
        Ok(())
    }

    pub fn shot(&self, id: &ShotId) -> Result<&Shot, GraphError> {
        self.shots.get(id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })
    }

    pub fn shot_mut(&mut self, id: &ShotId) -> Result<&mut Shot, GraphError> {
        self.shots.get_mut(id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })
    }

    pub fn shots(&self) -> impl Iterator<Item = &Shot> {
        self.shots.values()
    }

    pub fn shot_ids(&self) -> Vec<ShotId> {
        self.shots.keys().cloned().collect()
    }

    pub fn shot_count(&self) -> usize {
        self.shots.len()
    }

    /// Marks `id` as the single active shot and updates the manager's
    /// pointer. Does not emit; see the module docs.
    pub fn activate(&mut self, id: &ShotId) -> Result<(), GraphError> {
        if !self.shots.contains_key(id) {
            return Err(GraphError::StaleHandle {
                id: id.as_str().to_string(),
            });
        }
        for shot in self.shots.values_mut() {
            shot.is_active = false;
        }
        // Index lookup can't fail: checked above.
        if let Some(shot) = self.shots.get_mut(id) {
            shot.is_active = true;
        }
        self.manager.active_shot_id = Some(id.clone());
        debug!(target: "graph", shot = id.as_str(), "shot activated");
        Ok(())
    }

    /// Clears the active flag on every shot and the manager's pointer.
    pub fn clear_active(&mut self) {
        for shot in self.shots.values_mut() {
            shot.is_active = false;
        }
        self.manager.active_shot_id = None;
    }

    pub fn active_shot_id(&self) -> Option<&ShotId> {
        self.manager.active_shot_id.as_ref()
    }

    pub fn active_shot(&self) -> Option<&Shot> {
        self.manager
            .active_shot_id
            .as_ref()
            .and_then(|id| self.shots.get(id))
    }

    // --- assets ----------------------------------------------------------

    /// Creates an asset under a shot; fails with
    /// [`GraphError::DuplicateAsset`] when `(type, name, variant,
    /// department)` already exists there. The namespace defaults to
    /// `TYPE_name_variant` (camera rule: bare name).
    pub fn create_asset(
        &mut self,
        shot_id: &ShotId,
        asset_type: &str,
        asset_name: &str,
        variant: &str,
        department: Option<&str>,
    ) -> Result<AssetId, GraphError> {
        let department = department.unwrap_or_default();
        let shot = self.shots.get_mut(shot_id).ok_or_else(|| GraphError::StaleHandle {
            id: shot_id.as_str().to_string(),
        })?;

        let key = default_namespace(asset_type, asset_name, variant);
        let id = AssetId::new(shot_id, &key, department);
        let duplicate = shot.assets.iter().any(|a| {
            a.id == id
                || (a.asset_type == asset_type
                    && a.asset_name == asset_name
                    && a.variant == variant
                    && a.department == department)
        });
        if duplicate {
            return Err(GraphError::DuplicateAsset {
                identity: format!("{asset_type}_{asset_name}_{variant}_{department}"),
                shot_id: shot_id.as_str().to_string(),
            });
        }

        let asset = Asset {
            id: id.clone(),
            asset_type: asset_type.to_string(),
            asset_name: asset_name.to_string(),
            variant: variant.to_string(),
            department: department.to_string(),
            namespace: default_namespace(asset_type, asset_name, variant),
            template: None,
            template_name: None,
            extension: None,
            resolved_file_path: None,
            version: None,
            host_ref: None,
        };
        shot.assets.push(asset);
        self.asset_index.insert(id.clone(), shot_id.clone());
        info!(
            target: "graph",
            shot = shot_id.as_str(),
            asset = id.as_str(),
            "asset created"
        );
        Ok(id)
    }

    /// Removes one asset from its shot.
    pub fn delete_asset(&mut self, id: &AssetId) -> Result<(), GraphError> {
        let shot_id = self.asset_index.remove(id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })?;
        if let Some(shot) = self.shots.get_mut(&shot_id) {
            shot.assets.retain(|a| &a.id != id);
        }
        Ok(())
    }

    pub fn asset(&self, id: &AssetId) -> Result<&Asset, GraphError> {
        let shot_id = self.asset_index.get(id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })?;
        self.shots
            .get(shot_id)
            .and_then(|shot| shot.assets.iter().find(|a| &a.id == id))
            .ok_or_else(|| GraphError::StaleHandle {
                id: id.as_str().to_string(),
            })
    }

    pub fn asset_mut(&mut self, id: &AssetId) -> Result<&mut Asset, GraphError> {
        let shot_id = self
            .asset_index
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::StaleHandle {
                id: id.as_str().to_string(),
            })?;
        self.shots
            .get_mut(&shot_id)
            .and_then(|shot| shot.assets.iter_mut().find(|a| &a.id == id))
            .ok_or_else(|| GraphError::StaleHandle {
                id: id.as_str().to_string(),
            })
    }

    /// Shot owning an asset.
    pub fn shot_of_asset(&self, id: &AssetId) -> Result<&ShotId, GraphError> {
        self.asset_index.get(id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })
    }

    /// Updates an asset's version and emits `VersionUpdated`.
    pub fn set_asset_version(&mut self, id: &AssetId, version: &str) -> Result<(), GraphError> {
        let asset = self.asset_mut(id)?;
        asset.version = Some(version.to_string());
        info!(target: "graph", asset = id.as_str(), version, "asset version updated");
        self.observers.notify(&PipelineEvent::VersionUpdated {
            asset_id: id.as_str().to_string(),
            version: version.to_string(),
        });
        Ok(())
    }

    /// Moves an asset to a different department, revalidating uniqueness
    /// under its shot. The handle stays stable.
    pub fn set_asset_department(&mut self, id: &AssetId, department: &str) -> Result<(), GraphError> {
        let shot_id = self
            .asset_index
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::StaleHandle {
                id: id.as_str().to_string(),
            })?;
        let shot = self.shots.get_mut(&shot_id).ok_or_else(|| GraphError::StaleHandle {
            id: id.as_str().to_string(),
        })?;

        let (asset_type, asset_name, variant) = {
            let asset = shot
                .assets
                .iter()
                .find(|a| &a.id == id)
                .ok_or_else(|| GraphError::StaleHandle {
                    id: id.as_str().to_string(),
                })?;
            (
                asset.asset_type.clone(),
                asset.asset_name.clone(),
                asset.variant.clone(),
            )
        };

        let duplicate = shot.assets.iter().any(|a| {
            &a.id != id
                && a.asset_type == asset_type
                && a.asset_name == asset_name
                && a.variant == variant
                && a.department == department
        });
        if duplicate {
            return Err(GraphError::DuplicateAsset {
                identity: format!("{asset_type}_{asset_name}_{variant}_{department}"),
                shot_id: shot_id.as_str().to_string(),
            });
        }

        if let Some(asset) = shot.assets.iter_mut().find(|a| &a.id == id) {
            asset.department = department.to_string();
        }
        Ok(())
    }

    /// Assets of a shot filtered by type.
    pub fn assets_by_type(
        &self,
        shot_id: &ShotId,
        asset_type: &str,
    ) -> Result<Vec<&Asset>, GraphError> {
        let shot = self.shot(shot_id)?;
        Ok(shot
            .assets
            .iter()
            .filter(|a| a.asset_type == asset_type)
            .collect())
    }

    /// Finds a shot's asset by name and variant.
    pub fn find_asset(
        &self,
        shot_id: &ShotId,
        asset_name: &str,
        variant: &str,
    ) -> Result<Option<&Asset>, GraphError> {
        let shot = self.shot(shot_id)?;
        Ok(shot
            .assets
            .iter()
            .find(|a| a.asset_name == asset_name && a.variant == variant))
    }

    // --- observers -------------------------------------------------------

    pub fn register_observer<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&PipelineEvent) + 'static,
    {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&mut self, id: ObserverId) {
        self.observers.unregister(id);
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.observers.set_silent(silent);
    }

    pub fn is_silent(&self) -> bool {
        self.observers.is_silent()
    }

    /// Emits an event through the registry. Used by the switcher, which
    /// sequences emission after visibility and history updates.
    pub fn notify(&mut self, event: &PipelineEvent) {
        self.observers.notify(event);
    }
}
