//! Pipeline facade: one value owning the whole context-resolution core.
//!
//! The host constructs a [`Pipeline`] from a validated [`ProjectConfig`] and
//! a [`SceneBackend`] implementation; there is no global runtime state.
//! The pipeline wires together the pattern engine, template set, platform
//! mapper, version cache, scene graph, and shot switcher, and mirrors
//! graph records into the backend (a manager record at construction, a shot
//! record per created shot, an asset record per discovered asset) so the
//! host scene reflects core state.
//!
//! Call ordering contract (single logical owner, synchronous throughout):
//! config load precedes resolver use; `build_shot_cache` for a publish path
//! precedes `latest` queries against it; observer callbacks run before the
//! mutating call returns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use core_backend::{AttrValue, BackendError, LinkMode, RecordKind, SceneBackend};
use core_cache::{CacheError, VersionCache};
use core_config::{ConfigError, Platform, PlatformMapper, ProjectConfig};
use core_events::{ObserverId, PipelineEvent};
use core_model::{Asset, AssetId, CAMERA_TYPE, GraphError, SceneGraph, Shot, ShotId};
use core_patterns::{PatternError, PatternSet};
use core_resolve::{PathBuilder, PathResolver, ResolveError, PUBLISH_PATH_TEMPLATE};
use core_switch::{ShotSwitcher, SwitchError};
use core_template::{Context, TemplateSet};
use thiserror::Error;
use tracing::{info, warn};

mod convert;
mod discover;
mod metadata;

pub use convert::SceneAssetInfo;
pub use discover::DiscoveredAsset;
pub use metadata::{ShotMetadata, ShotMetadataLoader};

/// Departments scanned when the config's `dept` token declares no values.
pub const DEFAULT_DEPARTMENTS: &[&str] = &["anim", "layout", "fx", "lighting"];

/// Named template for a shot's root directory, when the config declares one.
pub const SHOT_ROOT_TEMPLATE: &str = "shotRoot";

/// Derivation used when no `shotRoot` template is configured. The doubled
/// separator after a trailing-slash root collapses during normalization.
const SHOT_ROOT_FALLBACK: &str = "$projRoot/$project/$sceneBase/$ep/$seq/$shot";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Render output selection for a shot, per the `renderSettings` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub path: String,
    /// The shot's frame range, when propagation is configured.
    pub frame_range: Option<(i64, i64)>,
}

/// The context-and-path resolution core, bundled behind one owner.
pub struct Pipeline {
    pub(crate) config: ProjectConfig,
    pub(crate) mapper: PlatformMapper,
    pub(crate) patterns: PatternSet,
    pub(crate) templates: TemplateSet,
    pub(crate) cache: VersionCache,
    pub(crate) graph: SceneGraph,
    pub(crate) backend: Box<dyn SceneBackend>,
    pub(crate) switcher: ShotSwitcher,
    pub(crate) manager_record: Option<String>,
    pub(crate) shot_records: BTreeMap<ShotId, String>,
    pub(crate) asset_records: BTreeMap<AssetId, String>,
}

impl Pipeline {
    /// Builds a pipeline for the detected platform.
    pub fn new(
        config: ProjectConfig,
        backend: Box<dyn SceneBackend>,
    ) -> Result<Self, PipelineError> {
        Self::with_platform(config, backend, Platform::current())
    }

    /// Builds a pipeline pretending to run on `platform` (deterministic
    /// tests, remote submission tooling).
    pub fn with_platform(
        config: ProjectConfig,
        backend: Box<dyn SceneBackend>,
        platform: Platform,
    ) -> Result<Self, PipelineError> {
        let mapper = PlatformMapper::with_platform(&config, platform);
        let patterns = PatternSet::from_config(&config)?;
        let templates = TemplateSet::from_config(&config);
        let mut graph = SceneGraph::new();
        graph.set_config_path(config.path().map(|p| p.display().to_string()));

        let mut pipeline = Self {
            config,
            mapper,
            patterns,
            templates,
            cache: VersionCache::new(),
            graph,
            backend,
            switcher: ShotSwitcher::new(),
            manager_record: None,
            shot_records: BTreeMap::new(),
            asset_records: BTreeMap::new(),
        };
        pipeline.mirror_manager()?;
        info!(target: "pipeline", project = pipeline.config.project_code(), "pipeline initialized");
        Ok(pipeline)
    }

    /// Loads the config file and builds a pipeline.
    pub fn from_config_path(
        path: impl AsRef<Path>,
        backend: Box<dyn SceneBackend>,
    ) -> Result<Self, PipelineError> {
        let config = ProjectConfig::load(path)?;
        Self::new(config, backend)
    }

    fn mirror_manager(&mut self) -> Result<(), PipelineError> {
        let id = self.backend.create_record(RecordKind::Manager, "CTX_Manager")?;
        if let Some(config_path) = self.graph.manager().config_path() {
            self.backend
                .set_attr(&id, "config_path", AttrValue::Str(config_path.to_string()))?;
        }
        self.manager_record = Some(id);
        Ok(())
    }

    // --- accessors -------------------------------------------------------

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn mapper(&self) -> &PlatformMapper {
        &self.mapper
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn cache(&self) -> &VersionCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut VersionCache {
        &mut self.cache
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    pub fn backend(&self) -> &dyn SceneBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn SceneBackend {
        self.backend.as_mut()
    }

    pub fn switch_history(&self) -> &[ShotId] {
        self.switcher.history()
    }

    /// Host id of the mirrored record for a shot, once created.
    pub fn shot_record(&self, shot_id: &ShotId) -> Option<&str> {
        self.shot_records.get(shot_id).map(String::as_str)
    }

    /// Host id of the mirrored record for an asset, once created.
    pub fn asset_record(&self, asset_id: &AssetId) -> Option<&str> {
        self.asset_records.get(asset_id).map(String::as_str)
    }

    /// A resolver borrowing this pipeline's config and platform mapper.
    pub fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.config, &self.mapper)
    }

    /// A path builder wired to this pipeline's patterns, resolver, and
    /// version cache.
    pub fn builder(&self) -> PathBuilder<'_> {
        PathBuilder::new(&self.patterns, self.resolver(), Some(&self.cache))
    }

    // --- observers -------------------------------------------------------

    pub fn register_observer<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&PipelineEvent) + 'static,
    {
        self.graph.register_observer(observer)
    }

    pub fn unregister_observer(&mut self, id: ObserverId) {
        self.graph.unregister_observer(id);
    }

    /// Suppresses event emission during bulk updates.
    pub fn set_silent(&mut self, silent: bool) {
        self.graph.set_silent(silent);
    }

    // --- shots -----------------------------------------------------------

    /// Creates a shot record and mirrors it into the backend.
    pub fn create_shot(
        &mut self,
        ep: &str,
        seq: &str,
        shot: &str,
    ) -> Result<ShotId, PipelineError> {
        let shot_id = self.graph.create_shot(ep, seq, shot)?;
        let record = self
            .backend
            .create_record(RecordKind::Shot, shot_id.as_str())?;
        self.backend.set_attr(&record, "ep", AttrValue::Str(ep.to_string()))?;
        self.backend.set_attr(&record, "seq", AttrValue::Str(seq.to_string()))?;
        self.backend.set_attr(&record, "shot", AttrValue::Str(shot.to_string()))?;
        self.backend.set_attr(&record, "is_active", AttrValue::Bool(false))?;
        let group = self.graph.shot(&shot_id)?.display_group_name.clone();
        self.backend
            .set_attr(&record, "display_group_name", AttrValue::Str(group))?;
        if let Some(manager) = self.manager_record.clone() {
            self.backend.connect(&record, "manager", &manager, "shots")?;
        }
        self.shot_records.insert(shot_id.clone(), record);
        Ok(shot_id)
    }

    /// Deletes a shot, its assets, and their mirrored records.
    pub fn delete_shot(&mut self, shot_id: &ShotId) -> Result<(), PipelineError> {
        let asset_ids = self.graph.shot(shot_id)?.asset_ids();
        for asset_id in asset_ids {
            if let Some(record) = self.asset_records.remove(&asset_id) {
                self.backend.delete_record(&record)?;
            }
        }
        if let Some(record) = self.shot_records.remove(shot_id) {
            self.backend.delete_record(&record)?;
        }
        self.graph.delete_shot(shot_id)?;
        Ok(())
    }

    /// Switches the active shot (visibility + history + event), then mirrors
    /// the active flags into the backend. Does not touch asset paths; see
    /// [`activate_shot`](Self::activate_shot) for the full sequence.
    pub fn switch_to(
        &mut self,
        shot_id: &ShotId,
        hide_others: bool,
    ) -> Result<bool, PipelineError> {
        self.switcher
            .switch_to(&mut self.graph, self.backend.as_mut(), shot_id, hide_others)?;
        self.mirror_active_flags()?;
        Ok(true)
    }

    /// Pushes the graph's active flags into the mirrored backend records.
    fn mirror_active_flags(&mut self) -> Result<(), PipelineError> {
        let active = self.graph.active_shot_id().cloned();
        for (id, record) in &self.shot_records {
            self.backend.set_attr(
                record,
                "is_active",
                AttrValue::Bool(Some(id) == active.as_ref()),
            )?;
        }
        if let (Some(manager), Some(active)) = (self.manager_record.clone(), active) {
            self.backend.set_attr(
                &manager,
                "active_shot_id",
                AttrValue::Str(active.as_str().to_string()),
            )?;
        }
        Ok(())
    }

    /// Full activation: switch, then re-resolve and apply every asset path
    /// under the new shot's context. Returns how many assets were updated.
    pub fn activate_shot(
        &mut self,
        shot_id: &ShotId,
        hide_others: bool,
    ) -> Result<usize, PipelineError> {
        self.switch_to(shot_id, hide_others)?;
        self.update_shot_paths(shot_id)
    }

    pub fn active_shot(&self) -> Option<ShotId> {
        self.switcher.active(&self.graph)
    }

    pub fn previous_shot(&mut self) -> Result<bool, PipelineError> {
        let switched = self
            .switcher
            .previous(&mut self.graph, self.backend.as_mut())?;
        if switched {
            self.mirror_active_flags()?;
        }
        Ok(switched)
    }

    pub fn next_shot(&mut self) -> Result<bool, PipelineError> {
        let switched = self.switcher.next(&mut self.graph, self.backend.as_mut())?;
        if switched {
            self.mirror_active_flags()?;
        }
        Ok(switched)
    }

    pub fn isolate_shot(&mut self, shot_id: &ShotId) -> Result<bool, PipelineError> {
        self.switch_to(shot_id, true)
    }

    pub fn show_all_shots(&mut self) -> Result<(), PipelineError> {
        Ok(self.switcher.show_all(self.backend.as_mut())?)
    }

    pub fn hide_all_shots(&mut self) -> Result<(), PipelineError> {
        Ok(self.switcher.hide_all(self.backend.as_mut())?)
    }

    // --- contexts & paths ------------------------------------------------

    /// Departments to scan: the `dept` token's enumerated values, or the
    /// built-in default list.
    pub fn departments(&self) -> Vec<String> {
        self.config
            .token_values("dept")
            .map(|values| values.to_vec())
            .unwrap_or_else(|| DEFAULT_DEPARTMENTS.iter().map(|s| s.to_string()).collect())
    }

    /// `{ep, seq, shot}` context for a shot record.
    pub fn shot_context(&self, shot_id: &ShotId) -> Result<Context, PipelineError> {
        let shot = self.graph.shot(shot_id)?;
        Ok(shot.context_pairs().into_iter().collect())
    }

    /// Resolved publish directory for a shot and department.
    pub fn publish_path(&self, shot_id: &ShotId, dept: &str) -> Result<String, PipelineError> {
        let mut context = self.shot_context(shot_id)?;
        context.insert("dept".to_string(), dept.to_string());
        Ok(self
            .resolver()
            .resolve(PUBLISH_PATH_TEMPLATE, &context, None, false)?)
    }

    /// Resolved shot root directory: the `shotRoot` template when the config
    /// declares one, otherwise derived from the project roots.
    pub fn shot_root_path(&self, shot_id: &ShotId) -> Result<String, PipelineError> {
        let context = self.shot_context(shot_id)?;
        if self.config.template(SHOT_ROOT_TEMPLATE).is_some() {
            return Ok(self
                .resolver()
                .resolve(SHOT_ROOT_TEMPLATE, &context, None, false)?);
        }
        let full_context = self.resolver().build_full_context(&context, None);
        let expanded = core_template::expand(SHOT_ROOT_FALLBACK, &full_context, None);
        let remaining = core_template::extract_tokens(&expanded);
        if !remaining.is_empty() {
            return Err(ResolveError::TokenExpansionFailed {
                template: SHOT_ROOT_FALLBACK.to_string(),
                unexpanded: remaining,
                context_keys: full_context.keys().cloned().collect(),
            }
            .into());
        }
        Ok(core_resolve::normalize_resolved_path(&expanded))
    }

    /// Scans the publish trees of the given (or all) departments and
    /// populates the version cache. Returns the publish paths cached.
    pub fn build_shot_cache(
        &mut self,
        shot_id: &ShotId,
        departments: Option<&[String]>,
    ) -> Result<Vec<String>, PipelineError> {
        let departments: Vec<String> = match departments {
            Some(list) => list.to_vec(),
            None => self.departments(),
        };
        let mut cached = Vec::new();
        for dept in &departments {
            match self.publish_path(shot_id, dept) {
                Ok(path) => {
                    self.cache
                        .build_cache(Path::new(&path), Some(&self.patterns));
                    cached.push(path);
                }
                Err(e) => {
                    warn!(
                        target: "pipeline",
                        shot = shot_id.as_str(),
                        dept = dept.as_str(),
                        error = %e,
                        "skipping department: publish path unresolvable"
                    );
                }
            }
        }
        Ok(cached)
    }

    /// Persists the version cache snapshot.
    pub fn save_cache(&self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.cache.save(path)?)
    }

    /// Restores a version cache snapshot.
    pub fn load_cache(&mut self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.cache.load(path)?)
    }

    // --- asset path resolution -------------------------------------------

    fn asset_context(shot: &Shot, asset: &Asset) -> Context {
        let mut context: Context = shot.context_pairs().into_iter().collect();
        context.insert("assetType".to_string(), asset.asset_type().to_string());
        context.insert("assetName".to_string(), asset.asset_name().to_string());
        context.insert("variant".to_string(), asset.variant().to_string());
        context.insert("dept".to_string(), asset.department().to_string());
        if let Some(ext) = &asset.extension {
            context.insert("ext".to_string(), ext.clone());
        }
        if let Some(version) = asset.version() {
            context.insert("ver".to_string(), version.to_string());
        }
        context
    }

    /// Resolves an asset's template under its shot's context.
    ///
    /// Soft failures (no template, unexpanded tokens) return `Ok(None)` with
    /// a warning: a bulk relink pass skips such assets instead of aborting.
    pub fn resolve_asset_path(&self, asset_id: &AssetId) -> Result<Option<String>, PipelineError> {
        let shot_id = self.graph.shot_of_asset(asset_id)?.clone();
        let shot = self.graph.shot(&shot_id)?;
        let asset = self.graph.asset(asset_id)?;

        let template = match (&asset.template, &asset.template_name) {
            (Some(raw), _) => raw.clone(),
            (None, Some(name)) => match self.config.template(name) {
                Some(template) => template.to_string(),
                None => {
                    warn!(target: "pipeline", asset = asset_id.as_str(), template = name.as_str(), "named template missing from config");
                    return Ok(None);
                }
            },
            (None, None) => {
                warn!(target: "pipeline", asset = asset_id.as_str(), "asset has no template");
                return Ok(None);
            }
        };

        let context = Self::asset_context(shot, asset);
        let full_context = self.resolver().build_full_context(&context, None);
        let expanded = core_template::expand(&template, &full_context, None);
        let remaining = core_template::extract_tokens(&expanded);
        if !remaining.is_empty() {
            warn!(
                target: "pipeline",
                asset = asset_id.as_str(),
                unexpanded = %remaining.join(", "),
                "asset template left tokens unexpanded"
            );
            return Ok(None);
        }
        Ok(Some(core_resolve::normalize_resolved_path(&expanded)))
    }

    /// Finds the host reference for an asset: stored handle, live link,
    /// namespace lookup, then (for cameras) any `_camera` reference.
    fn find_host_ref(&mut self, asset_id: &AssetId) -> Result<Option<String>, PipelineError> {
        let (namespace, asset_type, stored) = {
            let asset = self.graph.asset(asset_id)?;
            (
                asset.namespace.clone(),
                asset.asset_type().to_string(),
                asset.host_ref.clone(),
            )
        };

        if let Some(stored) = stored {
            if self.backend.node_exists(&stored) {
                return Ok(Some(stored));
            }
        }
        if let Some(linked) = self.backend.linked_host_ref(asset_id.as_str()) {
            return Ok(Some(linked));
        }
        if let Some(by_namespace) = self.backend.find_reference_by_namespace(&namespace) {
            return Ok(Some(by_namespace));
        }
        if asset_type == CAMERA_TYPE {
            // Unlinked camera: adopt any camera reference in the scene.
            let candidate = self
                .backend
                .list_references()
                .into_iter()
                .find(|r| r.namespace.to_ascii_lowercase().ends_with("_camera"));
            if let Some(reference) = candidate {
                info!(
                    target: "pipeline",
                    asset = asset_id.as_str(),
                    reference = %reference.id,
                    "adopting camera reference by namespace suffix"
                );
                return Ok(Some(reference.id));
            }
        }
        Ok(None)
    }

    /// Resolves and applies one asset's file path through the backend.
    /// Returns whether the host reference was updated.
    pub fn apply_asset_path(&mut self, asset_id: &AssetId) -> Result<bool, PipelineError> {
        let Some(path) = self.resolve_asset_path(asset_id)? else {
            return Ok(false);
        };
        let Some(host_ref) = self.find_host_ref(asset_id)? else {
            warn!(target: "pipeline", asset = asset_id.as_str(), "no host reference linked");
            return Ok(false);
        };

        self.backend.apply_file_path(&host_ref, &path)?;
        if self.backend.linked_host_ref(asset_id.as_str()).is_none() {
            self.backend.link(asset_id.as_str(), &host_ref)?;
        }
        let asset = self.graph.asset_mut(asset_id)?;
        asset.host_ref = Some(host_ref);
        asset.resolved_file_path = Some(path);
        Ok(true)
    }

    /// Re-resolves and applies every asset path in a shot. Individual asset
    /// failures are logged and skipped. Returns the number updated.
    pub fn update_shot_paths(&mut self, shot_id: &ShotId) -> Result<usize, PipelineError> {
        let asset_ids = self.graph.shot(shot_id)?.asset_ids();
        let total = asset_ids.len();
        let mut updated = 0usize;
        for asset_id in asset_ids {
            match self.apply_asset_path(&asset_id) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        target: "pipeline",
                        asset = asset_id.as_str(),
                        error = %e,
                        "failed to update asset path"
                    );
                }
            }
        }
        info!(
            target: "pipeline",
            shot = shot_id.as_str(),
            updated,
            total,
            "shot asset paths updated"
        );
        Ok(updated)
    }

    /// Re-resolves paths for the active shot's assets.
    pub fn update_active_shot_paths(&mut self) -> Result<usize, PipelineError> {
        match self.active_shot() {
            Some(shot_id) => self.update_shot_paths(&shot_id),
            None => {
                warn!(target: "pipeline", "no active shot to update paths for");
                Ok(0)
            }
        }
    }

    /// Pins an asset to a version (emitting `VersionUpdated`), then
    /// re-resolves and applies its path. Returns the new path when the host
    /// reference was updated.
    pub fn set_asset_version(
        &mut self,
        asset_id: &AssetId,
        version: &str,
    ) -> Result<Option<String>, PipelineError> {
        self.graph.set_asset_version(asset_id, version)?;
        if self.apply_asset_path(asset_id)? {
            Ok(self.graph.asset(asset_id)?.resolved_file_path.clone())
        } else {
            Ok(None)
        }
    }

    /// Links an asset record to a host reference (bidirectional, with the
    /// backend's string-keyed fallback for locked references).
    pub fn link_asset(
        &mut self,
        asset_id: &AssetId,
        host_ref_id: &str,
    ) -> Result<LinkMode, PipelineError> {
        self.graph.asset(asset_id)?;
        let mode = self.backend.link(asset_id.as_str(), host_ref_id)?;
        self.graph.asset_mut(asset_id)?.host_ref = Some(host_ref_id.to_string());
        Ok(mode)
    }

    /// Removes an asset's host link. Returns whether one existed.
    pub fn unlink_asset(&mut self, asset_id: &AssetId) -> Result<bool, PipelineError> {
        self.graph.asset(asset_id)?;
        let existed = self.backend.unlink(asset_id.as_str())?;
        self.graph.asset_mut(asset_id)?.host_ref = None;
        Ok(existed)
    }

    // --- sidecar metadata ------------------------------------------------

    /// Loads the shot's sidecar metadata (when configured and enabled) and
    /// applies frame range and fps to the shot record.
    pub fn import_shot_metadata(
        &mut self,
        shot_id: &ShotId,
    ) -> Result<ShotMetadata, PipelineError> {
        let Some(meta_config) = self.config.shot_metadata().cloned() else {
            return Ok(ShotMetadata::default());
        };
        if !meta_config.enabled {
            return Ok(ShotMetadata::default());
        }
        let shot_root = self.shot_root_path(shot_id)?;
        let loader = ShotMetadataLoader::new(&meta_config);
        let metadata = loader.load_all(shot_id.as_str(), Path::new(&shot_root));

        let shot = self.graph.shot_mut(shot_id)?;
        if let Some(range) = metadata.frame_range {
            shot.frame_range = Some(range);
        }
        if let Some(fps) = metadata.fps {
            shot.fps = Some(fps);
        }
        Ok(metadata)
    }

    // --- render settings -------------------------------------------------

    /// Resolves the configured render output path for a shot. `None` when
    /// render settings are absent, disabled, or carry no output template.
    pub fn render_output(&self, shot_id: &ShotId) -> Result<Option<RenderOutput>, PipelineError> {
        let Some(settings) = self.config.render_settings() else {
            return Ok(None);
        };
        if !settings.enabled {
            return Ok(None);
        }
        let Some(output) = &settings.output_path else {
            return Ok(None);
        };
        let context = self.shot_context(shot_id)?;
        let path = self.resolver().resolve(&output.template, &context, None, false)?;
        let frame_range = if output.propagate_frame_range {
            self.graph.shot(shot_id)?.frame_range
        } else {
            None
        };
        Ok(Some(RenderOutput { path, frame_range }))
    }

    /// Config search passthrough so hosts need only this crate.
    pub fn find_config(explicit: Option<&Path>, base_dir: Option<&Path>) -> Option<PathBuf> {
        core_config::find_config(explicit, base_dir)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("project", &self.config.project_code())
            .field("shots", &self.graph.shot_count())
            .field("cache_paths", &self.cache.publish_paths().len())
            .finish()
    }
}
