//! Project configuration: loading, validation, and typed access.
//!
//! The configuration is a JSON document with a declared schema version. The
//! loader parses into `serde_json::Value` first so the validator can report
//! *every* problem in one pass (a list of errors plus deprecation warnings)
//! instead of failing on the first bad field, then builds the typed
//! [`ProjectConfig`] from the validated document.
//!
//! Two historical shapes exist for the `roots` section: a flat
//! `{name: path}` map and a platform-keyed `{windows: {...}, linux: {...}}`
//! map. Both are normalized into [`RootTables`] at load time; downstream code
//! only ever sees `root(name, platform)`.
//!
//! Canonical section casing is camelCase (`staticPaths`, `shotMetadata`,
//! `renderSettings`). The snake_case spellings are accepted and produce a
//! deprecation warning from the validator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

pub mod platform;
pub mod validator;

pub use platform::{Platform, PlatformMapper};
pub use validator::Validation;

/// Schema versions this build understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1"];

/// Publish file extensions recognized when the config has no `extensions` key.
pub const DEFAULT_EXTENSIONS: &[&str] = &["abc", "ma", "mb", "vdb", "ass", "rs"];

/// Environment variable consulted by [`find_config`].
pub const CONFIG_PATH_ENV: &str = "CTX_CONFIG_PATH";

/// Conventional config location relative to a project/repository root.
pub const CONFIG_RELATIVE_PATH: &str = "project_configs/ctx_config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid JSON in configuration file {path}: {reason}")]
    InvalidJson { path: PathBuf, reason: String },

    #[error("configuration validation failed: {}", errors.join("; "))]
    ValidationFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("cannot migrate to unsupported version '{target_version}'")]
    MigrationUnsupported { target_version: String },
}

/// `project` section: display name plus the short code used in paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub code: String,
}

/// Per-token definition from the optional `tokens` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenDef {
    /// Enumerated allowed values, when the token is closed-set (`dept`).
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Normalized per-platform root prefixes.
///
/// A flat `roots` section fills both tables with the same values; the
/// platform-keyed shape fills each side from its own sub-map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootTables {
    windows: BTreeMap<String, String>,
    linux: BTreeMap<String, String>,
}

impl RootTables {
    pub fn from_section(section: &Value) -> Self {
        let mut tables = RootTables::default();
        let Some(map) = section.as_object() else {
            return tables;
        };
        let platform_keyed = map.contains_key("windows") || map.contains_key("linux");
        if platform_keyed {
            for (platform_key, roots) in map {
                let Some(platform) = Platform::from_key(platform_key) else {
                    continue;
                };
                if let Some(roots) = roots.as_object() {
                    let table = tables.table_mut(platform);
                    for (name, value) in roots {
                        if let Some(s) = value.as_str() {
                            table.insert(name.clone(), s.to_string());
                        }
                    }
                }
            }
        } else {
            for (name, value) in map {
                if let Some(s) = value.as_str() {
                    tables.windows.insert(name.clone(), s.to_string());
                    tables.linux.insert(name.clone(), s.to_string());
                }
            }
        }
        tables
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty() && self.linux.is_empty()
    }

    pub fn table(&self, platform: Platform) -> &BTreeMap<String, String> {
        match platform {
            Platform::Windows => &self.windows,
            Platform::Linux => &self.linux,
        }
    }

    fn table_mut(&mut self, platform: Platform) -> &mut BTreeMap<String, String> {
        match platform {
            Platform::Windows => &mut self.windows,
            Platform::Linux => &mut self.linux,
        }
    }

    /// Root prefix by name. Without a platform, tries Windows then Linux,
    /// mirroring the legacy "any platform" lookup.
    pub fn get(&self, name: &str, platform: Option<Platform>) -> Option<&str> {
        match platform {
            Some(p) => self.table(p).get(name).map(String::as_str),
            None => self
                .windows
                .get(name)
                .or_else(|| self.linux.get(name))
                .map(String::as_str),
        }
    }

    /// Union of root names across both platforms, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.windows.keys().map(String::as_str).collect();
        for name in self.linux.keys() {
            if !self.windows.contains_key(name) {
                names.push(name);
            }
        }
        names.sort_unstable();
        names
    }

    /// Overlays `other` on top of `self`, returning the merged tables.
    /// Used to layer `platform_mapping` over the normalized `roots`.
    pub fn overlaid(&self, other: &RootTables) -> RootTables {
        let mut merged = self.clone();
        for (name, value) in &other.windows {
            merged.windows.insert(name.clone(), value.clone());
        }
        for (name, value) in &other.linux {
            merged.linux.insert(name.clone(), value.clone());
        }
        merged
    }
}

// -------------------------------------------------------------------------------------------------
// Sidecar shot-metadata configuration (`shotMetadata` section)
// -------------------------------------------------------------------------------------------------

/// How the frame-range value is laid out inside the sidecar JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameRangeFormat {
    /// `"sequence_frames": "1001-1030"`
    #[default]
    Range,
    /// `"shot_info": {"start_frame": 1001, "end_frame": 1030}`
    Nested,
    /// Root-level `start_frame` / `end_frame` fields.
    Separate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRangeField {
    #[serde(default = "FrameRangeField::default_json_field", alias = "json_field")]
    pub json_field: String,
    #[serde(default, alias = "parse_format")]
    pub parse_format: FrameRangeFormat,
    #[serde(default = "FrameRangeField::default_start_field", alias = "start_field")]
    pub start_field: String,
    #[serde(default = "FrameRangeField::default_end_field", alias = "end_field")]
    pub end_field: String,
    #[serde(default = "FrameRangeField::default_start", alias = "default_start")]
    pub default_start: i64,
    #[serde(default = "FrameRangeField::default_end", alias = "default_end")]
    pub default_end: i64,
}

impl FrameRangeField {
    fn default_json_field() -> String {
        "sequence_frames".to_string()
    }
    fn default_start_field() -> String {
        "start_frame".to_string()
    }
    fn default_end_field() -> String {
        "end_frame".to_string()
    }
    fn default_start() -> i64 {
        1001
    }
    fn default_end() -> i64 {
        1100
    }
}

impl Default for FrameRangeField {
    fn default() -> Self {
        Self {
            json_field: Self::default_json_field(),
            parse_format: FrameRangeFormat::default(),
            start_field: Self::default_start_field(),
            end_field: Self::default_end_field(),
            default_start: Self::default_start(),
            default_end: Self::default_end(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FpsField {
    #[serde(default = "FpsField::default_json_field", alias = "json_field")]
    pub json_field: String,
    #[serde(default = "FpsField::default_fps")]
    pub default: f64,
}

impl FpsField {
    fn default_json_field() -> String {
        "fps".to_string()
    }
    fn default_fps() -> f64 {
        24.0
    }
}

impl Default for FpsField {
    fn default() -> Self {
        Self {
            json_field: Self::default_json_field(),
            default: Self::default_fps(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default, alias = "frame_range")]
    pub frame_range: FrameRangeField,
    #[serde(default)]
    pub fps: FpsField,
}

/// `shotMetadata` section: conventions for the per-shot JSON sidecar file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotMetadataConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sidecar filename with a `{shot_id}` placeholder.
    #[serde(
        default = "ShotMetadataConfig::default_filename_pattern",
        alias = "filename_pattern"
    )]
    pub filename_pattern: String,
    #[serde(default, alias = "field_mapping")]
    pub field_mapping: FieldMapping,
}

impl ShotMetadataConfig {
    fn default_filename_pattern() -> String {
        ".{shot_id}.json".to_string()
    }
}

// -------------------------------------------------------------------------------------------------
// Render-settings configuration (`renderSettings` section)
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutputConfig {
    /// Name of the template (in `templates`) used for render output paths.
    pub template: String,
    /// Whether the shot's frame range is propagated to render settings.
    #[serde(default, alias = "propagate_frame_range")]
    pub propagate_frame_range: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderCameraConfig {
    /// Namespace suffix used to locate the renderable camera (`_camera`).
    #[serde(
        default = "RenderCameraConfig::default_namespace_suffix",
        alias = "namespace_suffix"
    )]
    pub namespace_suffix: String,
}

impl RenderCameraConfig {
    fn default_namespace_suffix() -> String {
        "_camera".to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettingsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, alias = "output_path")]
    pub output_path: Option<RenderOutputConfig>,
    #[serde(default)]
    pub camera: Option<RenderCameraConfig>,
}

// -------------------------------------------------------------------------------------------------
// ProjectConfig
// -------------------------------------------------------------------------------------------------

/// Immutable, validated project configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    path: Option<PathBuf>,
    document: Value,
    schema_version: String,
    project: ProjectInfo,
    roots: RootTables,
    platform_mapping: RootTables,
    static_paths: BTreeMap<String, String>,
    templates: BTreeMap<String, String>,
    patterns: BTreeMap<String, String>,
    tokens: BTreeMap<String, TokenDef>,
    extensions: Vec<String>,
    shot_metadata: Option<ShotMetadataConfig>,
    render_settings: Option<RenderSettingsConfig>,
}

/// Returns a section by its canonical camelCase key, falling back to the
/// legacy snake_case spelling.
fn section<'a>(doc: &'a Value, canonical: &str, legacy: &str) -> Option<&'a Value> {
    doc.get(canonical).or_else(|| doc.get(legacy))
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(map) = value.and_then(Value::as_object) {
        for (k, v) in map {
            if let Some(s) = v.as_str() {
                out.insert(k.clone(), s.to_string());
            }
        }
    }
    out
}

impl ProjectConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidJson {
            path: path.to_path_buf(),
            reason: format!("failed to read file: {e}"),
        })?;
        let document: Value =
            serde_json::from_str(&content).map_err(|e| ConfigError::InvalidJson {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let config = Self::from_document(document, Some(path.to_path_buf()))?;
        info!(
            target: "config",
            path = %path.display(),
            version = %config.schema_version,
            templates = config.templates.len(),
            patterns = config.patterns.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validates a parsed document and builds the typed configuration.
    ///
    /// Validation collects every error before failing; warnings (deprecated
    /// spellings, unused sections) are logged and carried on the error when
    /// validation fails.
    pub fn from_document(document: Value, path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let validation = validator::validate(&document);
        for warning in &validation.warnings {
            tracing::warn!(target: "config", "{warning}");
        }
        if !validation.is_valid() {
            return Err(ConfigError::ValidationFailed {
                errors: validation.errors,
                warnings: validation.warnings,
            });
        }

        let schema_version = document
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let project: ProjectInfo = serde_json::from_value(
            document.get("project").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| ConfigError::ValidationFailed {
            errors: vec![format!("invalid 'project' section: {e}")],
            warnings: Vec::new(),
        })?;

        let roots = RootTables::from_section(document.get("roots").unwrap_or(&Value::Null));
        let platform_mapping = document
            .get("platform_mapping")
            .or_else(|| document.get("platformMapping"))
            .map(RootTables::from_section)
            .unwrap_or_default();

        let static_paths = string_map(section(&document, "staticPaths", "static_paths"));
        let templates = string_map(document.get("templates"));
        let patterns = string_map(document.get("patterns"));

        let tokens = document
            .get("tokens")
            .cloned()
            .map(|v| serde_json::from_value::<BTreeMap<String, TokenDef>>(v).unwrap_or_default())
            .unwrap_or_default();

        let extensions = document
            .get("extensions")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim_start_matches('.').to_string())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect());

        let shot_metadata = section(&document, "shotMetadata", "shot_metadata")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        let render_settings = section(&document, "renderSettings", "render_settings")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        Ok(Self {
            path,
            document,
            schema_version,
            project,
            roots,
            platform_mapping,
            static_paths,
            templates,
            patterns,
            tokens,
            extensions,
            shot_metadata,
            render_settings,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw validated document, kept for migration and host round-trips.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn project_name(&self) -> &str {
        &self.project.name
    }

    pub fn project_code(&self) -> &str {
        &self.project.code
    }

    /// Root prefix by name, abstracting over both `roots` shapes.
    pub fn root(&self, name: &str, platform: Option<Platform>) -> Option<&str> {
        self.roots.get(name, platform)
    }

    pub fn root_names(&self) -> Vec<&str> {
        self.roots.names()
    }

    pub fn roots(&self) -> &RootTables {
        &self.roots
    }

    /// Explicit `platform_mapping` tables (may be empty when not configured).
    pub fn platform_mapping(&self) -> &RootTables {
        &self.platform_mapping
    }

    pub fn static_paths(&self) -> &BTreeMap<String, String> {
        &self.static_paths
    }

    pub fn static_path(&self, name: &str) -> Option<&str> {
        self.static_paths.get(name).map(String::as_str)
    }

    pub fn templates(&self) -> &BTreeMap<String, String> {
        &self.templates
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn patterns(&self) -> &BTreeMap<String, String> {
        &self.patterns
    }

    pub fn pattern(&self, name: &str) -> Option<&str> {
        self.patterns.get(name).map(String::as_str)
    }

    pub fn tokens(&self) -> &BTreeMap<String, TokenDef> {
        &self.tokens
    }

    /// Enumerated values for a token, when the config declares them.
    pub fn token_values(&self, token_name: &str) -> Option<&[String]> {
        self.tokens
            .get(token_name)
            .and_then(|def| def.values.as_deref())
    }

    /// Supported publish extensions, without leading dots.
    pub fn supported_extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn shot_metadata(&self) -> Option<&ShotMetadataConfig> {
        self.shot_metadata.as_ref()
    }

    pub fn is_shot_metadata_enabled(&self) -> bool {
        self.shot_metadata.as_ref().is_some_and(|m| m.enabled)
    }

    pub fn render_settings(&self) -> Option<&RenderSettingsConfig> {
        self.render_settings.as_ref()
    }

    pub fn is_render_settings_enabled(&self) -> bool {
        self.render_settings.as_ref().is_some_and(|r| r.enabled)
    }
}

/// Rewrites the document's `version` field to `target_version`.
///
/// Fails with [`ConfigError::MigrationUnsupported`] when the target is not in
/// [`SUPPORTED_VERSIONS`]. Structural migrations hook in here once two
/// versions actually differ in shape; today the copy-with-new-version is the
/// whole migration.
pub fn migrate(document: &Value, target_version: &str) -> Result<Value, ConfigError> {
    if !SUPPORTED_VERSIONS.contains(&target_version) {
        return Err(ConfigError::MigrationUnsupported {
            target_version: target_version.to_string(),
        });
    }
    let current = document.get("version").and_then(Value::as_str);
    if current == Some(target_version) {
        return Ok(document.clone());
    }
    let mut migrated = document.clone();
    if let Some(map) = migrated.as_object_mut() {
        map.insert(
            "version".to_string(),
            Value::String(target_version.to_string()),
        );
    }
    debug!(
        target: "config",
        from = current.unwrap_or("<missing>"),
        to = target_version,
        "configuration migrated"
    );
    Ok(migrated)
}

/// Searches the conventional locations for a configuration file.
///
/// Order: explicit path, `CTX_CONFIG_PATH` environment variable,
/// `project_configs/ctx_config.json` under `base_dir`. The first candidate
/// that exists wins.
pub fn find_config(explicit: Option<&Path>, base_dir: Option<&Path>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
        if !env_path.is_empty() {
            candidates.push(PathBuf::from(env_path));
        }
    }
    if let Some(base) = base_dir {
        candidates.push(base.join(CONFIG_RELATIVE_PATH));
    }
    candidates.into_iter().find(|p| p.exists())
}
