//! Path resolution: templates + context + platform + version -> paths.
//!
//! The resolver is the strict counterpart to the tolerant token expander.
//! It unions the context layers (platform-mapped roots, static paths,
//! project code, caller context, version), expands the named template, then
//! re-extracts tokens from the result: any remainder is a typed
//! [`ResolveError::TokenExpansionFailed`] instead of a silently broken path.
//!
//! [`PathBuilder`] sits on top for callers that start from a published
//! filename or a namespace rather than an explicit context.

use std::path::Path;

use core_config::{PlatformMapper, ProjectConfig};
use core_template::Context;
use thiserror::Error;
use tracing::{debug, error, info, warn};

mod builder;

pub use builder::{InputFormat, PathBuilder, ASSET_PATH_TEMPLATE, LATEST, PUBLISH_PATH_TEMPLATE};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("template '{template_name}' not found in configuration; available: {}", available.join(", "))]
    TemplateNotFound {
        template_name: String,
        available: Vec<String>,
    },

    #[error(
        "failed to expand tokens in template '{template}'; unexpanded: {}; context keys: {}",
        unexpanded.join(", "),
        context_keys.join(", ")
    )]
    TokenExpansionFailed {
        template: String,
        unexpanded: Vec<String>,
        context_keys: Vec<String>,
    },

    #[error("path validation failed for '{path}': {reason}")]
    PathValidationFailed { path: String, reason: String },
}

/// Last-resort hook: called with the template name, the caller's context,
/// and the typed error; a `Some` result is returned as a successful
/// resolution.
pub type FallbackStrategy<'f> = dyn Fn(&str, &Context, &ResolveError) -> Option<String> + 'f;

/// Collapses repeated separators and normalizes to forward slashes.
/// A leading `//` (UNC) is preserved.
pub fn normalize_resolved_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    let unc = forward.starts_with("//");
    let mut out = String::with_capacity(forward.len());
    let mut last_was_slash = false;
    for ch in forward.chars() {
        if ch == '/' {
            if !last_was_slash {
                out.push(ch);
            }
            last_was_slash = true;
        } else {
            out.push(ch);
            last_was_slash = false;
        }
    }
    if unc {
        out.insert(0, '/');
    }
    out
}

/// Resolves named templates into concrete paths.
///
/// Borrowed from the pipeline per call; holds no state of its own.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    config: &'a ProjectConfig,
    mapper: &'a PlatformMapper,
}

impl<'a> PathResolver<'a> {
    pub fn new(config: &'a ProjectConfig, mapper: &'a PlatformMapper) -> Self {
        Self { config, mapper }
    }

    pub fn config(&self) -> &'a ProjectConfig {
        self.config
    }

    /// Resolves `template_name` under `context`.
    ///
    /// The full context is layered in override order: platform-mapped root
    /// values, static paths, `project` (the project code), the caller's
    /// context, then `ver` when `version` is supplied.
    pub fn resolve(
        &self,
        template_name: &str,
        context: &Context,
        version: Option<&str>,
        validate_exists: bool,
    ) -> Result<String, ResolveError> {
        let Some(template) = self.config.template(template_name) else {
            let available: Vec<String> = self
                .config
                .templates()
                .keys()
                .cloned()
                .collect();
            error!(
                target: "resolver",
                template = template_name,
                available = %available.join(", "),
                "template not found"
            );
            return Err(ResolveError::TemplateNotFound {
                template_name: template_name.to_string(),
                available,
            });
        };

        debug!(target: "resolver", template = template_name, source = template, "resolving template");

        let full_context = self.build_full_context(context, version);
        let expanded = core_template::expand(template, &full_context, version);

        let remaining = core_template::extract_tokens(&expanded);
        if !remaining.is_empty() {
            error!(
                target: "resolver",
                template = template_name,
                unexpanded = %remaining.join(", "),
                "unexpanded tokens after resolution"
            );
            return Err(ResolveError::TokenExpansionFailed {
                template: template.to_string(),
                unexpanded: remaining,
                context_keys: full_context.keys().cloned().collect(),
            });
        }

        let resolved = normalize_resolved_path(&expanded);
        debug!(target: "resolver", template = template_name, path = %resolved, "resolved");

        if validate_exists && !Path::new(&resolved).exists() {
            warn!(target: "resolver", path = %resolved, "resolved path does not exist");
            return Err(ResolveError::PathValidationFailed {
                path: resolved,
                reason: "path does not exist".to_string(),
            });
        }

        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve), consulting `fallback` on any typed
    /// error. A fallback that itself returns `None` re-raises the original
    /// error.
    pub fn resolve_with_fallback(
        &self,
        template_name: &str,
        context: &Context,
        version: Option<&str>,
        validate_exists: bool,
        fallback: &FallbackStrategy<'_>,
    ) -> Result<String, ResolveError> {
        match self.resolve(template_name, context, version, validate_exists) {
            Ok(path) => Ok(path),
            Err(err) => {
                info!(target: "resolver", template = template_name, "attempting fallback strategy");
                match fallback(template_name, context, &err) {
                    Some(path) => {
                        info!(target: "resolver", %path, "fallback strategy succeeded");
                        Ok(path)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Resolves one template across many contexts.
    ///
    /// With `stop_on_error` the first failure aborts the batch; otherwise
    /// each item yields `(path, None)` or `(None, error)`.
    #[allow(clippy::type_complexity)]
    pub fn resolve_batch(
        &self,
        template_name: &str,
        contexts: &[Context],
        version: Option<&str>,
        validate_exists: bool,
        stop_on_error: bool,
        fallback: Option<&FallbackStrategy<'_>>,
    ) -> Result<Vec<(Option<String>, Option<ResolveError>)>, ResolveError> {
        info!(
            target: "resolver",
            template = template_name,
            contexts = contexts.len(),
            "batch resolving"
        );
        let mut results = Vec::with_capacity(contexts.len());
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for (index, context) in contexts.iter().enumerate() {
            let outcome = match fallback {
                Some(fallback) => self.resolve_with_fallback(
                    template_name,
                    context,
                    version,
                    validate_exists,
                    fallback,
                ),
                None => self.resolve(template_name, context, version, validate_exists),
            };
            match outcome {
                Ok(path) => {
                    succeeded += 1;
                    results.push((Some(path), None));
                }
                Err(err) => {
                    failed += 1;
                    debug!(target: "resolver", index, error = %err, "batch item failed");
                    if stop_on_error {
                        error!(target: "resolver", index, "stopping batch on error");
                        return Err(err);
                    }
                    results.push((None, Some(err)));
                }
            }
        }

        info!(target: "resolver", succeeded, failed, "batch resolution complete");
        Ok(results)
    }

    /// Union of the context layers described on [`resolve`](Self::resolve).
    pub fn build_full_context(&self, context: &Context, version: Option<&str>) -> Context {
        let mut full = Context::new();
        for root_name in self.config.root_names() {
            if let Some(root_path) = self.mapper.root_for(root_name, None) {
                full.insert(root_name.to_string(), root_path.to_string());
            }
        }
        for (name, value) in self.config.static_paths() {
            full.insert(name.clone(), value.clone());
        }
        full.insert("project".to_string(), self.config.project_code().to_string());
        for (key, value) in context {
            full.insert(key.clone(), value.clone());
        }
        if let Some(version) = version {
            full.insert(core_template::VERSION_TOKEN.to_string(), version.to_string());
        }
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::Platform;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_config() -> ProjectConfig {
        let doc = json!({
            "version": "1.1",
            "project": {"name": "Shadow Wars", "code": "SWA"},
            "roots": {
                "windows": {"projRoot": "V:/"},
                "linux": {"projRoot": "/mnt/igloo_swa_v/"}
            },
            "staticPaths": {"sceneBase": "all/scene"},
            "templates": {
                "publishPath": "$projRoot$project/$sceneBase/$ep/$seq/$shot/$dept/publish",
                "assetPath": "$projRoot$project/$sceneBase/$ep/$seq/$shot/$dept/publish/$ver/$ep_$seq_$shot__$assetType_$assetName_$variant.$ext"
            },
            "patterns": {}
        });
        ProjectConfig::from_document(doc, None).unwrap()
    }

    fn shot_context() -> Context {
        [
            ("ep", "Ep04"),
            ("seq", "sq0070"),
            ("shot", "SH0170"),
            ("dept", "anim"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn resolves_publish_path_on_windows_roots() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let path = resolver
            .resolve("publishPath", &shot_context(), None, false)
            .unwrap();
        assert_eq!(path, "V:/SWA/all/scene/Ep04/sq0070/SH0170/anim/publish");
    }

    #[test]
    fn resolves_same_template_under_linux_roots() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Linux);
        let resolver = PathResolver::new(&config, &mapper);
        let path = resolver
            .resolve("publishPath", &shot_context(), None, false)
            .unwrap();
        assert_eq!(
            path,
            "/mnt/igloo_swa_v/SWA/all/scene/Ep04/sq0070/SH0170/anim/publish"
        );
    }

    #[test]
    fn version_layer_fills_ver_token() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let mut context = shot_context();
        for (k, v) in [
            ("assetType", "CHAR"),
            ("assetName", "CatStompie"),
            ("variant", "001"),
            ("ext", "abc"),
        ] {
            context.insert(k.to_string(), v.to_string());
        }
        let path = resolver
            .resolve("assetPath", &context, Some("v003"), false)
            .unwrap();
        assert_eq!(
            path,
            "V:/SWA/all/scene/Ep04/sq0070/SH0170/anim/publish/v003/Ep04_sq0070_SH0170__CHAR_CatStompie_001.abc"
        );
    }

    #[test]
    fn unknown_template_lists_available() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let err = resolver
            .resolve("cachePath", &shot_context(), None, false)
            .unwrap_err();
        match err {
            ResolveError::TemplateNotFound {
                template_name,
                available,
            } => {
                assert_eq!(template_name, "cachePath");
                assert_eq!(available, vec!["assetPath", "publishPath"]);
            }
            other => panic!("expected TemplateNotFound, got {other:?}"),
        }
    }

    #[test]
    fn missing_tokens_surface_as_typed_error() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let mut context = shot_context();
        context.remove("dept");
        let err = resolver
            .resolve("publishPath", &context, None, false)
            .unwrap_err();
        match err {
            ResolveError::TokenExpansionFailed {
                unexpanded,
                context_keys,
                ..
            } => {
                assert_eq!(unexpanded, vec!["dept"]);
                assert!(context_keys.contains(&"ep".to_string()));
                assert!(context_keys.contains(&"project".to_string()));
            }
            other => panic!("expected TokenExpansionFailed, got {other:?}"),
        }
    }

    #[test]
    fn caller_context_overrides_config_layers() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let mut context = shot_context();
        context.insert("project".to_string(), "OVR".to_string());
        let path = resolver
            .resolve("publishPath", &context, None, false)
            .unwrap();
        assert!(path.starts_with("V:/OVR/"));
    }

    #[test]
    fn validate_exists_accepts_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let publish = dir.path().join("SWA/all/scene/Ep04/sq0070/SH0170/anim/publish");
        std::fs::create_dir_all(&publish).unwrap();

        let doc = json!({
            "version": "1.1",
            "project": {"name": "Shadow Wars", "code": "SWA"},
            "roots": {"projRoot": format!("{}/", dir.path().display())},
            "staticPaths": {"sceneBase": "all/scene"},
            "templates": {
                "publishPath": "$projRoot$project/$sceneBase/$ep/$seq/$shot/$dept/publish"
            },
            "patterns": {}
        });
        let config = ProjectConfig::from_document(doc, None).unwrap();
        let mapper = PlatformMapper::with_platform(&config, Platform::current());
        let resolver = PathResolver::new(&config, &mapper);
        let path = resolver
            .resolve("publishPath", &shot_context(), None, true)
            .unwrap();
        assert_eq!(path, publish.to_string_lossy().replace('\\', "/"));
    }

    #[test]
    fn validate_exists_fails_for_missing_path() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let err = resolver
            .resolve("publishPath", &shot_context(), None, true)
            .unwrap_err();
        assert!(matches!(err, ResolveError::PathValidationFailed { .. }));
    }

    #[test]
    fn fallback_strategy_rescues_errors() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let fallback = |name: &str, _ctx: &Context, err: &ResolveError| {
            assert!(matches!(err, ResolveError::TemplateNotFound { .. }));
            Some(format!("/fallback/{name}"))
        };
        let path = resolver
            .resolve_with_fallback("cachePath", &shot_context(), None, false, &fallback)
            .unwrap();
        assert_eq!(path, "/fallback/cachePath");
    }

    #[test]
    fn failing_fallback_reraises_original_error() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let fallback = |_: &str, _: &Context, _: &ResolveError| None;
        let err = resolver
            .resolve_with_fallback("cachePath", &shot_context(), None, false, &fallback)
            .unwrap_err();
        assert!(matches!(err, ResolveError::TemplateNotFound { .. }));
    }

    #[test]
    fn batch_collects_per_item_results() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let mut broken = shot_context();
        broken.remove("dept");
        let contexts = vec![shot_context(), broken, shot_context()];
        let results = resolver
            .resolve_batch("publishPath", &contexts, None, false, false, None)
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].0.is_some() && results[0].1.is_none());
        assert!(results[1].0.is_none() && results[1].1.is_some());
        assert!(results[2].0.is_some());
    }

    #[test]
    fn batch_stop_on_error_aborts() {
        let config = test_config();
        let mapper = PlatformMapper::with_platform(&config, Platform::Windows);
        let resolver = PathResolver::new(&config, &mapper);
        let mut broken = shot_context();
        broken.remove("dept");
        let contexts = vec![broken, shot_context()];
        let err = resolver
            .resolve_batch("publishPath", &contexts, None, false, true, None)
            .unwrap_err();
        assert!(matches!(err, ResolveError::TokenExpansionFailed { .. }));
    }

    #[test]
    fn normalization_collapses_separators() {
        assert_eq!(
            normalize_resolved_path(r"V:\SWA\all//scene\Ep04"),
            "V:/SWA/all/scene/Ep04"
        );
        assert_eq!(
            normalize_resolved_path(r"\\server\share\SWA"),
            "//server/share/SWA"
        );
    }
}
