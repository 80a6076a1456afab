//! High-level path building from filenames or namespaces.
//!
//! Callers usually hold one of two strings: a full published filename
//! (`Ep04_sq0070_SH0170__CHAR_CatStompie_002.abc`), which carries its own
//! shot context, or a bare namespace (`CHAR_CatStompie_002`), which needs a
//! shot context supplied alongside. The builder detects which one it was
//! given, assembles the merged context, resolves `"latest"` against the
//! version cache when one is attached, and hands off to the resolver.
//!
//! Failures here are soft: the builder logs and returns `None`, because its
//! callers (UI pickers, bulk relink passes) treat an unresolvable input as
//! "skip this one", not as a stop-the-world error.

use core_cache::VersionCache;
use core_patterns::PatternSet;
use core_template::Context;
use tracing::{debug, error, info, warn};

use crate::PathResolver;

/// Template used to resolve a shot's publish directory for cache lookups.
pub const PUBLISH_PATH_TEMPLATE: &str = "publishPath";

/// Default template for full asset file paths.
pub const ASSET_PATH_TEMPLATE: &str = "assetPath";

/// Version string meaning "newest cached version".
pub const LATEST: &str = "latest";

/// What kind of input string the builder detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Filename,
    Namespace,
}

/// Builds full asset paths from filenames or namespaces.
#[derive(Debug, Clone, Copy)]
pub struct PathBuilder<'a> {
    patterns: &'a PatternSet,
    resolver: PathResolver<'a>,
    cache: Option<&'a VersionCache>,
}

impl<'a> PathBuilder<'a> {
    pub fn new(
        patterns: &'a PatternSet,
        resolver: PathResolver<'a>,
        cache: Option<&'a VersionCache>,
    ) -> Self {
        Self {
            patterns,
            resolver,
            cache,
        }
    }

    /// Detects whether `input` is a full filename or a namespace.
    pub fn detect_input_format(&self, input: &str) -> Option<InputFormat> {
        if input.is_empty() {
            return None;
        }
        if self.patterns.parse_filename(input).is_some() {
            return Some(InputFormat::Filename);
        }
        if self.patterns.parse_namespace(input).is_some() {
            return Some(InputFormat::Namespace);
        }
        None
    }

    /// Context from a full filename: shot triple plus asset fields.
    pub fn context_from_filename(&self, filename: &str) -> Option<Context> {
        let parts = self.patterns.parse_filename(filename)?;
        let mut context = Context::new();
        context.insert("ep".to_string(), parts.ep);
        context.insert("seq".to_string(), parts.seq);
        context.insert("shot".to_string(), parts.shot);
        context.insert("assetType".to_string(), parts.asset_type);
        context.insert("assetName".to_string(), parts.asset_name);
        context.insert("variant".to_string(), parts.variant);
        context.insert("ext".to_string(), parts.extension);
        Some(context)
    }

    /// Context from a namespace merged over a shot context (`ep`, `seq`,
    /// `shot`, and usually `dept`).
    pub fn context_from_namespace(&self, namespace: &str, shot_context: &Context) -> Option<Context> {
        let parts = self.patterns.parse_namespace(namespace)?;
        let mut context = shot_context.clone();
        context.insert("assetType".to_string(), parts.asset_type);
        context.insert("assetName".to_string(), parts.asset_name);
        context.insert("variant".to_string(), parts.variant);
        Some(context)
    }

    /// Builds the full resolved path for `input`.
    ///
    /// `version` is either a literal label (`v002`) or [`LATEST`], in which
    /// case the attached cache is consulted (falling back to the literal
    /// string when no cache or no entry is available, which then fails
    /// resolution visibly rather than guessing).
    pub fn build(
        &self,
        input: &str,
        shot_context: Option<&Context>,
        version: &str,
        template_name: &str,
    ) -> Option<String> {
        if input.is_empty() {
            error!(target: "builder", "empty input string");
            return None;
        }

        info!(target: "builder", input, version, "building path");

        let format = match self.detect_input_format(input) {
            Some(format) => format,
            None => {
                error!(target: "builder", input, "input is neither a filename nor a namespace");
                return None;
            }
        };
        debug!(target: "builder", ?format, "detected input format");

        let full_context = match format {
            InputFormat::Filename => self.context_from_filename(input)?,
            InputFormat::Namespace => {
                let Some(shot_context) = shot_context else {
                    error!(target: "builder", input, "namespace input requires a shot context");
                    return None;
                };
                self.context_from_namespace(input, shot_context)?
            }
        };

        let resolved_version = if version == LATEST {
            self.latest_from_cache(&full_context)
                .unwrap_or_else(|| version.to_string())
        } else {
            version.to_string()
        };

        match self
            .resolver
            .resolve(template_name, &full_context, Some(resolved_version.as_str()), false)
        {
            Ok(path) => {
                info!(target: "builder", %path, "built path");
                Some(path)
            }
            Err(err) => {
                error!(target: "builder", input, error = %err, "failed to resolve path");
                None
            }
        }
    }

    /// Resolves the shot's publish path and queries the cache for the
    /// asset's newest version.
    fn latest_from_cache(&self, context: &Context) -> Option<String> {
        let cache = self.cache?;
        let asset_key = core_cache::asset_key(
            context.get("assetType").map(String::as_str).unwrap_or("UNKNOWN"),
            context.get("assetName").map(String::as_str).unwrap_or("UNKNOWN"),
            context.get("variant").map(String::as_str).unwrap_or("000"),
        );

        let publish_path = match self
            .resolver
            .resolve(PUBLISH_PATH_TEMPLATE, context, None, false)
        {
            Ok(path) => path,
            Err(err) => {
                warn!(
                    target: "builder",
                    error = %err,
                    "could not resolve publish path for cache lookup"
                );
                return None;
            }
        };

        match cache.latest(&publish_path, &asset_key) {
            Some(latest) => {
                info!(target: "builder", asset_key = %asset_key, latest, "resolved latest version");
                Some(latest.to_string())
            }
            None => {
                warn!(target: "builder", asset_key = %asset_key, "no cached version for asset");
                None
            }
        }
    }
}
