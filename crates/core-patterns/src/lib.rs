//! Named, precompiled regex patterns for filenames, namespaces, versions,
//! and shot contexts.
//!
//! The engine ships defaults for the four well-known pattern names; a
//! config's `patterns` section overrides any of them and may add more.
//! Every pattern compiles exactly once at construction. The wire form of a
//! pattern stays position-based (user configs carry plain capture groups),
//! so each built-in parser documents its capture layout here rather than
//! relying on named groups.
//!
//! Capture layouts for the defaults:
//! * `fullFilename`: `(ep)(seq)(shot)(assetType)(assetName)(variant)(ext)`
//! * `namespace`: `(assetType)(assetName)(variant)`
//! * `version`: `(digits)` from the first `v###` occurrence
//! * `shotContext`: `(ep)(seq)(shot)` anywhere in the input

use std::collections::BTreeMap;

use core_config::ProjectConfig;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Well-known pattern names.
pub const FULL_FILENAME: &str = "fullFilename";
pub const NAMESPACE: &str = "namespace";
pub const VERSION: &str = "version";
pub const SHOT_CONTEXT: &str = "shotContext";

/// Default pattern sources used when the config supplies none.
pub const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        FULL_FILENAME,
        r"^(Ep\d+)_(sq\d+)_(SH\d+)__([A-Z]+)_(.+)_(\d+)\.(abc|ma|mb|vdb|ass|rs)$",
    ),
    (NAMESPACE, r"^([A-Z]+)_(.+)_(\d+)$"),
    (VERSION, r"v(\d{3})"),
    (SHOT_CONTEXT, r"(Ep\d+)_(sq\d+)_(SH\d+)"),
];

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern '{name}' is empty")]
    Empty { name: String },

    #[error("pattern '{name}' has invalid regex syntax ({source_text}): {reason}")]
    CompileFailed {
        name: String,
        source_text: String,
        reason: String,
    },
}

/// Parsed components of a published filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameParts {
    pub ep: String,
    pub seq: String,
    pub shot: String,
    pub asset_type: String,
    pub asset_name: String,
    pub variant: String,
    pub extension: String,
}

/// Parsed components of an asset namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceParts {
    pub asset_type: String,
    pub asset_name: String,
    pub variant: String,
}

/// Parsed `(ep, seq, shot)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotContextParts {
    pub ep: String,
    pub seq: String,
    pub shot: String,
}

impl ShotContextParts {
    /// Canonical shot identifier: `Ep04_sq0070_SH0170`.
    pub fn shot_id(&self) -> String {
        format!("{}_{}_{}", self.ep, self.seq, self.shot)
    }
}

/// Named pattern lookup with compiled regexes.
#[derive(Debug, Clone)]
pub struct PatternSet {
    sources: BTreeMap<String, String>,
    compiled: BTreeMap<String, Regex>,
}

impl PatternSet {
    /// Builds the default pattern set.
    pub fn defaults() -> Self {
        // Defaults are compile-checked by tests; unwrap here would only fire
        // on a broken constant.
        Self::from_sources(BTreeMap::new()).expect("default patterns compile")
    }

    /// Builds from the config's `patterns` section merged over the defaults.
    pub fn from_config(config: &ProjectConfig) -> Result<Self, PatternError> {
        Self::from_sources(config.patterns().clone())
    }

    /// Merges `overrides` over the defaults and compiles everything.
    pub fn from_sources(overrides: BTreeMap<String, String>) -> Result<Self, PatternError> {
        let mut sources: BTreeMap<String, String> = DEFAULT_PATTERNS
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();
        sources.extend(overrides);

        let mut compiled = BTreeMap::new();
        for (name, source) in &sources {
            if source.trim().is_empty() {
                return Err(PatternError::Empty { name: name.clone() });
            }
            let regex = Regex::new(source).map_err(|e| PatternError::CompileFailed {
                name: name.clone(),
                source_text: source.clone(),
                reason: e.to_string(),
            })?;
            compiled.insert(name.clone(), regex);
        }
        debug!(target: "patterns", count = compiled.len(), "patterns compiled");
        Ok(Self { sources, compiled })
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    pub fn compiled(&self, name: &str) -> Option<&Regex> {
        self.compiled.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Parses a full published filename into its seven components.
    pub fn parse_filename(&self, filename: &str) -> Option<FilenameParts> {
        let regex = self.compiled(FULL_FILENAME)?;
        let caps = regex.captures(filename)?;
        if caps.len() < 8 {
            return None;
        }
        Some(FilenameParts {
            ep: caps[1].to_string(),
            seq: caps[2].to_string(),
            shot: caps[3].to_string(),
            asset_type: caps[4].to_string(),
            asset_name: caps[5].to_string(),
            variant: caps[6].to_string(),
            extension: caps[7].to_string(),
        })
    }

    /// Parses an asset namespace (`CHAR_CatStompie_001`).
    pub fn parse_namespace(&self, namespace: &str) -> Option<NamespaceParts> {
        let regex = self.compiled(NAMESPACE)?;
        let caps = regex.captures(namespace)?;
        if caps.len() < 4 {
            return None;
        }
        Some(NamespaceParts {
            asset_type: caps[1].to_string(),
            asset_name: caps[2].to_string(),
            variant: caps[3].to_string(),
        })
    }

    /// Extracts the numeric version from the first `v###` occurrence.
    pub fn parse_version(&self, text: &str) -> Option<u32> {
        let regex = self.compiled(VERSION)?;
        let caps = regex.captures(text)?;
        caps.get(1)?.as_str().parse().ok()
    }

    /// Finds an `(ep, seq, shot)` triple anywhere in the input (filename,
    /// path, scene name).
    pub fn parse_shot_context(&self, text: &str) -> Option<ShotContextParts> {
        let regex = self.compiled(SHOT_CONTEXT)?;
        let caps = regex.captures(text)?;
        if caps.len() < 4 {
            return None;
        }
        Some(ShotContextParts {
            ep: caps[1].to_string(),
            seq: caps[2].to_string(),
            shot: caps[3].to_string(),
        })
    }

    /// Tests a named pattern against a string, returning whether it matched
    /// and the captured groups. Unknown pattern names simply do not match.
    pub fn test(&self, pattern_name: &str, input: &str) -> (bool, Vec<String>) {
        let Some(regex) = self.compiled(pattern_name) else {
            return (false, Vec::new());
        };
        match regex.captures(input) {
            Some(caps) => {
                let groups = caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                (true, groups)
            }
            None => (false, Vec::new()),
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::defaults()
    }
}
