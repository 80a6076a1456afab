//! Schema validation for configuration documents.
//!
//! Validation never stops at the first problem: every check appends to the
//! error list so a broken config surfaces all of its defects in one pass.
//! Warnings carry deprecation notices (legacy snake_case section keys) and
//! never fail validation on their own.

use regex::Regex;
use serde_json::Value;

use crate::SUPPORTED_VERSIONS;

/// Required top-level keys, canonical casing.
pub const REQUIRED_KEYS: &[&str] = &[
    "version",
    "project",
    "roots",
    "staticPaths",
    "templates",
    "patterns",
];

/// Required fields inside the `project` section.
pub const REQUIRED_PROJECT_FIELDS: &[&str] = &["name", "code"];

/// Legacy snake_case spellings accepted with a deprecation warning.
const LEGACY_SECTION_KEYS: &[(&str, &str)] = &[
    ("static_paths", "staticPaths"),
    ("shot_metadata", "shotMetadata"),
    ("render_settings", "renderSettings"),
];

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates a parsed configuration document.
pub fn validate(doc: &Value) -> Validation {
    let mut v = Validation::default();

    let Some(root) = doc.as_object() else {
        v.errors
            .push(format!("configuration must be an object, got {}", type_name(doc)));
        return v;
    };

    // Legacy spellings satisfy the required-key check but are flagged.
    for (legacy, canonical) in LEGACY_SECTION_KEYS {
        if root.contains_key(*legacy) {
            v.warnings.push(format!(
                "section key '{legacy}' is deprecated; use '{canonical}'"
            ));
        }
    }

    for key in REQUIRED_KEYS {
        let present = root.contains_key(*key)
            || LEGACY_SECTION_KEYS
                .iter()
                .any(|(legacy, canonical)| canonical == key && root.contains_key(*legacy));
        if !present {
            v.errors.push(format!("missing required key: '{key}'"));
        }
    }

    if let Some(version) = root.get("version") {
        validate_version(version, &mut v);
    }
    if let Some(project) = root.get("project") {
        validate_project(project, &mut v);
    }
    if let Some(roots) = root.get("roots") {
        validate_roots(roots, &mut v);
    }
    if let Some(static_paths) = root.get("staticPaths").or_else(|| root.get("static_paths")) {
        validate_string_section("static path", static_paths, false, &mut v);
    }
    if let Some(templates) = root.get("templates") {
        validate_string_section("template", templates, true, &mut v);
    }
    if let Some(patterns) = root.get("patterns") {
        validate_patterns(patterns, &mut v);
    }
    if let Some(tokens) = root.get("tokens") {
        validate_tokens(tokens, &mut v);
    }

    v
}

fn validate_version(version: &Value, v: &mut Validation) {
    let Some(version) = version.as_str() else {
        v.errors.push(format!(
            "version must be a string, got {}",
            type_name(version)
        ));
        return;
    };
    if !SUPPORTED_VERSIONS.contains(&version) {
        v.errors.push(format!(
            "unsupported version '{}'; supported versions: {}",
            version,
            SUPPORTED_VERSIONS.join(", ")
        ));
    }
}

fn validate_project(project: &Value, v: &mut Validation) {
    let Some(map) = project.as_object() else {
        v.errors.push(format!(
            "'project' must be an object, got {}",
            type_name(project)
        ));
        return;
    };
    for field in REQUIRED_PROJECT_FIELDS {
        match map.get(*field) {
            None => v
                .errors
                .push(format!("missing required project field: '{field}'")),
            Some(value) => match value.as_str() {
                None => v.errors.push(format!(
                    "project {} must be a string, got {}",
                    field,
                    type_name(value)
                )),
                Some(s) if s.trim().is_empty() => {
                    v.errors.push(format!("project {field} is empty"));
                }
                Some(_) => {}
            },
        }
    }
}

fn validate_roots(roots: &Value, v: &mut Validation) {
    let Some(map) = roots.as_object() else {
        v.errors
            .push(format!("'roots' must be an object, got {}", type_name(roots)));
        return;
    };
    if map.is_empty() {
        v.errors.push("roots section is empty".to_string());
        return;
    }
    let platform_keyed = map.contains_key("windows") || map.contains_key("linux");
    if platform_keyed {
        for (platform, table) in map {
            if !matches!(platform.as_str(), "windows" | "linux") {
                v.errors
                    .push(format!("unknown platform key in roots: '{platform}'"));
                continue;
            }
            let Some(table) = table.as_object() else {
                v.errors.push(format!(
                    "roots.{} must be an object, got {}",
                    platform,
                    type_name(table)
                ));
                continue;
            };
            for (name, value) in table {
                if !value.is_string() {
                    v.errors.push(format!(
                        "root '{}' ({}) must be a string, got {}",
                        name,
                        platform,
                        type_name(value)
                    ));
                }
            }
        }
    } else {
        for (name, value) in map {
            if !value.is_string() {
                v.errors.push(format!(
                    "root '{}' must be a string, got {}",
                    name,
                    type_name(value)
                ));
            }
        }
    }
}

fn validate_string_section(label: &str, section: &Value, reject_empty: bool, v: &mut Validation) {
    let Some(map) = section.as_object() else {
        v.errors.push(format!(
            "{label}s section must be an object, got {}",
            type_name(section)
        ));
        return;
    };
    for (name, value) in map {
        match value.as_str() {
            None => v.errors.push(format!(
                "{} '{}' must be a string, got {}",
                label,
                name,
                type_name(value)
            )),
            Some(s) if reject_empty && s.trim().is_empty() => {
                v.errors.push(format!("{label} '{name}' is empty"));
            }
            Some(_) => {}
        }
    }
}

fn validate_patterns(patterns: &Value, v: &mut Validation) {
    let Some(map) = patterns.as_object() else {
        v.errors.push(format!(
            "'patterns' must be an object, got {}",
            type_name(patterns)
        ));
        return;
    };
    for (name, value) in map {
        match value.as_str() {
            None => v.errors.push(format!(
                "pattern '{}' must be a string, got {}",
                name,
                type_name(value)
            )),
            Some(s) if s.trim().is_empty() => {
                v.errors.push(format!("pattern '{name}' is empty"));
            }
            Some(source) => {
                if let Err(e) = Regex::new(source) {
                    v.errors
                        .push(format!("pattern '{name}' has invalid regex syntax: {e}"));
                }
            }
        }
    }
}

fn validate_tokens(tokens: &Value, v: &mut Validation) {
    let Some(map) = tokens.as_object() else {
        v.errors.push(format!(
            "'tokens' must be an object, got {}",
            type_name(tokens)
        ));
        return;
    };
    for (name, def) in map {
        let Some(def) = def.as_object() else {
            v.errors.push(format!(
                "token '{}' must be an object, got {}",
                name,
                type_name(def)
            ));
            continue;
        };
        if let Some(values) = def.get("values") {
            match values.as_array() {
                None => v.errors.push(format!(
                    "token '{}' values must be an array, got {}",
                    name,
                    type_name(values)
                )),
                Some(values) => {
                    for value in values {
                        if !value.is_string() {
                            v.errors.push(format!(
                                "token '{}' has a non-string value: {}",
                                name,
                                type_name(value)
                            ));
                        }
                    }
                }
            }
        }
    }
}
