//! Token-based path templates.
//!
//! Grammar: a token is `$ident` with `ident = [A-Za-z][A-Za-z0-9]*`
//! (camelCase convention). Underscore is a literal separator and never part
//! of a token name, so `$ep_$seq_$shot` contains three tokens.
//!
//! Expansion is single-pass and tolerant: a token missing from the context
//! is left in place verbatim, and the output is never re-scanned for
//! secondary expansion. Strictness belongs to the resolver, which
//! re-extracts tokens from the expanded string and treats any remainder as
//! a typed error.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use core_config::ProjectConfig;
use regex::{Captures, Regex};
use thiserror::Error;

/// Token values keyed by token name. Ordered so diagnostics print stably.
pub type Context = BTreeMap<String, String>;

/// Token name reserved for version substitution (`$ver`).
pub const VERSION_TOKEN: &str = "ver";

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(r"\$([A-Za-z][A-Za-z0-9]*)").expect("token regex compiles"))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,

    #[error("template is missing required tokens: {}", missing.join(", "))]
    MissingRequiredTokens { missing: Vec<String> },
}

/// Extracts token names from a template, unique, in first-seen order.
pub fn extract_tokens(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in token_regex().captures_iter(template) {
        let name = &caps[1];
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Replaces every token found in `context`; unknown tokens stay in place.
///
/// `version_override` wins over `context["ver"]` when supplied.
pub fn expand(template: &str, context: &Context, version_override: Option<&str>) -> String {
    if template.is_empty() {
        return String::new();
    }
    token_regex()
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            if name == VERSION_TOKEN {
                if let Some(version) = version_override {
                    return version.to_string();
                }
            }
            match context.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Checks that a template is non-empty and contains every required token.
pub fn validate(template: &str, required: Option<&[&str]>) -> Result<(), TemplateError> {
    if template.trim().is_empty() {
        return Err(TemplateError::Empty);
    }
    if let Some(required) = required {
        let tokens = extract_tokens(template);
        let missing: Vec<String> = required
            .iter()
            .filter(|r| !tokens.iter().any(|t| t == *r))
            .map(|r| r.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::MissingRequiredTokens { missing });
        }
    }
    Ok(())
}

/// Maps each token in the template to its context value (`None` when the
/// context has no entry). Diagnostic helper for resolver error reporting.
pub fn token_values(template: &str, context: &Context) -> BTreeMap<String, Option<String>> {
    extract_tokens(template)
        .into_iter()
        .map(|name| {
            let value = context.get(&name).cloned();
            (name, value)
        })
        .collect()
}

/// Named templates loaded from the config's `templates` section.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            templates: config.templates().clone(),
        }
    }

    pub fn from_map(templates: BTreeMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Tokens of a named template; `None` when the template is unknown.
    pub fn tokens_of(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(extract_tokens)
    }

    /// Validates that a named template contains every required token.
    /// Returns the missing tokens (all of `required` when the template is
    /// unknown).
    pub fn validate_required(&self, name: &str, required: &[&str]) -> (bool, Vec<String>) {
        match self.tokens_of(name) {
            None => (false, required.iter().map(|s| s.to_string()).collect()),
            Some(tokens) => {
                let missing: Vec<String> = required
                    .iter()
                    .filter(|r| !tokens.iter().any(|t| t == *r))
                    .map(|r| r.to_string())
                    .collect();
                (missing.is_empty(), missing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extract_unique_first_seen_order() {
        let tokens = extract_tokens("$projRoot$project/$ep/$seq/$ep");
        assert_eq!(tokens, vec!["projRoot", "project", "ep", "seq"]);
    }

    #[test]
    fn underscore_separates_tokens() {
        let tokens = extract_tokens("$ep_$seq_$shot__$assetType_$assetName_$variant.$ext");
        assert_eq!(
            tokens,
            vec!["ep", "seq", "shot", "assetType", "assetName", "variant", "ext"]
        );
    }

    #[test]
    fn expand_substitutes_all_known_tokens() {
        let context = ctx(&[
            ("projRoot", "V:/"),
            ("project", "SWA"),
            ("sceneBase", "all/scene"),
            ("ep", "Ep04"),
            ("seq", "sq0070"),
            ("shot", "SH0170"),
            ("dept", "anim"),
        ]);
        let out = expand(
            "$projRoot$project/$sceneBase/$ep/$seq/$shot/$dept/publish",
            &context,
            None,
        );
        assert_eq!(out, "V:/SWA/all/scene/Ep04/sq0070/SH0170/anim/publish");
        assert!(extract_tokens(&out).is_empty());
    }

    #[test]
    fn unknown_tokens_left_in_place() {
        let out = expand("$ep/$mystery/$shot", &ctx(&[("ep", "Ep04"), ("shot", "SH0170")]), None);
        assert_eq!(out, "Ep04/$mystery/SH0170");
        assert_eq!(extract_tokens(&out), vec!["mystery"]);
    }

    #[test]
    fn version_override_beats_context() {
        let context = ctx(&[("ver", "v001"), ("ep", "Ep04")]);
        assert_eq!(expand("$ep/$ver", &context, Some("v003")), "Ep04/v003");
        assert_eq!(expand("$ep/$ver", &context, None), "Ep04/v001");
    }

    #[test]
    fn version_override_applies_without_context_entry() {
        assert_eq!(expand("$ver", &Context::new(), Some("v007")), "v007");
    }

    #[test]
    fn expansion_is_single_pass() {
        // A substituted value containing token syntax must not be re-expanded.
        let context = ctx(&[("a", "$b"), ("b", "never")]);
        assert_eq!(expand("$a", &context, None), "$b");
    }

    #[test]
    fn validate_empty_template() {
        assert_eq!(validate("  ", None), Err(TemplateError::Empty));
        assert_eq!(validate("$ep", None), Ok(()));
    }

    #[test]
    fn validate_required_tokens() {
        let err = validate("$ep/$seq", Some(&["ep", "seq", "shot"])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingRequiredTokens {
                missing: vec!["shot".to_string()]
            }
        );
        assert!(validate("$ep/$seq/$shot", Some(&["ep", "shot"])).is_ok());
    }

    #[test]
    fn token_values_reports_missing_as_none() {
        let values = token_values("$ep/$dept", &ctx(&[("ep", "Ep04")]));
        assert_eq!(values.get("ep"), Some(&Some("Ep04".to_string())));
        assert_eq!(values.get("dept"), Some(&None));
    }

    #[test]
    fn template_set_lookup_and_required_validation() {
        let mut map = BTreeMap::new();
        map.insert(
            "publishPath".to_string(),
            "$projRoot$project/$ep/$seq/$shot/$dept/publish".to_string(),
        );
        let set = TemplateSet::from_map(map);
        assert!(set.contains("publishPath"));
        assert_eq!(set.get("missing"), None);
        assert_eq!(
            set.tokens_of("publishPath").unwrap(),
            vec!["projRoot", "project", "ep", "seq", "shot", "dept"]
        );

        let (ok, missing) = set.validate_required("publishPath", &["ep", "seq", "shot"]);
        assert!(ok);
        assert!(missing.is_empty());

        let (ok, missing) = set.validate_required("publishPath", &["ver"]);
        assert!(!ok);
        assert_eq!(missing, vec!["ver"]);

        let (ok, missing) = set.validate_required("missing", &["ep"]);
        assert!(!ok);
        assert_eq!(missing, vec!["ep"]);
    }
}
