//! Rewrite rule catalogs.
//!
//! Two catalogs drive formula translation: ordered regex pattern rules and
//! function rules keyed by legacy helper name. Both ship embedded in the
//! binary and can be replaced by files at construction time.

use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use log::debug;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::dialects::Dialect;
use crate::error::{TransformationError, TransformationResult};

const EMBEDDED_PATTERNS: &str = include_str!("data/patterns.yaml");
const EMBEDDED_FUNCTIONS: &str = include_str!("data/functions.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct PatternRule {
    pub name: String,
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub hana: String,
    #[serde(default)]
    pub snowflake: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl PatternRule {
    /// Replacement template for `dialect`; empty means the rule does not apply.
    pub fn template(&self, dialect: Dialect) -> &str {
        match dialect {
            Dialect::Hana => &self.hana,
            Dialect::Snowflake => &self.snowflake,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionHandler {
    Template,
    Rename,
    RegexpLike,
    InList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionRule {
    pub name: String,
    pub handler: FunctionHandler,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub dialects: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FunctionRule {
    pub fn applies_to(&self, dialect: Dialect) -> bool {
        self.dialects.is_empty()
            || self
                .dialects
                .iter()
                .any(|d| Dialect::from_str(d).map(|d| d == dialect).unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    #[serde(default)]
    patterns: Vec<PatternRule>,
}

#[derive(Debug, Deserialize)]
struct FunctionFile {
    #[serde(default)]
    functions: Vec<FunctionRule>,
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub rule: PatternRule,
    pub regex: Regex,
}

/// Immutable pattern and function catalogs, shared behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalogs {
    patterns: Vec<CompiledPattern>,
    functions: Vec<FunctionRule>,
}

static EMBEDDED: LazyLock<Result<Arc<RuleCatalogs>, TransformationError>> = LazyLock::new(|| {
    RuleCatalogs::from_yaml(EMBEDDED_PATTERNS, EMBEDDED_FUNCTIONS).map(Arc::new)
});

impl RuleCatalogs {
    /// Catalogs compiled into the crate, parsed once per process.
    pub fn embedded() -> TransformationResult<Arc<RuleCatalogs>> {
        EMBEDDED.as_ref().map(Arc::clone).map_err(Clone::clone)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_yaml(patterns_yaml: &str, functions_yaml: &str) -> TransformationResult<Self> {
        let pattern_file: PatternFile = serde_yaml::from_str(patterns_yaml)
            .map_err(|e| TransformationError::catalog("patterns", &e.to_string()))?;
        let function_file: FunctionFile = serde_yaml::from_str(functions_yaml)
            .map_err(|e| TransformationError::catalog("functions", &e.to_string()))?;

        let mut patterns = Vec::with_capacity(pattern_file.patterns.len());
        for rule in pattern_file.patterns {
            if rule.name.is_empty() || rule.pattern.is_empty() {
                return Err(TransformationError::catalog(
                    "patterns",
                    "pattern rule requires name and match",
                ));
            }
            let regex = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    TransformationError::catalog("patterns", &format!("{}: {}", rule.name, e))
                })?;
            patterns.push(CompiledPattern { rule, regex });
        }

        for rule in &function_file.functions {
            Self::check_function_rule(rule)?;
        }

        debug!(
            "Loaded {} pattern rules and {} function rules",
            patterns.len(),
            function_file.functions.len()
        );

        Ok(Self {
            patterns,
            functions: function_file.functions,
        })
    }

    pub fn from_files<P: AsRef<Path>>(patterns: P, functions: P) -> TransformationResult<Self> {
        let patterns_yaml = fs::read_to_string(patterns.as_ref())?;
        let functions_yaml = fs::read_to_string(functions.as_ref())?;
        Self::from_yaml(&patterns_yaml, &functions_yaml)
    }

    fn check_function_rule(rule: &FunctionRule) -> TransformationResult<()> {
        let valid = match rule.handler {
            FunctionHandler::Template => rule.template.is_some(),
            FunctionHandler::Rename => rule.target.is_some(),
            FunctionHandler::RegexpLike | FunctionHandler::InList => true,
        };
        if rule.name.is_empty() || !valid {
            return Err(TransformationError::catalog(
                "functions",
                &format!("incomplete {:?} rule for '{}'", rule.handler, rule.name),
            ));
        }
        for dialect in &rule.dialects {
            Dialect::from_str(dialect).map_err(|e| TransformationError::catalog("functions", &e))?;
        }
        Ok(())
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    pub fn functions(&self) -> &[FunctionRule] {
        &self.functions
    }

    /// Function rules that apply to `dialect`, in catalog order.
    pub fn functions_for(&self, dialect: Dialect) -> impl Iterator<Item = &FunctionRule> {
        self.functions.iter().filter(move |r| r.applies_to(dialect))
    }

    pub fn pattern(&self, name: &str) -> Option<&CompiledPattern> {
        self.patterns.iter().find(|p| p.rule.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalogs_load() {
        let catalogs = RuleCatalogs::embedded().unwrap();
        assert!(catalogs.pattern("now_minus_days").is_some());
        assert!(catalogs.functions().iter().any(|f| f.name == "match"));
    }

    #[test]
    fn test_dialect_filter() {
        let catalogs = RuleCatalogs::embedded().unwrap();
        let hana_in = catalogs
            .functions_for(Dialect::Hana)
            .any(|f| f.name == "in");
        let snowflake_in = catalogs
            .functions_for(Dialect::Snowflake)
            .any(|f| f.name == "in");
        assert!(!hana_in);
        assert!(snowflake_in);
    }

    #[test]
    fn test_invalid_regex_is_fatal() {
        let patterns = "patterns:\n  - name: broken\n    match: '(unclosed'\n    hana: x\n";
        let err = RuleCatalogs::from_yaml(patterns, "functions: []").unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_incomplete_function_rule_rejected() {
        let functions = "functions:\n  - name: leftstr\n    handler: template\n";
        assert!(RuleCatalogs::from_yaml("patterns: []", functions).is_err());

        let unknown = "functions:\n  - name: x\n    handler: explode\n";
        assert!(RuleCatalogs::from_yaml("patterns: []", unknown).is_err());
    }

    #[test]
    fn test_pattern_templates_per_dialect() {
        let catalogs = RuleCatalogs::embedded().unwrap();
        let rule = &catalogs.pattern("now_minus_days").unwrap().rule;
        assert_eq!(rule.template(Dialect::Hana), "ADD_DAYS(CURRENT_DATE, -${1})");
        assert!(rule.template(Dialect::Snowflake).starts_with("DATEADD"));
    }
}
