pub mod parameters;

use std::sync::{Arc, LazyLock};

use log::debug;
use regex::Regex;

use crate::dialects::{Dialect, DialectTransformationEngine};
use crate::model::HanaVersion;
use crate::rules::RuleCatalogs;
use crate::translator::rewrites::{
    concat_to_plus, if_to_case, in_function_to_operator, in_to_or, isnull_to_predicate,
};
use crate::translator::scanner::{find_calls, map_unquoted, top_level_keyword_positions};
use crate::translator::{
    apply_catalog_rewrites, apply_pattern_rewrites, substitute_placeholders, translate_function,
    FormulaContext,
};
use crate::utils::validation::ValidationResult;

pub use parameters::eliminate_parameters;

static EMPTY_CASE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CASE\s+WHEN\s+'{2,4}\s*=\s*'{2,4}\s+THEN\s+('(?:[^']|'')*')\s+ELSE\s+")
        .expect("valid empty case regex")
});
static LOWER_AND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\band\b").expect("valid regex"));
static IFF_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIFF\s*\(").expect("valid regex"));
static CREATE_OR_REPLACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CREATE\s+OR\s+REPLACE\s+VIEW").expect("valid regex"));
static NUMBER_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNUMBER\s*\(").expect("valid regex"));
static TIMESTAMP_NTZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bTIMESTAMP_NTZ\b").expect("valid regex"));
static INTERSECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bINTERSECT\b").expect("valid regex"));
static EXCEPT_MINUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEXCEPT\b|\bMINUS\b").expect("valid regex"));
static IGNORE_NULLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)IGNORE\s+NULLS").expect("valid regex"));

pub struct HanaTransformationEngine {
    catalogs: Arc<RuleCatalogs>,
    version: HanaVersion,
}

impl HanaTransformationEngine {
    pub fn new(catalogs: Arc<RuleCatalogs>, version: HanaVersion) -> Self {
        Self { catalogs, version }
    }

    fn validate_version_features(&self, sql: &str, result: &mut ValidationResult) {
        let version = self.version;
        if version < HanaVersion::V2Sps01 {
            if INTERSECT.is_match(sql) {
                result.add_error(
                    "HANA_VERSION_INTERSECT",
                    &format!("INTERSECT operator requires HANA 2.0 SPS01+ (current: {})", version),
                );
            }
            if EXCEPT_MINUS.is_match(sql) {
                result.add_error(
                    "HANA_VERSION_MINUS",
                    &format!("EXCEPT/MINUS operator requires HANA 2.0 SPS01+ (current: {})", version),
                );
            }
        }
        if version < HanaVersion::V2Sps03 && IGNORE_NULLS.is_match(sql) {
            result.add_warning(
                "HANA_VERSION_IGNORE_NULLS",
                &format!(
                    "IGNORE NULLS in window functions may not be supported before HANA 2.0 SPS03 (current: {})",
                    version
                ),
            );
        }
    }
}

impl DialectTransformationEngine for HanaTransformationEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Hana
    }

    fn name(&self) -> &'static str {
        "HANA SQL Engine"
    }

    fn hana_version(&self) -> HanaVersion {
        self.version
    }

    fn translate_formula(&self, formula: &str, ctx: &FormulaContext) -> String {
        if formula.trim().is_empty() {
            return "NULL".to_string();
        }
        let substituted = substitute_placeholders(formula, ctx);
        let mut result = eliminate_parameters(&substituted);
        if result.is_empty() {
            debug!("Formula reduced to nothing after parameter elimination: {}", formula);
            return result;
        }
        result = apply_pattern_rewrites(&result, &self.catalogs, Dialect::Hana);
        result = apply_catalog_rewrites(&result, &self.catalogs, Dialect::Hana);
        result = isnull_to_predicate(&result);
        result = in_function_to_operator(&result);
        if ctx.hana_version.is_legacy() {
            result = in_to_or(&result);
        }
        result = if_to_case(&result);
        concat_to_plus(&result)
    }

    fn translate_function(&self, name: &str, args: &[String]) -> Option<String> {
        translate_function(Dialect::Hana, self.version, name, args)
    }

    fn date_literal(&self, value: &str) -> String {
        format!("TO_DATE('{}')", value.replace('\'', "''"))
    }

    fn timestamp_literal(&self, value: &str) -> String {
        format!("TO_TIMESTAMP('{}')", value.replace('\'', "''"))
    }

    fn view_preamble(&self, quoted_name: &str) -> String {
        format!("DROP VIEW {} CASCADE;\nCREATE VIEW {} AS", quoted_name, quoted_name)
    }

    fn cleanup_where_clause(&self, clause: &str) -> String {
        cleanup_where_clause(clause)
    }

    fn validate_dialect(&self, sql: &str) -> ValidationResult {
        let mut result = ValidationResult::new();
        if IFF_CALL.is_match(sql) {
            result.add_error(
                "HANA_INVALID_IFF_FUNCTION",
                "IFF() function is not supported in HANA - should be IF()",
            );
        }
        if sql.contains(" || ") {
            result.add_warning(
                "HANA_CONCAT_SYNTAX",
                "String concatenation using '||' detected - HANA typically uses '+' operator",
            );
        }
        if CREATE_OR_REPLACE.is_match(sql) {
            result.add_warning(
                "HANA_CREATE_OR_REPLACE",
                "CREATE OR REPLACE VIEW not supported in all HANA versions - may need to DROP VIEW first",
            );
        }
        if NUMBER_TYPE.is_match(sql) {
            result.add_warning(
                "HANA_NUMBER_TYPE",
                "NUMBER data type is Snowflake-specific - HANA uses DECIMAL",
            );
        }
        if TIMESTAMP_NTZ.is_match(sql) {
            result.add_warning(
                "HANA_TIMESTAMP_TYPE",
                "TIMESTAMP_NTZ is Snowflake-specific - HANA uses TIMESTAMP",
            );
        }
        self.validate_version_features(sql, &mut result);
        result
    }
}

/// Drop always-true parameter leftovers from an assembled WHERE clause body.
///
/// Returns an empty string when nothing meaningful remains.
pub fn cleanup_where_clause(clause: &str) -> String {
    let without_wildcards = remove_wildcard_matches(clause);
    let simplified = simplify_empty_cases(&without_wildcards);
    let cleaned = parameters::clean_fragments(&simplified);
    let uppercased = map_unquoted(&cleaned, |run| LOWER_AND.replace_all(run, "AND").into_owned());
    let result = parameters::clean_fragments(&uppercased);
    if result.is_empty() || result == "()" {
        String::new()
    } else {
        result
    }
}

/// `REGEXP_LIKE(col, '*')` style filters match everything.
fn remove_wildcard_matches(clause: &str) -> String {
    let mut result = clause.to_string();
    loop {
        let site = find_calls(&result, "REGEXP_LIKE").into_iter().find(|site| {
            let args = site.args(&result);
            args.len() == 2 && is_wildcard_pattern(&args[1])
        });
        match site {
            Some(site) => {
                result = parameters::remove_with_connective(&result, site.start, site.end());
            }
            None => return result,
        }
    }
}

fn is_wildcard_pattern(pattern: &str) -> bool {
    let compact: String = pattern.chars().filter(|c| !c.is_whitespace()).collect();
    compact == "'*'" || compact.contains("REPLACE(REPLACE('*','*','.*')")
}

/// `CASE WHEN '' = '' THEN 'v' ELSE ... END` always yields `'v'`.
fn simplify_empty_cases(clause: &str) -> String {
    let mut result = clause.to_string();
    let mut search_from = 0;
    loop {
        let (head, value) = match EMPTY_CASE_HEAD
            .captures_at(&result, search_from)
            .and_then(|caps| Some((caps.get(0)?.range(), caps.get(1)?.as_str().to_string())))
        {
            Some(found) => found,
            None => break,
        };
        let tail = &result[head.end..];
        let end = top_level_keyword_positions(tail, "END").first().copied();
        let nested = end
            .map(|end| !top_level_keyword_positions(&tail[..end], "CASE").is_empty())
            .unwrap_or(true);
        match end {
            Some(end) if !nested => {
                let stop = head.end + end + 3;
                result = format!("{}{}{}", &result[..head.start], value, &result[stop..]);
                search_from = head.start + value.len();
            }
            _ => search_from = head.end,
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(version: HanaVersion) -> HanaTransformationEngine {
        HanaTransformationEngine::new(RuleCatalogs::embedded().unwrap(), version)
    }

    fn ctx(version: HanaVersion) -> FormulaContext<'static> {
        FormulaContext::new("100", "EN", version)
    }

    #[test]
    fn test_if_becomes_case() {
        let engine = engine(HanaVersion::V2);
        assert_eq!(
            engine.translate_formula("if(\"STATUS\" = 'A', 'Active', '')", &ctx(HanaVersion::V2)),
            "CASE WHEN \"STATUS\" = 'A' THEN 'Active' ELSE NULL END"
        );
    }

    #[test]
    fn test_empty_formula_is_null() {
        assert_eq!(engine(HanaVersion::V2).translate_formula("  ", &ctx(HanaVersion::V2)), "NULL");
    }

    #[test]
    fn test_in_list_by_version() {
        let formula = "in(\"WERKS\", '1000', '2000')";
        assert_eq!(
            engine(HanaVersion::V2).translate_formula(formula, &ctx(HanaVersion::V2)),
            "\"WERKS\" IN ('1000', '2000')"
        );
        assert_eq!(
            engine(HanaVersion::V1).translate_formula(formula, &ctx(HanaVersion::V1)),
            "(\"WERKS\" = '1000' OR \"WERKS\" = '2000')"
        );
    }

    #[test]
    fn test_concat_and_placeholders() {
        let engine = engine(HanaVersion::V2);
        assert_eq!(
            engine.translate_formula("\"MANDT\" = '$$client$$' AND \"A\" || \"B\" = 'x'", &ctx(HanaVersion::V2)),
            "\"MANDT\" = '100' AND \"A\" + \"B\" = 'x'"
        );
    }

    #[test]
    fn test_parameter_clause_dropped() {
        let engine = engine(HanaVersion::V2);
        assert_eq!(
            engine.translate_formula("('$$IP_WERKS$$' = '' OR \"WERKS\" = '$$IP_WERKS$$')", &ctx(HanaVersion::V2)),
            ""
        );
    }

    #[test]
    fn test_cleanup_where_clause() {
        assert_eq!(
            cleanup_where_clause("(\"A\" = 1) and ('' = '0' OR \"B\" >= DATE(''))"),
            "(\"A\" = 1)"
        );
        assert_eq!(cleanup_where_clause("('' = '' OR \"B\" = '')"), "");
        assert_eq!(
            cleanup_where_clause("\"C\" = CASE WHEN '' = '' THEN 'X' ELSE \"D\" END"),
            "\"C\" = 'X'"
        );
        assert_eq!(
            cleanup_where_clause("REGEXP_LIKE(\"M\", '*') AND \"A\" = 1"),
            "\"A\" = 1"
        );
    }

    #[test]
    fn test_validate_dialect_flags_snowflake_syntax() {
        let result = engine(HanaVersion::V2).validate_dialect(
            "CREATE OR REPLACE VIEW \"V\" AS SELECT IFF(\"A\" = 1, 1, 0), CAST(NULL AS NUMBER(10, 0)) FROM \"T\"",
        );
        assert!(result.has_code("HANA_INVALID_IFF_FUNCTION"));
        assert!(result.has_code("HANA_CREATE_OR_REPLACE"));
        assert!(result.has_code("HANA_NUMBER_TYPE"));
        assert!(!result.is_valid());
    }

    #[test]
    fn test_version_features() {
        let sql = "SELECT \"A\" FROM \"X\" INTERSECT SELECT \"A\" FROM \"Y\"";
        assert!(engine(HanaVersion::V2).validate_dialect(sql).has_code("HANA_VERSION_INTERSECT"));
        assert!(engine(HanaVersion::V2Sps01).validate_dialect(sql).is_valid());
    }

    #[test]
    fn test_view_preamble() {
        assert_eq!(
            engine(HanaVersion::V2).view_preamble("\"_SYS_BIC\".\"V\""),
            "DROP VIEW \"_SYS_BIC\".\"V\" CASCADE;\nCREATE VIEW \"_SYS_BIC\".\"V\" AS"
        );
    }
}
