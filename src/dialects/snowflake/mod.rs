use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::dialects::{Dialect, DialectTransformationEngine};
use crate::model::HanaVersion;
use crate::rules::RuleCatalogs;
use crate::translator::rewrites::{if_to_iff, plus_to_concat};
use crate::translator::scanner::find_calls;
use crate::translator::{
    apply_catalog_rewrites, apply_pattern_rewrites, substitute_placeholders, translate_function,
    FormulaContext,
};
use crate::utils::validation::ValidationResult;

/// Words Snowflake refuses as unquoted identifiers.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "ACCOUNT", "ADMIN", "ALL", "ALTER", "AND", "ANY", "AS", "BETWEEN", "BY", "CASE", "CAST",
    "CHECK", "COLUMN", "CONNECT", "CONNECTION", "CONSTRAINT", "CREATE", "CROSS", "CURRENT",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DATABASE", "DELETE",
    "DISTINCT", "DROP", "ELSE", "END", "EXISTS", "FALSE", "FOLLOWING", "FOR", "FOREIGN", "FROM",
    "FULL", "FUNCTION", "GRANT", "GROUP", "GROUPING", "HAVING", "ILIKE", "IN", "INNER", "INSERT",
    "INTERSECT", "INTO", "IS", "ISSUE", "JOIN", "LATERAL", "LEFT", "LIKE", "LOCALTIME",
    "LOCALTIMESTAMP", "MINUS", "NATURAL", "NOT", "NULL", "NULLS", "OF", "ON", "OR", "ORDER",
    "ORGANIZATION", "OUTER", "OVER", "PARTITION", "PRECEDING", "PRIMARY", "QUALIFY",
    "REFERENCES", "REVOKE", "RIGHT", "RLIKE", "ROW", "ROWS", "SAMPLE", "SCHEMA", "SELECT", "SET",
    "SOME", "START", "TABLE", "TABLESAMPLE", "THEN", "TO", "TRIGGER", "TRUE", "TRY_CAST", "UNION",
    "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN", "WHENEVER", "WHERE", "WITH",
];

const NEVER_FLAGGED: &[&str] = &[
    "NULL",
    "TRUE",
    "FALSE",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
];

pub fn is_reserved_keyword(word: &str) -> bool {
    RESERVED_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(word))
}

static IDENTIFIER_CONTEXTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"SELECT\s+([A-Z_][A-Z0-9_]*)\s+AS\b",
        r"SELECT\s+([A-Z_][A-Z0-9_]*)\s*,",
        r"SELECT\s+([A-Z_][A-Z0-9_]*)\s+FROM\b",
        r"FROM\s+([A-Z_][A-Z0-9_]*)\s+(?:WHERE|JOIN|GROUP|ORDER)\b",
        r"JOIN\s+([A-Z_][A-Z0-9_]*)\s+(?:ON|WHERE)\b",
        r"\bAS\s+([A-Z_][A-Z0-9_]*)\s*(?:,|$)",
        r"GROUP\s+BY\s+([A-Z_][A-Z0-9_]*)\s*(?:,|$)",
        r"ORDER\s+BY\s+([A-Z_][A-Z0-9_]*)\s*(?:,|$)",
        r"WHERE\s+([A-Z_][A-Z0-9_]*)\s*[=<>!]",
        r"(?:WITH|,)\s+([A-Z_][A-Z0-9_]*)\s+AS\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid identifier context regex"))
    .collect()
});
static IS_BEFORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bIS(\s+NOT)?\s*$").expect("valid regex"));
static LONG_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z_][A-Z0-9_]{255,}\b").expect("valid regex"));
static LITERAL_PLUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']*'\s*\+|\+\s*'[^']*'").expect("valid regex"));
static CTE_DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\w+\s+AS\s*\(").expect("valid regex"));
static VIEW_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CREATE\s+(?:OR\s+REPLACE\s+)?VIEW\s+([A-Z_][A-Z0-9_]*)").expect("valid regex")
});
static JOIN_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(CROSS\s+)?JOIN\b").expect("valid regex"));
static ON_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bON\b").expect("valid regex"));

pub struct SnowflakeTransformationEngine {
    catalogs: Arc<RuleCatalogs>,
    version: HanaVersion,
}

impl SnowflakeTransformationEngine {
    pub fn new(catalogs: Arc<RuleCatalogs>, version: HanaVersion) -> Self {
        Self { catalogs, version }
    }

    fn reserved_identifiers(sql_upper: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for pattern in IDENTIFIER_CONTEXTS.iter() {
            for caps in pattern.captures_iter(sql_upper) {
                let m = match caps.get(1) {
                    Some(m) => m,
                    None => continue,
                };
                let word = m.as_str();
                if NEVER_FLAGGED.contains(&word) || !is_reserved_keyword(word) {
                    continue;
                }
                let context_start = m.start().saturating_sub(10);
                let context = sql_upper.get(context_start..m.start()).unwrap_or("");
                if IS_BEFORE.is_match(context) {
                    continue;
                }
                if !found.iter().any(|f| f == word) {
                    found.push(word.to_string());
                }
            }
        }
        found
    }
}

impl DialectTransformationEngine for SnowflakeTransformationEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Snowflake
    }

    fn name(&self) -> &'static str {
        "Snowflake SQL Engine"
    }

    fn hana_version(&self) -> HanaVersion {
        self.version
    }

    fn translate_formula(&self, formula: &str, ctx: &FormulaContext) -> String {
        if formula.trim().is_empty() {
            return "NULL".to_string();
        }
        let mut result = substitute_placeholders(formula, ctx);
        result = apply_pattern_rewrites(&result, &self.catalogs, Dialect::Snowflake);
        result = if_to_iff(&result);
        result = apply_catalog_rewrites(&result, &self.catalogs, Dialect::Snowflake);
        plus_to_concat(&result, ctx.produces_string())
    }

    fn translate_function(&self, name: &str, args: &[String]) -> Option<String> {
        translate_function(Dialect::Snowflake, self.version, name, args)
    }

    fn date_literal(&self, value: &str) -> String {
        format!("'{}'::DATE", value.replace('\'', "''"))
    }

    fn timestamp_literal(&self, value: &str) -> String {
        format!("'{}'::TIMESTAMP_NTZ", value.replace('\'', "''"))
    }

    fn view_preamble(&self, quoted_name: &str) -> String {
        format!("CREATE OR REPLACE VIEW {} AS", quoted_name)
    }

    fn cleanup_where_clause(&self, clause: &str) -> String {
        clause.trim().to_string()
    }

    fn validate_dialect(&self, sql: &str) -> ValidationResult {
        let mut result = ValidationResult::new();
        let sql_upper = sql.to_uppercase();

        for word in Self::reserved_identifiers(&sql_upper) {
            result.add_warning(
                "RESERVED_KEYWORD_AS_IDENTIFIER",
                &format!("Reserved keyword '{}' used as identifier - should be quoted", word),
            );
        }
        if LONG_IDENTIFIER.is_match(&sql_upper) {
            result.add_warning(
                "IDENTIFIER_TOO_LONG",
                "Unquoted identifier exceeds 255 characters - should be quoted",
            );
        }

        for site in find_calls(sql, "IFF") {
            if site.args(sql).len() != 3 {
                result.add_warning(
                    "INVALID_IFF_SYNTAX",
                    "IFF() function should have 3 parameters (condition, then, else)",
                );
            }
        }
        if LITERAL_PLUS.is_match(sql) {
            result.add_warning(
                "STRING_CONCAT_PLUS",
                "String concatenation using '+' operator - should use '||' in Snowflake",
            );
        }
        if find_calls(sql, "IF").iter().any(|site| site.args(sql).len() == 3) {
            result.add_warning(
                "HANA_IF_NOT_TRANSLATED",
                "HANA IF() function detected - should be translated to IFF() for Snowflake",
            );
        }

        let cte_count = CTE_DEFINITION.find_iter(sql).count();
        if cte_count > 100 {
            result.add_error(
                "CTE_COUNT_EXCEEDED",
                &format!("CTE count ({}) exceeds Snowflake limit of 100", cte_count),
            );
        } else if cte_count > 20 {
            result.add_warning(
                "HIGH_CTE_COUNT",
                &format!(
                    "High CTE count ({}) - consider breaking into views for better maintainability",
                    cte_count
                ),
            );
        }

        if let Some(caps) = VIEW_NAME.captures(&sql_upper) {
            let name = &caps[1];
            if is_reserved_keyword(name) {
                result.add_error(
                    "VIEW_NAME_RESERVED_KEYWORD",
                    &format!("View name '{}' is a reserved keyword - must be quoted", name),
                );
            }
        }

        for caps in JOIN_KEYWORD.captures_iter(&sql_upper) {
            if caps.get(1).is_some() {
                continue;
            }
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let rest_of_line = sql_upper[end..].split('\n').next().unwrap_or("");
            if !ON_KEYWORD.is_match(rest_of_line) {
                result.add_warning("JOIN_WITHOUT_ON", "JOIN without ON clause");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataTypeSpec;

    fn engine() -> SnowflakeTransformationEngine {
        SnowflakeTransformationEngine::new(RuleCatalogs::embedded().unwrap(), HanaVersion::V2)
    }

    #[test]
    fn test_formula_pipeline() {
        let ctx = FormulaContext::new("PROD", "EN", HanaVersion::V2);
        assert_eq!(
            engine().translate_formula("if(isnull(\"A\"), 'n/a', \"A\" + '-' + \"B\")", &ctx),
            "IFF(((\"A\") IS NULL), 'n/a', \"A\" || '-' || \"B\")"
        );
    }

    #[test]
    fn test_string_result_concatenates_columns() {
        let varchar = DataTypeSpec::varchar(80);
        let ctx = FormulaContext::new("PROD", "EN", HanaVersion::V2).with_result_type(Some(&varchar));
        assert_eq!(
            engine().translate_formula("\"FIRST\" + \"LAST\"", &ctx),
            "\"FIRST\" || \"LAST\""
        );
        let plain = FormulaContext::new("PROD", "EN", HanaVersion::V2);
        assert_eq!(engine().translate_formula("\"NET\" + \"TAX\"", &plain), "\"NET\" + \"TAX\"");
    }

    #[test]
    fn test_literals_and_preamble() {
        assert_eq!(engine().date_literal("2024-01-31"), "'2024-01-31'::DATE");
        assert_eq!(engine().timestamp_literal("2024-01-31 10:00:00"), "'2024-01-31 10:00:00'::TIMESTAMP_NTZ");
        assert_eq!(engine().view_preamble("\"V\""), "CREATE OR REPLACE VIEW \"V\" AS");
    }

    #[test]
    fn test_validate_reserved_and_if() {
        let result = engine().validate_dialect(
            "WITH order AS (SELECT IF(\"A\" = 1, 'x', 'y') AS \"B\" FROM \"S\".\"T\")\nSELECT * FROM order",
        );
        assert!(result.has_code("RESERVED_KEYWORD_AS_IDENTIFIER"));
        assert!(result.has_code("HANA_IF_NOT_TRANSLATED"));
        assert!(result.is_valid());
    }

    #[test]
    fn test_validate_join_without_on_and_view_name() {
        let result = engine().validate_dialect("CREATE OR REPLACE VIEW TABLE AS SELECT 1 FROM a INNER JOIN b\nWHERE 1 = 1");
        assert!(result.has_code("JOIN_WITHOUT_ON"));
        assert!(result.has_code("VIEW_NAME_RESERVED_KEYWORD"));
        assert!(!result.is_valid());
    }

    #[test]
    fn test_clean_sql_has_no_dialect_issues() {
        let sql = "WITH\n  projection_1 AS (\n    SELECT \"A\" AS \"A\" FROM \"S\".\"T\"\n  )\n\nSELECT \"A\" FROM projection_1";
        let result = engine().validate_dialect(sql);
        assert!(result.issues().next().is_none(), "{:?}", result);
    }
}
