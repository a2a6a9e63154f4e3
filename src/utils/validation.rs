//! Multi-pass validation of generated SQL.
//!
//! Passes never short-circuit: each one inspects the text independently and
//! the results are merged. Only error-severity issues block emission.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use sqlparser::dialect::{GenericDialect, SnowflakeDialect};
use sqlparser::parser::Parser;

use crate::dialects::{Dialect, DialectTransformationEngine};
use crate::error::TransformationError;
use crate::model::Scenario;
use crate::translator::scanner::{is_balanced, paren_delta, quotes_closed};

static WITH_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWITH\b").expect("valid regex"));
static CTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\w+)\s+AS\s*\(").expect("valid regex"));
static FROM_OR_JOIN_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+(\w+)").expect("valid regex"));
static CARTESIAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bON\s+1\s*=\s*1\b").expect("valid regex"));
static SELECT_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\s+\*").expect("valid regex"));
static FROM_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\b").expect("valid regex"));
static WHERE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static AGGREGATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(COUNT|SUM|AVG|MAX|MIN|STDDEV|VARIANCE)\s*\(").expect("valid regex")
});
static GROUP_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").expect("valid regex"));
static JOIN_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bJOIN\b").expect("valid regex"));
static SUBQUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*SELECT\s+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

impl IssueSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            IssueSeverity::Error => "ERROR",
            IssueSeverity::Warning => "WARNING",
            IssueSeverity::Info => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub message: String,
    pub line: Option<usize>,
}

impl ValidationIssue {
    pub fn new(severity: IssueSeverity, code: &str, message: &str) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.to_string(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity.label(), self.code, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&mut self, issue: ValidationIssue) {
        match issue.severity {
            IssueSeverity::Error => self.errors.push(issue),
            IssueSeverity::Warning => self.warnings.push(issue),
            IssueSeverity::Info => self.info.push(issue),
        }
    }

    pub fn add_error(&mut self, code: &str, message: &str) {
        self.add_issue(ValidationIssue::new(IssueSeverity::Error, code, message));
    }

    pub fn add_warning(&mut self, code: &str, message: &str) {
        self.add_issue(ValidationIssue::new(IssueSeverity::Warning, code, message));
    }

    pub fn add_info(&mut self, code: &str, message: &str) {
        self.add_issue(ValidationIssue::new(IssueSeverity::Info, code, message));
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.info.extend(other.info);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues().any(|issue| issue.code == code)
    }

    /// Errors, then warnings, then info.
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .chain(self.info.iter())
    }

    /// Keep only issues whose code is not in `fixed`.
    pub fn without_codes(&self, fixed: &HashSet<String>) -> ValidationResult {
        let keep = |issues: &[ValidationIssue]| {
            issues
                .iter()
                .filter(|i| !fixed.contains(&i.code))
                .cloned()
                .collect::<Vec<_>>()
        };
        ValidationResult {
            errors: keep(&self.errors),
            warnings: keep(&self.warnings),
            info: keep(&self.info),
        }
    }

    /// The blocking error, if any issue has error severity.
    pub fn to_error(&self) -> Option<TransformationError> {
        if self.is_valid() {
            return None;
        }
        let violations = self.errors.iter().map(|e| e.message.clone()).collect();
        let suggestions = self
            .errors
            .iter()
            .filter_map(|e| suggestion_for(&e.code))
            .map(str::to_string)
            .collect();
        Some(TransformationError::validation(violations, suggestions))
    }
}

fn suggestion_for(code: &str) -> Option<&'static str> {
    match code {
        "HANA_INVALID_IFF_FUNCTION" => Some("Enable auto-correction to rewrite IFF() as IF()"),
        "UNBALANCED_PARENTHESES" => Some("Check calculated attribute and filter formulas"),
        "CTE_COUNT_EXCEEDED" => Some("Split the calculation view into several views"),
        "VIEW_NAME_RESERVED_KEYWORD" => Some("Choose a view name that is not a reserved keyword"),
        "HANA_VERSION_INTERSECT" | "HANA_VERSION_MINUS" => Some("Target HANA 2.0 SPS01 or newer"),
        _ => None,
    }
}

/// What the renderer knows about the SQL it produced.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub scenario: &'a Scenario,
    /// Rendered node id to CTE alias.
    pub cte_aliases: &'a BTreeMap<String, String>,
    pub terminal: Option<&'a str>,
}

impl<'a> ValidationContext<'a> {
    fn had_logical_attributes(&self) -> bool {
        self.scenario
            .logical_model
            .as_ref()
            .map(|m| !m.attributes.is_empty())
            .unwrap_or(false)
    }
}

pub struct SqlValidator<'a> {
    engine: &'a dyn DialectTransformationEngine,
}

impl<'a> SqlValidator<'a> {
    pub fn new(engine: &'a dyn DialectTransformationEngine) -> Self {
        Self { engine }
    }

    pub fn validate(&self, sql: &str, ctx: &ValidationContext) -> ValidationResult {
        let mut result = validate_structure(sql, self.engine.dialect());
        result.merge(validate_completeness(sql, ctx));
        result.merge(validate_performance(sql, ctx));
        result.merge(self.engine.validate_dialect(sql));
        result.merge(analyze_complexity(sql, ctx.scenario));
        debug!(
            "{} validation: {} errors, {} warnings, {} info",
            self.engine.name(),
            result.errors.len(),
            result.warnings.len(),
            result.info.len()
        );
        result
    }
}

fn line_of(sql: &str, offset: usize) -> usize {
    sql[..offset.min(sql.len())].matches('\n').count() + 1
}

pub fn validate_structure(sql: &str, dialect: Dialect) -> ValidationResult {
    let mut result = ValidationResult::new();
    if sql.trim().is_empty() {
        result.add_error("EMPTY_SQL", "SQL is empty");
        return result;
    }
    let upper = sql.to_uppercase();

    if !upper.contains("SELECT") {
        result.add_issue(
            ValidationIssue::new(IssueSeverity::Error, "NO_SELECT", "SQL does not contain a SELECT statement")
                .at_line(1),
        );
    }
    if !is_balanced(sql) {
        result.add_error(
            "UNBALANCED_PARENTHESES",
            &format!("Unbalanced parentheses: depth {} at end of statement", paren_delta(sql)),
        );
    }
    if !quotes_closed(sql) {
        result.add_warning("UNBALANCED_QUOTES", "Possible unbalanced single quotes");
    }

    if let Some(with) = WITH_KEYWORD.find(sql) {
        let mut seen = HashSet::new();
        let mut any = false;
        for caps in CTE_NAME.captures_iter(sql) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            any = true;
            let name = name.as_str().to_uppercase();
            if !seen.insert(name.clone()) {
                result.add_issue(
                    ValidationIssue::new(
                        IssueSeverity::Error,
                        "DUPLICATE_CTE",
                        &format!("Duplicate CTE name: {}", name),
                    )
                    .at_line(line_of(sql, whole.start())),
                );
            }
        }
        if !any {
            result.add_warning(
                "INVALID_CTE_STRUCTURE",
                "WITH clause found but no CTEs with AS detected",
            );
        }
        if !upper[with.end()..].contains("SELECT") {
            result.add_error(
                "NO_SELECT_AFTER_CTE",
                "WITH clause found but no SELECT statement after CTEs",
            );
        }
    }

    if result.is_valid() {
        let parsed = match dialect {
            Dialect::Snowflake => Parser::parse_sql(&SnowflakeDialect {}, sql),
            Dialect::Hana => Parser::parse_sql(&GenericDialect {}, sql),
        };
        if let Err(e) = parsed {
            result.add_info(
                "SQL_PARSE_CHECK",
                &format!("Generic SQL parser could not parse the statement: {}", e),
            );
        }
    }
    result
}

pub fn validate_completeness(sql: &str, ctx: &ValidationContext) -> ValidationResult {
    let mut result = ValidationResult::new();
    let scenario = ctx.scenario;

    for node_id in ctx.cte_aliases.keys() {
        if !scenario.contains(node_id) {
            result.add_error(
                "MISSING_NODE",
                &format!("Node {} referenced but not found in scenario", node_id),
            );
        }
    }

    let mut defined: HashSet<String> = CTE_NAME
        .captures_iter(sql)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_uppercase()))
        .collect();
    defined.extend(ctx.cte_aliases.values().map(|a| a.to_uppercase()));
    defined.insert("FINAL".to_string());

    let mut reported = HashSet::new();
    for caps in FROM_OR_JOIN_TARGET.captures_iter(sql) {
        let Some(target) = caps.get(1) else { continue };
        let name = target.as_str().to_uppercase();
        if defined.contains(&name) || reported.contains(&name) {
            continue;
        }
        let is_source = scenario
            .data_sources
            .iter()
            .any(|ds| ds.object_name.eq_ignore_ascii_case(&name));
        if !is_source {
            result.add_warning(
                "UNDEFINED_CTE_REFERENCE",
                &format!("CTE {} referenced in FROM/JOIN but not defined", name),
            );
            reported.insert(name);
        }
    }

    for ds in &scenario.data_sources {
        if ds.schema_name.trim().is_empty() {
            result.add_warning(
                "EMPTY_SCHEMA_NAME",
                &format!("Data source {} has empty schema name", ds.id),
            );
        }
        if ds.object_name.trim().is_empty() {
            result.add_warning(
                "EMPTY_OBJECT_NAME",
                &format!("Data source {} has empty object name", ds.id),
            );
        }
    }

    if !scenario.nodes.is_empty() && ctx.terminal.is_none() {
        result.add_warning("NO_FINAL_NODE", "Could not determine final node in scenario");
    }
    result
}

pub fn validate_performance(sql: &str, ctx: &ValidationContext) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Some(m) = CARTESIAN.find(sql) {
        result.add_issue(
            ValidationIssue::new(
                IssueSeverity::Warning,
                "CARTESIAN_PRODUCT",
                "Cartesian product detected (JOIN ON 1=1) - may cause large result sets",
            )
            .at_line(line_of(sql, m.start())),
        );
    }

    if SELECT_STAR.is_match(sql) {
        if ctx.had_logical_attributes() {
            result.add_warning(
                "SELECT_STAR_USAGE",
                "SELECT * used when explicit column list is available - consider using explicit columns",
            );
        } else {
            result.add_info(
                "SELECT_STAR_USAGE",
                "SELECT * used - consider explicit column list for better performance",
            );
        }
    }

    let from_count = FROM_KEYWORD.find_iter(sql).count();
    if from_count > 0 && !WHERE_KEYWORD.is_match(sql) {
        result.add_info(
            "MISSING_WHERE_CLAUSE",
            "No WHERE clause found - consider adding filters for better performance",
        );
    }

    if AGGREGATE_CALL.is_match(sql) && !GROUP_BY.is_match(sql) && from_count > 1 {
        result.add_warning(
            "AGGREGATION_WITHOUT_GROUPBY",
            "Aggregation functions used without GROUP BY on multiple tables - verify correctness",
        );
    }
    result
}

pub fn analyze_complexity(sql: &str, scenario: &Scenario) -> ValidationResult {
    let mut result = ValidationResult::new();

    let cte_count = CTE_NAME.find_iter(sql).count();
    if cte_count > 20 {
        result.add_warning(
            "HIGH_CTE_COUNT",
            &format!(
                "High CTE count ({}) - consider breaking into views for better maintainability",
                cte_count
            ),
        );
    } else if cte_count > 10 {
        result.add_info(
            "MODERATE_CTE_COUNT",
            &format!(
                "Moderate CTE count ({}) - query may benefit from view decomposition",
                cte_count
            ),
        );
    }

    let join_count = JOIN_KEYWORD.find_iter(sql).count();
    if join_count > 10 {
        result.add_warning(
            "HIGH_JOIN_COUNT",
            &format!("High JOIN count ({}) - consider query optimization", join_count),
        );
    } else if join_count > 5 {
        result.add_info(
            "MODERATE_JOIN_COUNT",
            &format!("Moderate JOIN count ({}) - verify query performance", join_count),
        );
    }

    let subquery_count = SUBQUERY.find_iter(sql).count();
    if subquery_count > 5 {
        result.add_warning(
            "HIGH_SUBQUERY_COUNT",
            &format!(
                "High subquery count ({}) - consider using CTEs or joins",
                subquery_count
            ),
        );
    }

    if scenario.nodes.len() > 15 {
        result.add_info(
            "COMPLEX_SCENARIO",
            &format!(
                "Complex scenario with {} nodes - verify conversion correctness",
                scenario.nodes.len()
            ),
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::engine_for;
    use crate::model::{DataSource, HanaVersion, Node, NodeKind, SourceType};

    fn scenario() -> Scenario {
        let mut scenario = Scenario::new("CV_TEST");
        scenario.add_data_source(DataSource::new("T", SourceType::Table, "S", "T"));
        scenario
            .add_node(Node::new("Projection_1", NodeKind::Projection).with_input("T"))
            .unwrap();
        scenario
    }

    fn aliases() -> BTreeMap<String, String> {
        let mut aliases = BTreeMap::new();
        aliases.insert("Projection_1".to_string(), "projection_1".to_string());
        aliases
    }

    const GOOD_SQL: &str = "WITH\n  projection_1 AS (\n    SELECT \"A\" AS \"A\" FROM \"S\".\"T\"\n  )\n\nSELECT \"A\" FROM projection_1";

    #[test]
    fn test_structure_passes_on_generated_shape() {
        let result = validate_structure(GOOD_SQL, Dialect::Snowflake);
        assert!(result.is_valid(), "{:?}", result);
        assert!(!result.has_code("SQL_PARSE_CHECK"));
    }

    #[test]
    fn test_structure_errors() {
        assert!(validate_structure("  ", Dialect::Hana).has_code("EMPTY_SQL"));
        let result = validate_structure("WITH a AS (SELECT 1), a AS (SELECT (2) SELECT * FROM a", Dialect::Hana);
        assert!(result.has_code("DUPLICATE_CTE"));
        assert!(result.has_code("UNBALANCED_PARENTHESES"));
        let no_select = validate_structure("DELETE FROM x", Dialect::Hana);
        assert!(no_select.has_code("NO_SELECT"));
    }

    #[test]
    fn test_parens_in_literals_are_ignored() {
        let result = validate_structure("SELECT ')' AS \"X\" FROM \"S\".\"T\"", Dialect::Snowflake);
        assert!(!result.has_code("UNBALANCED_PARENTHESES"));
    }

    #[test]
    fn test_completeness() {
        let scenario = scenario();
        let aliases = aliases();
        let ctx = ValidationContext {
            scenario: &scenario,
            cte_aliases: &aliases,
            terminal: Some("Projection_1"),
        };
        assert!(validate_completeness(GOOD_SQL, &ctx).issues().next().is_none());

        let bad = format!("{} JOIN missing_cte AS r ON 1=1", GOOD_SQL);
        let result = validate_completeness(&bad, &ctx);
        assert!(result.has_code("UNDEFINED_CTE_REFERENCE"));
    }

    #[test]
    fn test_performance_flags_cartesian() {
        let scenario = scenario();
        let aliases = aliases();
        let ctx = ValidationContext {
            scenario: &scenario,
            cte_aliases: &aliases,
            terminal: None,
        };
        let sql = "SELECT *\nFROM a AS la\nINNER JOIN b AS ra ON 1=1";
        let result = validate_performance(sql, &ctx);
        let cartesian = result.warnings.iter().find(|w| w.code == "CARTESIAN_PRODUCT").unwrap();
        assert_eq!(cartesian.line, Some(3));
        assert!(result.info.iter().any(|i| i.code == "SELECT_STAR_USAGE"));
        assert!(result.has_code("MISSING_WHERE_CLAUSE"));
    }

    #[test]
    fn test_validator_runs_dialect_pass() {
        let scenario = scenario();
        let aliases = aliases();
        let ctx = ValidationContext {
            scenario: &scenario,
            cte_aliases: &aliases,
            terminal: Some("Projection_1"),
        };
        let engine = engine_for(Dialect::Hana, HanaVersion::V2).unwrap();
        let sql = GOOD_SQL.replace("SELECT \"A\" AS", "SELECT IFF(1 = 1, 1, 0) AS");
        let result = SqlValidator::new(engine.as_ref()).validate(&sql, &ctx);
        assert!(!result.is_valid());
        let err = result.to_error().unwrap();
        assert!(err.to_string().starts_with("SQL validation failed: IFF()"));
    }

    #[test]
    fn test_issue_display_and_filtering() {
        let mut result = ValidationResult::new();
        result.add_warning("STRING_CONCAT_PLUS", "plus used");
        result.add_info("MISSING_WHERE_CLAUSE", "no where");
        assert_eq!(result.warnings[0].to_string(), "[WARNING] STRING_CONCAT_PLUS: plus used");
        let fixed: HashSet<String> = ["STRING_CONCAT_PLUS".to_string()].into_iter().collect();
        let remaining = result.without_codes(&fixed);
        assert!(!remaining.has_warnings());
        assert_eq!(remaining.info.len(), 1);
    }
}
