//! Pattern-driven auto-correction of generated SQL.
//!
//! Fixes are grouped into confidence tiers; each tier can be switched off.
//! The corrector never fails: a fix that finds nothing to change records nothing.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use log::{debug, info};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::dialects::snowflake::is_reserved_keyword;
use crate::dialects::Dialect;
use crate::translator::rewrites::{if_to_iff, iff_to_if, plus_to_concat};
use crate::translator::scanner::map_unquoted;
use crate::utils::validation::ValidationResult;

static QUOTED_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([A-Za-z_][A-Za-z0-9_]*)'").expect("valid regex"));
static NUMBER_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNUMBER(\s*\()").expect("valid regex"));
static TIMESTAMP_NTZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bTIMESTAMP_NTZ\b").expect("valid regex"));
static CREATE_OR_REPLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+OR\s+REPLACE\s+VIEW\s+((?:\x22[^\x22]*\x22|\w+)(?:\.(?:\x22[^\x22]*\x22|\w+))?)\s+AS")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CorrectionConfidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for CorrectionConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CorrectionConfidence::Low => "LOW",
            CorrectionConfidence::Medium => "MEDIUM",
            CorrectionConfidence::High => "HIGH",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFixConfig {
    #[serde(default = "default_true")]
    pub high_confidence: bool,
    #[serde(default = "default_true")]
    pub medium_confidence: bool,
    #[serde(default)]
    pub low_confidence: bool,
    #[serde(default = "default_true")]
    pub fix_reserved_keywords: bool,
    #[serde(default = "default_true")]
    pub fix_string_concatenation: bool,
    #[serde(default = "default_true")]
    pub fix_function_calls: bool,
    #[serde(default = "default_true")]
    pub fix_view_statement: bool,
    #[serde(default = "default_true")]
    pub fix_type_names: bool,
    /// Identifiers to quote even when validation did not flag them.
    #[serde(default)]
    pub reserved_keywords: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            high_confidence: true,
            medium_confidence: true,
            low_confidence: false,
            fix_reserved_keywords: true,
            fix_string_concatenation: true,
            fix_function_calls: true,
            fix_view_statement: true,
            fix_type_names: true,
            reserved_keywords: Vec::new(),
        }
    }
}

impl AutoFixConfig {
    pub fn allows(&self, confidence: CorrectionConfidence) -> bool {
        match confidence {
            CorrectionConfidence::High => self.high_confidence,
            CorrectionConfidence::Medium => self.medium_confidence,
            CorrectionConfidence::Low => self.low_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub issue_code: String,
    pub description: String,
    pub original: String,
    pub replacement: String,
    pub line: Option<usize>,
    pub confidence: CorrectionConfidence,
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.confidence, self.description)?;
        if let Some(line) = self.line {
            write!(f, " at line {}", line)?;
        }
        write!(f, ": '{}' -> '{}'", self.original, self.replacement)
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionResult {
    pub corrected_sql: String,
    pub corrections: Vec<Correction>,
    pub remaining: ValidationResult,
}

impl CorrectionResult {
    pub fn changed(&self) -> bool {
        !self.corrections.is_empty()
    }

    pub fn fixed_codes(&self) -> HashSet<String> {
        self.corrections.iter().map(|c| c.issue_code.clone()).collect()
    }
}

pub struct AutoCorrector {
    dialect: Dialect,
    config: AutoFixConfig,
}

impl AutoCorrector {
    pub fn new(dialect: Dialect, config: AutoFixConfig) -> Self {
        Self { dialect, config }
    }

    pub fn correct(&self, sql: &str, issues: &ValidationResult) -> CorrectionResult {
        let mut current = sql.to_string();
        let mut corrections = Vec::new();

        if self.config.allows(CorrectionConfidence::High) {
            if self.config.fix_reserved_keywords {
                current = self.quote_reserved_keywords(&current, issues, &mut corrections);
            }
            if self.config.fix_string_concatenation && self.dialect == Dialect::Snowflake {
                current = apply_fix(
                    &current,
                    |s| plus_to_concat(s, false),
                    "STRING_CONCAT_PLUS",
                    "String concatenation '+' replaced with '||'",
                    CorrectionConfidence::High,
                    &mut corrections,
                );
            }
            if self.config.fix_function_calls {
                current = match self.dialect {
                    Dialect::Snowflake => apply_fix(
                        &current,
                        if_to_iff,
                        "HANA_IF_NOT_TRANSLATED",
                        "IF() replaced with IFF()",
                        CorrectionConfidence::High,
                        &mut corrections,
                    ),
                    Dialect::Hana => apply_fix(
                        &current,
                        iff_to_if,
                        "HANA_INVALID_IFF_FUNCTION",
                        "IFF() replaced with IF()",
                        CorrectionConfidence::High,
                        &mut corrections,
                    ),
                };
            }
        }

        if self.config.allows(CorrectionConfidence::Medium)
            && self.config.fix_view_statement
            && self.dialect == Dialect::Hana
        {
            current = apply_fix(
                &current,
                |s| {
                    CREATE_OR_REPLACE
                        .replace_all(s, |caps: &Captures| {
                            format!("DROP VIEW {} CASCADE;\nCREATE VIEW {} AS", &caps[1], &caps[1])
                        })
                        .into_owned()
                },
                "HANA_CREATE_OR_REPLACE",
                "CREATE OR REPLACE VIEW split into DROP VIEW and CREATE VIEW",
                CorrectionConfidence::Medium,
                &mut corrections,
            );
        }

        if self.config.allows(CorrectionConfidence::Low)
            && self.config.fix_type_names
            && self.dialect == Dialect::Hana
        {
            current = apply_fix(
                &current,
                |s| map_unquoted(s, |run| NUMBER_TYPE.replace_all(run, "DECIMAL$1").into_owned()),
                "HANA_NUMBER_TYPE",
                "NUMBER type replaced with DECIMAL",
                CorrectionConfidence::Low,
                &mut corrections,
            );
            current = apply_fix(
                &current,
                |s| map_unquoted(s, |run| TIMESTAMP_NTZ.replace_all(run, "TIMESTAMP").into_owned()),
                "HANA_TIMESTAMP_TYPE",
                "TIMESTAMP_NTZ type replaced with TIMESTAMP",
                CorrectionConfidence::Low,
                &mut corrections,
            );
        }

        let fixed: HashSet<String> = corrections.iter().map(|c| c.issue_code.clone()).collect();
        if !corrections.is_empty() {
            info!("Applied {} SQL corrections", corrections.len());
        }
        CorrectionResult {
            corrected_sql: current,
            remaining: issues.without_codes(&fixed),
            corrections,
        }
    }

    fn quote_reserved_keywords(
        &self,
        sql: &str,
        issues: &ValidationResult,
        corrections: &mut Vec<Correction>,
    ) -> String {
        let mut keywords: Vec<String> = issues
            .issues()
            .filter(|i| i.code == "RESERVED_KEYWORD_AS_IDENTIFIER")
            .filter_map(|i| QUOTED_KEYWORD.captures(&i.message).map(|c| c[1].to_string()))
            .collect();
        keywords.extend(
            self.config
                .reserved_keywords
                .iter()
                .filter(|k| self.dialect != Dialect::Snowflake || is_reserved_keyword(k))
                .cloned(),
        );

        let mut seen = HashSet::new();
        let mut current = sql.to_string();
        for keyword in keywords {
            if !seen.insert(keyword.to_uppercase()) {
                continue;
            }
            let pattern = match Regex::new(&format!(
                r"(?i)(\bWITH|,|\bFROM|\bJOIN|\bAS)(\s+)({})\b",
                regex::escape(&keyword)
            )) {
                Ok(pattern) => pattern,
                Err(e) => {
                    debug!("Skipping keyword {}: {}", keyword, e);
                    continue;
                }
            };
            current = apply_fix(
                &current,
                |s| {
                    map_unquoted(s, |run| {
                        pattern
                            .replace_all(run, |caps: &Captures| {
                                format!("{}{}\"{}\"", &caps[1], &caps[2], &caps[3])
                            })
                            .into_owned()
                    })
                },
                "RESERVED_KEYWORD_AS_IDENTIFIER",
                &format!("Reserved keyword '{}' quoted", keyword),
                CorrectionConfidence::High,
                corrections,
            );
        }
        current
    }
}

/// Run `fix` and record a correction when it changed the text.
fn apply_fix<F>(
    sql: &str,
    fix: F,
    code: &str,
    description: &str,
    confidence: CorrectionConfidence,
    corrections: &mut Vec<Correction>,
) -> String
where
    F: Fn(&str) -> String,
{
    let fixed = fix(sql);
    if fixed == sql {
        return fixed;
    }
    let (original, replacement, line) = changed_region(sql, &fixed);
    debug!("{} ({}) at line {}", description, code, line);
    corrections.push(Correction {
        issue_code: code.to_string(),
        description: description.to_string(),
        original,
        replacement,
        line: Some(line),
        confidence,
    });
    fixed
}

/// The first differing line of `before` and `after`, with its 1-based number.
fn changed_region(before: &str, after: &str) -> (String, String, usize) {
    let mut before_lines = before.lines();
    let mut after_lines = after.lines();
    let mut number = 0;
    loop {
        number += 1;
        match (before_lines.next(), after_lines.next()) {
            (Some(b), Some(a)) if b == a => continue,
            (b, a) => {
                return (
                    b.unwrap_or("").trim().to_string(),
                    a.unwrap_or("").trim().to_string(),
                    number,
                )
            }
        }
    }
}
