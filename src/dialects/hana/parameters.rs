//! Elimination of unresolved `$$IP_...$$` input parameters.
//!
//! HANA SQL views have no placeholder mechanism, so any filter that depends
//! on a calculation-view input parameter is dropped. Every edit removes or
//! replaces a balanced span, so a balanced formula stays balanced.

use std::sync::LazyLock;

use regex::Regex;

use crate::translator::scanner::{
    collapse_whitespace, enclosing_opens, ends_with_keyword, find_matching_paren, is_call_paren,
    map_unquoted, rewrite_calls, starts_with_keyword, top_level_keyword_positions,
    unquoted_positions,
};

const MAX_ITERATIONS: usize = 20;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$IP_[A-Za-z0-9_]+\$\$").expect("valid placeholder regex"));
static PARAMETER_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'(\$\$IP_[A-Za-z0-9_]+\$\$|'{0,3})'\s*(!=|<>|=)\s*''$")
        .expect("valid parameter check regex")
});
static EMPTY_TEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'{2,4}\s*=\s*('{2,4}|'[^']*'|\d+)$").expect("valid empty test regex")
});
static EMPTY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDATE\s*\(\s*'{2,4}\s*\)").expect("valid empty date regex"));
static DOUBLE_AND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAND\s+AND\b").expect("valid regex"));
static DOUBLE_OR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bOR\s+OR\b").expect("valid regex"));
static CONNECTIVE_AFTER_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*(AND|OR)\b\s*").expect("valid regex"));
static CONNECTIVE_BEFORE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\b(AND|OR)\s*\)").expect("valid regex"));

/// Remove every unresolved input parameter from `formula`.
///
/// Runs to a fixed point, so applying it twice gives the same result as once.
pub fn eliminate_parameters(formula: &str) -> String {
    let mut current = formula.to_string();
    for _ in 0..MAX_ITERATIONS {
        let next = clean_fragments(&remove_placeholder_clauses(&collapse_parameter_checks(&current)));
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// `IF('$$IP_X$$' = '', a, b)` becomes `a`; `!=` and `<>` select `b`.
fn collapse_parameter_checks(formula: &str) -> String {
    rewrite_calls(formula, "if", |_, args| {
        if args.len() != 3 {
            return None;
        }
        let caps = PARAMETER_CHECK.captures(args[0].trim())?;
        let chosen = if &caps[2] == "=" { &args[1] } else { &args[2] };
        let chosen = chosen.trim();
        if matches!(chosen, "''" | "''''" | "\"\"") {
            Some("NULL".to_string())
        } else {
            Some(chosen.to_string())
        }
    })
}

fn remove_placeholder_clauses(formula: &str) -> String {
    let mut result = formula.to_string();
    for _ in 0..MAX_ITERATIONS {
        let (start, end) = match PLACEHOLDER.find(&result) {
            Some(m) => (m.start(), m.end()),
            None => break,
        };
        result = match parameter_clause(&result, start) {
            Some((open, close)) => remove_with_connective(&result, open, close + 1),
            None => replace_placeholder(&result, start, end),
        };
    }
    result
}

/// The innermost grouping parenthesis around `pos`, when it holds an OR at its top level.
fn parameter_clause(text: &str, pos: usize) -> Option<(usize, usize)> {
    let open = enclosing_opens(text, pos)
        .into_iter()
        .rev()
        .find(|open| is_grouping(text, *open))?;
    let close = find_matching_paren(text, open)?;
    let inner = &text[open + 1..close];
    (!top_level_keyword_positions(inner, "OR").is_empty()).then_some((open, close))
}

/// A parenthesis that groups a condition, as opposed to a call or an `IN` value list.
fn is_grouping(text: &str, open: usize) -> bool {
    !is_call_paren(text, open) && !ends_with_keyword(&text[..open], &["IN"])
}

/// Replace the placeholder, or the quoted literal wrapping it, with `''`.
fn replace_placeholder(text: &str, start: usize, end: usize) -> String {
    let bytes = text.as_bytes();
    let quoted = start > 0 && bytes[start - 1] == b'\'' && bytes.get(end) == Some(&b'\'');
    if quoted {
        format!("{}''{}", &text[..start - 1], &text[end + 1..])
    } else {
        format!("{}''{}", &text[..start], &text[end..])
    }
}

/// Cut `text[start..end]` together with one adjacent AND/OR, preferring the preceding one.
pub(crate) fn remove_with_connective(text: &str, start: usize, end: usize) -> String {
    let mut before = text[..start].trim_end();
    let mut after = text[end..].trim_start();
    if let Some(len) = trailing_connective(before) {
        before = before[..before.len() - len].trim_end();
    } else if let Some(len) = leading_connective(after) {
        after = after[len..].trim_start();
    }
    join_fragments(before, after)
}

fn trailing_connective(text: &str) -> Option<usize> {
    if ends_with_keyword(text, &["AND"]) {
        Some(3)
    } else if ends_with_keyword(text, &["OR"]) {
        Some(2)
    } else {
        None
    }
}

fn leading_connective(text: &str) -> Option<usize> {
    if starts_with_keyword(text, &["AND"]) {
        Some(3)
    } else if starts_with_keyword(text, &["OR"]) {
        Some(2)
    } else {
        None
    }
}

fn join_fragments(before: &str, after: &str) -> String {
    if before.is_empty() || after.is_empty() || before.ends_with('(') || after.starts_with(')') {
        format!("{}{}", before, after)
    } else {
        format!("{} {}", before, after)
    }
}

pub(crate) fn clean_fragments(formula: &str) -> String {
    let mut result = formula.to_string();
    for _ in 0..MAX_ITERATIONS {
        match leftover_group(&result) {
            Some((open, close)) => result = remove_with_connective(&result, open, close + 1),
            None => break,
        }
    }
    result = EMPTY_DATE.replace_all(&result, "NULL").into_owned();
    result = tidy_connectives(&result);
    collapse_whitespace(&result).trim().to_string()
}

/// A grouping span left behind by an eliminated parameter: an empty `()`, an
/// OR-group with an always-true empty-string test, or a comparison against `DATE('')`.
fn leftover_group(text: &str) -> Option<(usize, usize)> {
    for open in unquoted_positions(text, b'(') {
        if !is_grouping(text, open) {
            continue;
        }
        let close = match find_matching_paren(text, open) {
            Some(close) => close,
            None => continue,
        };
        let inner = text[open + 1..close].trim();
        if inner.is_empty() {
            return Some((open, close));
        }
        let ors = top_level_keyword_positions(inner, "OR");
        if !ors.is_empty() && or_operands(inner, &ors).iter().any(|op| is_empty_test(op)) {
            return Some((open, close));
        }
        let has_and = !top_level_keyword_positions(inner, "AND").is_empty();
        if ors.is_empty() && !has_and && EMPTY_DATE.is_match(inner) && has_comparison(inner) {
            return Some((open, close));
        }
    }
    None
}

fn or_operands<'a>(inner: &'a str, positions: &[usize]) -> Vec<&'a str> {
    let mut operands = Vec::with_capacity(positions.len() + 1);
    let mut last = 0;
    for pos in positions {
        operands.push(inner[last..*pos].trim());
        last = pos + 2;
    }
    operands.push(inner[last..].trim());
    operands
}

fn is_empty_test(operand: &str) -> bool {
    let mut operand = operand.trim();
    while operand.starts_with('(') && find_matching_paren(operand, 0) == Some(operand.len() - 1) {
        operand = operand[1..operand.len() - 1].trim();
    }
    EMPTY_TEST.is_match(operand)
}

fn has_comparison(text: &str) -> bool {
    [b'=', b'<', b'>']
        .iter()
        .any(|op| !unquoted_positions(text, *op).is_empty())
}

fn tidy_connectives(text: &str) -> String {
    let mut result = map_unquoted(text, |run| {
        let run = DOUBLE_AND.replace_all(run, "AND");
        let run = DOUBLE_OR.replace_all(&run, "OR");
        let run = CONNECTIVE_AFTER_OPEN.replace_all(&run, "(");
        CONNECTIVE_BEFORE_CLOSE.replace_all(&run, ")").into_owned()
    });
    loop {
        let trimmed = result.trim();
        if let Some(len) = leading_connective(trimmed) {
            result = trimmed[len..].to_string();
        } else if let Some(len) = trailing_connective(trimmed) {
            result = trimmed[..trimmed.len() - len].to_string();
        } else {
            return trimmed.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::scanner::is_balanced;

    #[test]
    fn test_or_clause_removed_with_connective() {
        let formula = "\"MANDT\" = '100' AND ('$$IP_WERKS$$' = '' OR \"WERKS\" = '$$IP_WERKS$$')";
        assert_eq!(eliminate_parameters(formula), "\"MANDT\" = '100'");
    }

    #[test]
    fn test_following_connective_removed_when_leading() {
        let formula = "('$$IP_A$$' = '' OR \"A\" = '$$IP_A$$') AND \"B\" = 1";
        assert_eq!(eliminate_parameters(formula), "\"B\" = 1");
    }

    #[test]
    fn test_placeholder_without_or_group_becomes_empty_literal() {
        assert_eq!(eliminate_parameters("\"A\" = '$$IP_A$$'"), "\"A\" = ''");
        assert_eq!(eliminate_parameters("LPAD($$IP_N$$, 3)"), "LPAD('', 3)");
    }

    #[test]
    fn test_if_checks_collapse() {
        assert_eq!(
            eliminate_parameters("if('$$IP_TRTNUM$$' != '', lpad('$$IP_TRTNUM$$', 30, '0'), '')"),
            "NULL"
        );
        assert_eq!(eliminate_parameters("if('''' = '', \"A\", \"B\")"), "\"A\"");
    }

    #[test]
    fn test_in_call_group_removed() {
        let formula = "\"X\" = 1 AND (IN($$IP_P$$, 0) OR IN(\"COL\", $$IP_P$$))";
        assert_eq!(eliminate_parameters(formula), "\"X\" = 1");
    }

    #[test]
    fn test_empty_date_fragments() {
        assert_eq!(
            eliminate_parameters("\"A\" = 1 AND (DATE(\"BUDAT\") >= DATE(''))"),
            "\"A\" = 1"
        );
        assert_eq!(eliminate_parameters("DATE('')"), "NULL");
    }

    #[test]
    fn test_empty_test_groups_removed() {
        let formula = "\"A\" = 1 AND (('' = '') OR \"B\" = 2)";
        assert_eq!(eliminate_parameters(formula), "\"A\" = 1");
    }

    #[test]
    fn test_idempotent_and_balanced() {
        let inputs = [
            "(\"A\" = 1 AND ('$$IP_X$$' = '' OR \"B\" = '$$IP_X$$')) OR \"C\" = 2",
            "if('$$IP_A$$' = '', 'x', \"Y\") + ('$$IP_B$$' = '' OR \"Z\" IN ('$$IP_B$$'))",
            "\"A\" = 'it''s' AND (DATE(\"D\") <= DATE('$$IP_TO$$'))",
            "",
        ];
        for input in inputs {
            let once = eliminate_parameters(input);
            assert_eq!(eliminate_parameters(&once), once, "not idempotent for {}", input);
            assert!(is_balanced(&once), "unbalanced output {}", once);
            assert!(!once.contains("$$IP_"));
        }
    }

    #[test]
    fn test_text_without_parameters_untouched() {
        let formula = "\"A\" = 'x' OR (\"B\" = 1 AND \"C\" = 2)";
        assert_eq!(eliminate_parameters(formula), formula);
    }
}
