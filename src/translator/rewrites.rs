//! Individual formula rewrite steps.
//!
//! Each dialect engine composes these into its own pipeline; every step is
//! built on the balanced scanner so quoted text is never touched.

use super::scanner::{
    self, ends_with_keyword, find_calls, find_enclosing_open, follows_operand, rewrite_calls,
    split_top_level_args, top_level_keyword_positions, unquoted_positions,
};

/// `IF(c, a, b)` to Snowflake `IFF(c, a, b)`.
pub fn if_to_iff(formula: &str) -> String {
    rewrite_calls(formula, "if", |_, args| {
        (args.len() == 3).then(|| format!("IFF({}, {}, {})", args[0], args[1], args[2]))
    })
}

/// `IF(c, a, b)` to `CASE WHEN c THEN a ELSE b END`; an empty-string else branch becomes NULL.
pub fn if_to_case(formula: &str) -> String {
    rewrite_calls(formula, "if", |_, args| {
        if args.len() != 3 {
            return None;
        }
        let otherwise = if args[2] == "''" { "NULL" } else { args[2].as_str() };
        Some(format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            args[0], args[1], otherwise
        ))
    })
}

/// `IFF(` back to `IF(` for engines that lack IFF.
pub fn iff_to_if(formula: &str) -> String {
    rewrite_calls(formula, "iff", |_, args| Some(format!("IF({})", args.join(", "))))
}

/// `ISNULL(x)` to `((x) IS NULL)`.
pub fn isnull_to_predicate(formula: &str) -> String {
    rewrite_calls(formula, "isnull", |_, args| {
        (args.len() == 1).then(|| format!("(({}) IS NULL)", args[0]))
    })
}

/// Function-style `IN(e, v1, v2)` to operator-style `e IN (v1, v2)`.
///
/// Calls already in operator position (`"A" IN (...)`) are left alone.
pub fn in_function_to_operator(formula: &str) -> String {
    rewrite_calls(formula, "in", |prefix, args| {
        if is_infix_in(prefix) || args.len() < 2 {
            return None;
        }
        Some(format!("{} IN ({})", args[0], args[1..].join(", ")))
    })
}

/// True when an `IN` preceded by `prefix` is the infix operator, including `NOT IN`.
fn is_infix_in(prefix: &str) -> bool {
    let trimmed = prefix.trim_end();
    if ends_with_keyword(trimmed, &["NOT"]) {
        return follows_operand(&trimmed[..trimmed.len() - 3]);
    }
    follows_operand(trimmed)
}

/// Expand operator-style `e IN (v1, v2)` into `(e = v1 OR e = v2)`.
///
/// `NOT IN` expands to a conjunction of `<>` comparisons.
pub fn in_to_or(formula: &str) -> String {
    let mut result = formula.to_string();
    let mut cursor = usize::MAX;
    loop {
        let site = match find_calls(&result, "in")
            .into_iter()
            .filter(|c| c.start < cursor && is_infix_in(&result[..c.start]))
            .last()
        {
            Some(site) => site,
            None => break,
        };
        cursor = site.start;

        let segment_start = find_enclosing_open(&result, site.start)
            .map(|p| p + 1)
            .unwrap_or(0);
        let segment = &result[segment_start..site.start];
        let mut expr_start = segment_start;
        for keyword in ["AND", "OR", "WHEN", "THEN", "ELSE", "CASE"] {
            if let Some(pos) = top_level_keyword_positions(segment, keyword).last() {
                expr_start = expr_start.max(segment_start + pos + keyword.len());
            }
        }
        if let Some(comma) = unquoted_positions(segment, b',')
            .into_iter()
            .filter(|p| scanner::paren_delta(&segment[..*p]) == 0)
            .last()
        {
            expr_start = expr_start.max(segment_start + comma + 1);
        }

        let mut expr = result[expr_start..site.start].trim().to_string();
        let negated = ends_with_keyword(&expr, &["NOT"]);
        if negated {
            expr = expr[..expr.len() - 3].trim_end().to_string();
        }
        let values = site.args(&result);
        if expr.is_empty() || values.is_empty() {
            continue;
        }

        let (op, joiner) = if negated { ("<>", " AND ") } else { ("=", " OR ") };
        let expanded = values
            .iter()
            .map(|v| format!("{} {} {}", expr, op, v))
            .collect::<Vec<_>>()
            .join(joiner);
        let leading = if expr_start > segment_start { " " } else { "" };
        result = format!(
            "{}{}({}){}",
            &result[..expr_start],
            leading,
            expanded,
            &result[site.end()..]
        );
        cursor = expr_start;
    }
    result
}

/// `||` to `+` outside `REGEXP_LIKE(...)` arguments.
pub fn concat_to_plus(formula: &str) -> String {
    let protected: Vec<(usize, usize)> = find_calls(formula, "REGEXP_LIKE")
        .iter()
        .map(|c| (c.start, c.end()))
        .collect();
    scanner::replace_unquoted(formula, "||", "+", &protected)
}

/// `+` to `||` where an operand is a string literal, or where both sides are
/// column references and the expression is known to produce a string.
pub fn plus_to_concat(formula: &str, string_result: bool) -> String {
    let mut result = formula.to_string();
    for pos in unquoted_positions(formula, b'+').into_iter().rev() {
        let left = result[..pos].trim_end();
        let right = result[pos + 1..].trim_start();
        let left_last = left.as_bytes().last().copied();
        let right_first = right.as_bytes().first().copied();
        let literal_operand = left_last == Some(b'\'') || right_first == Some(b'\'');
        let column_operands = string_result
            && matches!(left_last, Some(b'"') | Some(b')'))
            && right_first == Some(b'"');
        if literal_operand || column_operands {
            result = format!("{} || {}", left, right);
        }
    }
    result
}

/// Strip a wrapping pair of parentheses when it encloses the whole text.
pub fn strip_outer_parens(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('(')
        && scanner::find_matching_paren(trimmed, 0) == Some(trimmed.len() - 1)
    {
        return trimmed[1..trimmed.len() - 1].trim();
    }
    trimmed
}

/// Arguments of a single wrapped call such as `DATE(x)`; `None` when `text` is not one.
pub fn single_call_args(text: &str, name: &str) -> Option<Vec<String>> {
    let calls = find_calls(text, name);
    let site = calls.first()?;
    (site.start == 0 && site.end() == text.len())
        .then(|| split_top_level_args(&text[site.open + 1..site.close]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_to_iff() {
        assert_eq!(
            if_to_iff("if(\"A\" = 'X', \"B\", if(\"C\" > 1, 'y', 'z'))"),
            "IFF(\"A\" = 'X', \"B\", IFF(\"C\" > 1, 'y', 'z'))"
        );
        assert_eq!(if_to_iff("if(\"A\")"), "if(\"A\")");
    }

    #[test]
    fn test_if_to_case_empty_else() {
        assert_eq!(
            if_to_case("IF(\"A\" = '1', 'Yes', '')"),
            "CASE WHEN \"A\" = '1' THEN 'Yes' ELSE NULL END"
        );
    }

    #[test]
    fn test_isnull_rewrite() {
        assert_eq!(isnull_to_predicate("isnull(\"A\")"), "((\"A\") IS NULL)");
    }

    #[test]
    fn test_in_function_to_operator() {
        assert_eq!(
            in_function_to_operator("IF(IN(RIGHT(\"CALMONTH\", 2), '01', '02'), 1, 0)"),
            "IF(RIGHT(\"CALMONTH\", 2) IN ('01', '02'), 1, 0)"
        );
        assert_eq!(
            in_function_to_operator("\"A\" IN ('x', 'y')"),
            "\"A\" IN ('x', 'y')"
        );
    }

    #[test]
    fn test_in_to_or() {
        assert_eq!(
            in_to_or("(\"A\" IN ('x', 'y'))"),
            "((\"A\" = 'x' OR \"A\" = 'y'))"
        );
        assert_eq!(
            in_to_or("\"B\" = 1 AND \"A\" NOT IN (1, 2)"),
            "\"B\" = 1 AND (\"A\" <> 1 AND \"A\" <> 2)"
        );
    }

    #[test]
    fn test_concat_to_plus_skips_regexp_like() {
        assert_eq!(
            concat_to_plus("\"A\" || 'x' || REGEXP_LIKE(\"B\", '^' || 'a')"),
            "\"A\" + 'x' + REGEXP_LIKE(\"B\", '^' || 'a')"
        );
    }

    #[test]
    fn test_plus_to_concat() {
        assert_eq!(plus_to_concat("\"A\" + '-' + \"B\"", false), "\"A\" || '-' || \"B\"");
        assert_eq!(plus_to_concat("\"AMOUNT\" + \"TAX\"", false), "\"AMOUNT\" + \"TAX\"");
        assert_eq!(plus_to_concat("\"FIRST\" + \"LAST\"", true), "\"FIRST\" || \"LAST\"");
        assert_eq!(plus_to_concat("'a+b'", false), "'a+b'");
    }

    #[test]
    fn test_strip_outer_parens() {
        assert_eq!(strip_outer_parens("(a AND b)"), "a AND b");
        assert_eq!(strip_outer_parens("(a) AND (b)"), "(a) AND (b)");
    }
}
