//! Identifier quoting, literals, expressions and WHERE clauses.

use std::collections::BTreeMap;

use log::debug;

use crate::dialects::DialectTransformationEngine;
use crate::model::{negate_operator, DataTypeSpec, Expression, Predicate, TargetType};

use super::context::RenderContext;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly qualified name, splitting on the first dot outside quotes only.
pub fn quote_qualified(name: &str) -> String {
    let mut in_quotes = false;
    for (i, c) in name.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                return format!("{}.{}", quote_part(&name[..i]), quote_part(&name[i + 1..]));
            }
            _ => {}
        }
    }
    quote_part(name)
}

fn quote_part(part: &str) -> String {
    let trimmed = part.trim();
    let bare = trimmed
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .map(|p| p.replace("\"\"", "\""))
        .unwrap_or_else(|| trimmed.to_string());
    quote_identifier(&bare)
}

/// View names quote every dot-separated part.
pub fn quote_view_name(name: &str) -> String {
    name.split('.').map(quote_identifier).collect::<Vec<_>>().join(".")
}

pub fn render_column(name: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(q) => format!("{}.{}", q, quote_identifier(name)),
        None => quote_identifier(name),
    }
}

fn is_plain_number(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !(digits.len() > 1 && digits.starts_with('0'))
}

/// Render a literal value; codes with a leading zero stay strings.
pub fn render_literal(engine: &dyn DialectTransformationEngine, value: &str, data_type: Option<&DataTypeSpec>) -> String {
    match data_type.map(|t| t.kind) {
        Some(TargetType::Date) => {
            if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
                return format!("TO_DATE('{}', 'YYYYMMDD')", value);
            }
            return engine.date_literal(value);
        }
        Some(TargetType::TimestampNtz) => return engine.timestamp_literal(value),
        _ => {}
    }
    if is_plain_number(value) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "''"))
}

pub fn render_expression(ctx: &RenderContext, expr: &Expression, qualifier: Option<&str>) -> String {
    match expr {
        Expression::Column { name, .. } => render_column(name, qualifier),
        Expression::Literal { value, data_type } => render_literal(ctx.engine, value, data_type.as_ref()),
        Expression::Raw {
            formula, data_type, ..
        } => {
            let translated = translate(ctx, formula, data_type.as_ref());
            if translated.is_empty() {
                return "NULL".to_string();
            }
            match qualifier {
                Some(q) if is_single_identifier(&translated) => format!("{}.{}", q, translated),
                _ => translated,
            }
        }
        Expression::Function { name, args, .. } => {
            let rendered: Vec<String> = args.iter().map(|a| render_expression(ctx, a, qualifier)).collect();
            ctx.engine
                .translate_function(name, &rendered)
                .unwrap_or_else(|| format!("{}({})", name.to_uppercase(), rendered.join(", ")))
        }
        Expression::Case {
            branches, otherwise, ..
        } => {
            let mut sql = String::from("CASE");
            for branch in branches {
                sql.push_str(&format!(
                    " WHEN {} THEN {}",
                    render_expression(ctx, &branch.condition, qualifier),
                    render_expression(ctx, &branch.result, qualifier)
                ));
            }
            if let Some(otherwise) = otherwise {
                sql.push_str(&format!(" ELSE {}", render_expression(ctx, otherwise, qualifier)));
            }
            sql.push_str(" END");
            sql
        }
    }
}

/// Dialect translation of a raw formula; empty when parameter cleanup consumed it.
pub fn translate(ctx: &RenderContext, formula: &str, result_type: Option<&DataTypeSpec>) -> String {
    let formula_ctx = ctx.formula_context(result_type);
    ctx.engine.translate_formula(formula, &formula_ctx).trim().to_string()
}

fn render_predicate(ctx: &RenderContext, predicate: &Predicate, qualifier: Option<&str>) -> Option<String> {
    let operator = |op: &str, including: bool| {
        if including {
            op.trim().to_uppercase()
        } else {
            negate_operator(op)
        }
    };
    match predicate {
        Predicate::Comparison {
            left,
            operator: op,
            right,
            including,
        } => Some(format!(
            "{} {} {}",
            render_expression(ctx, left, qualifier),
            operator(op, *including),
            render_expression(ctx, right, qualifier)
        )),
        Predicate::Between {
            expr,
            low,
            high,
            including,
        } => Some(format!(
            "{} {} {} AND {}",
            render_expression(ctx, expr, qualifier),
            operator("BETWEEN", *including),
            render_expression(ctx, low, qualifier),
            render_expression(ctx, high, qualifier)
        )),
        Predicate::InList {
            expr,
            values,
            including,
        } => {
            if values.is_empty() {
                debug!("Skipping IN filter without values");
                return None;
            }
            let values: Vec<String> = values.iter().map(|v| render_expression(ctx, v, qualifier)).collect();
            Some(format!(
                "{} {} ({})",
                render_expression(ctx, expr, qualifier),
                operator("IN", *including),
                values.join(", ")
            ))
        }
        Predicate::IsNull { expr, including } => Some(format!(
            "{} {}",
            render_expression(ctx, expr, qualifier),
            operator("IS NULL", *including)
        )),
        Predicate::Raw { formula, .. } => {
            let translated = translate(ctx, formula, None);
            if translated.is_empty() {
                debug!("Raw filter reduced to nothing: {}", formula);
                None
            } else {
                Some(format!("({})", translated))
            }
        }
    }
}

/// WHERE clause body for a set of filters, or `None` when nothing survives cleanup.
pub fn render_filters(ctx: &RenderContext, filters: &[Predicate], qualifier: Option<&str>) -> Option<String> {
    let conditions: Vec<String> = filters
        .iter()
        .filter_map(|p| render_predicate(ctx, p, qualifier))
        .collect();
    if conditions.is_empty() {
        return None;
    }
    finish_where(ctx, &conditions.join(" AND "))
}

/// Dialect cleanup of an assembled WHERE body.
pub fn finish_where(ctx: &RenderContext, clause: &str) -> Option<String> {
    let cleaned = ctx.engine.cleanup_where_clause(clause);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "()" {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Rewrite double-quoted identifiers outside string literals.
///
/// Identifiers preceded by `.` (already qualified) and `$$...$$` placeholders are left
/// alone. The callback receives the unquoted name and returns the replacement text.
pub fn rewrite_identifiers<F>(text: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'"' => {
                let start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'"' {
                        if bytes.get(i + 1) == Some(&b'"') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                let end = (i + 1).min(bytes.len());
                i = end;
                if end - start < 2 || bytes[end - 1] != b'"' {
                    continue;
                }
                let name = text[start + 1..end - 1].replace("\"\"", "\"");
                let qualified = start > 0 && bytes[start - 1] == b'.';
                if qualified || name.starts_with("$$") {
                    continue;
                }
                if let Some(replacement) = rewrite(&name) {
                    out.push_str(&text[copied..start]);
                    out.push_str(&replacement);
                    copied = end;
                }
            }
            _ => i += 1,
        }
    }
    out.push_str(&text[copied..]);
    out
}

/// Unquoted names of every rewritable identifier in `text`.
pub fn quoted_identifiers(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    rewrite_identifiers(text, |name| {
        names.push(name.to_string());
        None
    });
    names
}

/// Prefix unqualified quoted identifiers with `alias.`.
pub fn qualify_identifiers(text: &str, alias: &str) -> String {
    rewrite_identifiers(text, |name| Some(format!("{}.{}", alias, quote_identifier(name))))
}

/// Replace `"NAME"` references with their definitions; keys are upper-case names.
pub fn expand_references(formula: &str, definitions: &BTreeMap<String, String>) -> String {
    rewrite_identifiers(formula, |name| definitions.get(&name.to_uppercase()).cloned())
}

fn is_single_identifier(text: &str) -> bool {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => !inner.is_empty() && !inner.replace("\"\"", "").contains('"'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformationConfig;
    use crate::dialects::{engine_for, Dialect};
    use crate::generator::packages::NoPackages;
    use crate::model::{HanaVersion, Scenario};

    #[test]
    fn test_quoting() {
        assert_eq!(quote_identifier("MATNR"), "\"MATNR\"");
        assert_eq!(quote_identifier("my\"col"), "\"my\"\"col\"");
        assert_eq!(quote_qualified("RAW.SAP"), "\"RAW\".\"SAP\"");
        assert_eq!(quote_qualified("\"A.B\".C.D"), "\"A.B\".\"C.D\"");
        assert_eq!(quote_view_name("_SYS_BIC.CV_SALES"), "\"_SYS_BIC\".\"CV_SALES\"");
    }

    #[test]
    fn test_literals() {
        let snowflake = engine_for(Dialect::Snowflake, HanaVersion::V2).unwrap();
        let hana = engine_for(Dialect::Hana, HanaVersion::V2).unwrap();
        let sf = snowflake.as_ref();
        assert_eq!(render_literal(sf, "1000", None), "1000");
        assert_eq!(render_literal(sf, "-5", None), "-5");
        assert_eq!(render_literal(sf, "01", None), "'01'");
        assert_eq!(render_literal(sf, "O'Brien", None), "'O''Brien'");
        assert_eq!(
            render_literal(sf, "20240131", Some(&DataTypeSpec::date())),
            "TO_DATE('20240131', 'YYYYMMDD')"
        );
        assert_eq!(render_literal(sf, "2024-01-31", Some(&DataTypeSpec::date())), "'2024-01-31'::DATE");
        assert_eq!(
            render_literal(hana.as_ref(), "2024-01-31 10:00:00", Some(&DataTypeSpec::timestamp())),
            "TO_TIMESTAMP('2024-01-31 10:00:00')"
        );
    }

    #[test]
    fn test_rewrite_identifiers_skips_strings_and_qualified_names() {
        let text = r#""A" + x."B" + '"C"' + PLACEHOLDER."$$IP_YEAR$$" + "D""E""#;
        assert_eq!(quoted_identifiers(text), vec!["A".to_string(), "D\"E".to_string()]);
        assert_eq!(
            qualify_identifiers(text, "calc"),
            r#"calc."A" + x."B" + '"C"' + PLACEHOLDER."$$IP_YEAR$$" + calc."D""E""#
        );
    }

    #[test]
    fn test_expand_references_is_case_insensitive() {
        let definitions = BTreeMap::from([("NET".to_string(), "(\"GROSS\" - \"TAX\")".to_string())]);
        assert_eq!(
            expand_references("\"net\" * 2 + \"OTHER\"", &definitions),
            "(\"GROSS\" - \"TAX\") * 2 + \"OTHER\""
        );
    }

    #[test]
    fn test_filters_negate_and_join() {
        let scenario = Scenario::new("S");
        let engine = engine_for(Dialect::Snowflake, HanaVersion::V2).unwrap();
        let config = TransformationConfig::default();
        let ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &NoPackages);
        let filters = vec![
            Predicate::Comparison {
                left: Expression::column("BUKRS"),
                operator: "=".to_string(),
                right: Expression::literal("1000", None),
                including: false,
            },
            Predicate::InList {
                expr: Expression::column("LAND"),
                values: vec![Expression::literal("DE", None), Expression::literal("AT", None)],
                including: true,
            },
            Predicate::IsNull {
                expr: Expression::column("LOEKZ"),
                including: true,
            },
            Predicate::raw("\"MENGE\" > 0"),
        ];
        assert_eq!(
            render_filters(&ctx, &filters, None).unwrap(),
            "\"BUKRS\" <> 1000 AND \"LAND\" IN ('DE', 'AT') AND \"LOEKZ\" IS NULL AND (\"MENGE\" > 0)"
        );
        assert_eq!(render_filters(&ctx, &[], None), None);
    }

    #[test]
    fn test_raw_single_identifier_is_qualified() {
        let scenario = Scenario::new("S");
        let engine = engine_for(Dialect::Snowflake, HanaVersion::V2).unwrap();
        let config = TransformationConfig::default();
        let ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &NoPackages);
        assert_eq!(render_expression(&ctx, &Expression::raw("\"CALDAY\""), Some("j")), "j.\"CALDAY\"");
        assert_eq!(render_expression(&ctx, &Expression::raw(""), None), "NULL");
        assert_eq!(
            render_expression(&ctx, &Expression::column("MATNR"), Some("left_src")),
            "left_src.\"MATNR\""
        );
    }
}
