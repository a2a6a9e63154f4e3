use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::scanner::{follows_operand, rewrite_calls};
use crate::dialects::Dialect;
use crate::rules::{FunctionHandler, FunctionRule, RuleCatalogs};

static TEMPLATE_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}").expect("valid template slot regex"));

/// Apply every pattern rule that has a template for `dialect`, in catalog order.
pub fn apply_pattern_rewrites(formula: &str, catalogs: &RuleCatalogs, dialect: Dialect) -> String {
    let mut result = formula.to_string();
    for compiled in catalogs.patterns() {
        let template = compiled.rule.template(dialect);
        if template.is_empty() {
            continue;
        }
        result = compiled
            .regex
            .replace_all(&result, template)
            .into_owned();
    }
    result
}

/// Rewrite legacy helper calls through the function catalog.
pub fn apply_catalog_rewrites(formula: &str, catalogs: &RuleCatalogs, dialect: Dialect) -> String {
    let mut result = formula.to_string();
    for rule in catalogs.functions_for(dialect) {
        result = rewrite_calls(&result, &rule.name, |prefix, args| {
            build_replacement(rule, prefix, args)
        });
    }
    result
}

fn build_replacement(rule: &FunctionRule, prefix: &str, args: &[String]) -> Option<String> {
    match rule.handler {
        FunctionHandler::Template => fill_template(rule.template.as_deref()?, args),
        FunctionHandler::Rename => Some(format!("{}({})", rule.target.as_deref()?, args.join(", "))),
        FunctionHandler::RegexpLike => {
            let target = args.first()?;
            let pattern = args.get(1).map(String::as_str).unwrap_or("'*'");
            Some(format!(
                "REGEXP_LIKE({}, '^' || REPLACE(REPLACE({}, '*', '.*'), '?', '.') || '$')",
                target, pattern
            ))
        }
        FunctionHandler::InList => {
            if args.len() < 2 || follows_operand(prefix) {
                return None;
            }
            let options = args[1..]
                .iter()
                .map(|a| normalize_scalar(a))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("({} IN ({}))", args[0], options))
        }
    }
}

/// Substitute `{n}` slots; `None` when a slot has no argument.
fn fill_template(template: &str, args: &[String]) -> Option<String> {
    let mut missing = false;
    let filled = TEMPLATE_SLOT.replace_all(template, |caps: &Captures| {
        let arg = caps[1].parse::<usize>().ok().and_then(|i| args.get(i));
        match arg {
            Some(arg) => arg.clone(),
            None => {
                missing = true;
                String::new()
            }
        }
    });
    (!missing).then(|| filled.into_owned())
}

/// Double-quoted scalar arguments become single-quoted string literals.
fn normalize_scalar(argument: &str) -> String {
    let trimmed = argument.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let inner = trimmed[1..trimmed.len() - 1].replace('\'', "''");
        return format!("'{}'", inner);
    }
    trimmed.to_string()
}
