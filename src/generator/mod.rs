//! SQL generation from the scenario IR.
//!
//! Every node becomes one CTE in dependency order; the terminal node (or data source)
//! feeds the final `SELECT`. Anything that cannot be rendered faithfully degrades to a
//! placeholder fragment and a [`TransformationWarning`] rather than failing.

pub mod context;
pub mod expressions;
pub mod nodes;
pub mod packages;

use std::collections::BTreeMap;

use log::debug;

use crate::config::TransformationConfig;
use crate::dialects::DialectTransformationEngine;
use crate::error::{TransformationWarning, WarningSeverity};
use crate::model::{CurrencyConversion, DataTypeSpec, Expression, Measure, Scenario};
use crate::resolver::{find_terminal_node, topological_sort};

use self::context::RenderContext;
use self::expressions::{
    qualify_identifiers, quote_identifier, quote_view_name, render_column, render_expression, render_literal,
    translate,
};
use self::nodes::render_node;
use self::packages::PackageLookup;

pub use self::context::cte_alias;
pub use self::packages::{NoPackages, PackageMapper};

const FINAL_ALIAS: &str = "final";

/// Output of one render pass.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    pub sql: String,
    pub warnings: Vec<TransformationWarning>,
    /// Node and data-source ids referenced during rendering, mapped to their aliases.
    pub cte_aliases: BTreeMap<String, String>,
    pub terminal: Option<String>,
}

pub struct SqlRenderer<'a> {
    engine: &'a dyn DialectTransformationEngine,
    config: &'a TransformationConfig,
    packages: &'a dyn PackageLookup,
}

impl<'a> SqlRenderer<'a> {
    pub fn new(
        engine: &'a dyn DialectTransformationEngine,
        config: &'a TransformationConfig,
        packages: &'a dyn PackageLookup,
    ) -> Self {
        Self {
            engine,
            config,
            packages,
        }
    }

    pub fn render(&self, scenario: &Scenario) -> RenderedSql {
        let mut ctx = RenderContext::new(scenario, self.engine, self.config, self.packages);
        let graph = topological_sort(scenario);
        if graph.has_cycle() {
            ctx.warn(
                &format!("Cyclic node dependencies: {}", graph.cyclic.join(", ")),
                WarningSeverity::High,
            );
        }

        let mut ctes = Vec::new();
        let mut rendered: Vec<(String, String)> = Vec::new();
        for id in &graph.order {
            let Some(node) = scenario.node(id) else {
                continue;
            };
            let body = render_node(&mut ctx, node);
            let alias = ctx.alias(id);
            ctes.push(format_cte(&alias, &body));
            rendered.push((id.clone(), alias));
        }
        debug!("Rendered {} CTEs for {}", ctes.len(), scenario.id());

        let terminal = find_terminal_node(scenario, &graph.order);
        let final_select = match terminal.as_deref() {
            None => {
                ctx.warn("No terminal node found - cannot generate valid SQL", WarningSeverity::High);
                ctes.push(format_cte(FINAL_ALIAS, "SELECT NULL AS placeholder"));
                format!("SELECT * FROM {}", FINAL_ALIAS)
            }
            Some(id) if scenario.data_source(id).is_some() => data_source_select(&mut ctx, id),
            Some(id) => node_select(&mut ctx, id, &rendered, &mut ctes),
        };

        let preamble = self.config.output.create_view.then(|| {
            let name = self
                .config
                .output
                .view_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(scenario.id());
            self.engine.view_preamble(&quote_view_name(name))
        });

        let (cte_aliases, warnings) = ctx.into_parts();
        let sql = assemble(&warnings, preamble.as_deref(), &ctes, &final_select);
        RenderedSql {
            sql,
            warnings,
            cte_aliases,
            terminal,
        }
    }
}

fn format_cte(alias: &str, body: &str) -> String {
    format!("  {} AS (\n    {}\n  )", alias, body.replace('\n', "\n    "))
}

fn assemble(warnings: &[TransformationWarning], preamble: Option<&str>, ctes: &[String], final_select: &str) -> String {
    let mut lines = Vec::new();
    if !warnings.is_empty() {
        lines.push("-- Warnings:".to_string());
        lines.extend(warnings.iter().map(|w| format!("--   {}", w.message)));
        lines.push(String::new());
    }
    if let Some(preamble) = preamble {
        lines.push(preamble.to_string());
    }
    if !ctes.is_empty() {
        lines.push("WITH".to_string());
        lines.push(ctes.join(",\n"));
        lines.push(String::new());
    }
    lines.push(final_select.to_string());
    lines.join("\n")
}

fn node_select(
    ctx: &mut RenderContext,
    terminal: &str,
    rendered: &[(String, String)],
    ctes: &mut Vec<String>,
) -> String {
    let alias = match rendered.iter().find(|(id, _)| id == terminal) {
        Some((_, alias)) => alias.clone(),
        None => match rendered.last() {
            Some((_, last)) => {
                ctx.warn(
                    &format!("Final node {} referenced but not found in CTEs; using last CTE", terminal),
                    WarningSeverity::High,
                );
                last.clone()
            }
            None => {
                ctx.warn(
                    &format!("Final node {} referenced but not found in CTEs; using placeholder CTE", terminal),
                    WarningSeverity::High,
                );
                ctes.push(format_cte(FINAL_ALIAS, "SELECT NULL AS placeholder"));
                FINAL_ALIAS.to_string()
            }
        },
    };

    let scenario = ctx.scenario;
    let view_attributes = scenario
        .node(terminal)
        .map(|n| n.view_attributes.clone())
        .unwrap_or_default();
    let columns: Vec<String> = if !view_attributes.is_empty() {
        view_attributes
    } else {
        scenario
            .logical_model
            .iter()
            .flat_map(|m| m.attributes.iter())
            .filter(|a| !a.hidden)
            .map(|a| a.name.clone())
            .collect()
    };
    let mut items: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    if items.is_empty() {
        items.push("*".to_string());
    }
    apply_currency_conversion(ctx, &mut items, None);
    format!("SELECT {} FROM {}", items.join(", "), alias)
}

fn data_source_select(ctx: &mut RenderContext, terminal: &str) -> String {
    let from = ctx.render_from(terminal);
    let scenario = ctx.scenario;
    let mut items = Vec::new();
    if let Some(model) = scenario.logical_model.as_ref().filter(|m| !m.attributes.is_empty()) {
        for attribute in &model.attributes {
            if let Some(column) = &attribute.column_name {
                items.push(format!(
                    "{} AS {}",
                    render_column(column, Some(&from)),
                    quote_identifier(&attribute.name)
                ));
            }
        }
        for calc in &model.calculated_attributes {
            let expr = match &calc.expression {
                Expression::Raw {
                    formula, data_type, ..
                } => {
                    let translated = translate(
                        ctx,
                        &qualify_identifiers(formula, &from),
                        calc.data_type.as_ref().or(data_type.as_ref()),
                    );
                    if translated.is_empty() {
                        "NULL".to_string()
                    } else {
                        translated
                    }
                }
                other => render_expression(ctx, other, Some(&from)),
            };
            items.push(format!("{} AS {}", expr, quote_identifier(&calc.name)));
        }
    }
    if items.is_empty() {
        items.push("*".to_string());
    }
    apply_currency_conversion(ctx, &mut items, Some(&from));
    if items.len() == 1 && items[0] == "*" {
        format!("SELECT * FROM {}", from)
    } else {
        format!("SELECT\n    {}\nFROM {}", items.join(",\n    "), from)
    }
}

/// Replace converted measures in the final select list with currency UDF calls.
fn apply_currency_conversion(ctx: &mut RenderContext, items: &mut Vec<String>, qualifier: Option<&str>) {
    let scenario = ctx.scenario;
    let measures: Vec<&Measure> = scenario
        .measures()
        .iter()
        .filter(|m| m.conversion.is_some())
        .collect();
    if measures.is_empty() {
        return;
    }
    let Some(udf) = ctx
        .config
        .currency
        .udf_name
        .clone()
        .filter(|u| !u.trim().is_empty())
    else {
        for measure in measures {
            ctx.warn(
                &format!(
                    "Currency conversion requested for measure {} but no UDF configured; using unconverted amount",
                    measure.name
                ),
                WarningSeverity::Medium,
            );
        }
        return;
    };

    for measure in measures {
        let Some(conversion) = &measure.conversion else {
            continue;
        };
        let call = currency_call(ctx, &udf, measure, conversion, qualifier);
        let item = format!("{} AS {}", call, quote_identifier(&measure.name));
        let quoted = quote_identifier(&measure.name);
        let suffix = format!(" AS {}", quoted);
        match items.iter().position(|i| *i == quoted || i.ends_with(&suffix)) {
            Some(index) => items[index] = item,
            None => items.push(item),
        }
        debug!("Measure {} converted through {}", measure.name, udf);
    }
}

fn currency_call(
    ctx: &RenderContext,
    udf: &str,
    measure: &Measure,
    conversion: &CurrencyConversion,
    qualifier: Option<&str>,
) -> String {
    let column = measure.column_name.as_deref().unwrap_or(&measure.name);
    let source = conversion
        .source_currency
        .as_deref()
        .or(measure.currency_attribute.as_deref());
    let target = conversion
        .target_currency
        .as_deref()
        .or(measure.fixed_currency.as_deref());
    let date = match conversion.reference_date.as_deref().map(str::trim) {
        Some(d) if d.len() == 8 && d.bytes().all(|b| b.is_ascii_digit()) => {
            render_literal(ctx.engine, d, Some(&DataTypeSpec::date()))
        }
        Some(d) if !d.is_empty() => currency_operand(d, qualifier),
        _ => "CURRENT_DATE".to_string(),
    };
    let schema = conversion
        .schema
        .as_deref()
        .or(ctx.config.currency.schema.as_deref())
        .filter(|s| !s.trim().is_empty());
    let function = match schema {
        Some(schema) => format!("{}.{}", schema, udf),
        None => udf.to_string(),
    };
    format!(
        "{}({}, {}, {}, {}, '{}', '{}')",
        function,
        render_column(column, qualifier),
        source.map(|s| currency_operand(s, qualifier)).unwrap_or_else(|| "NULL".to_string()),
        target.map(|t| currency_operand(t, qualifier)).unwrap_or_else(|| "NULL".to_string()),
        date,
        conversion.rate_type.as_deref().unwrap_or("M").replace('\'', "''"),
        conversion.client.as_deref().unwrap_or(&ctx.client).replace('\'', "''")
    )
}

/// ISO codes and quoted values are literals; anything else names a column.
fn currency_operand(value: &str, qualifier: Option<&str>) -> String {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        return format!("'{}'", inner.replace('\'', "''"));
    }
    if value.len() == 3 && value.bytes().all(|b| b.is_ascii_uppercase()) {
        return format!("'{}'", value);
    }
    render_column(value.trim_matches('"'), qualifier)
}
