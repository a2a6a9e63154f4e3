//! CTE bodies for each node kind.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::error::WarningSeverity;
use crate::model::{AggregationSpec, Expression, JoinCondition, Node, NodeKind, OrderBySpec};
use crate::resolver::clean_ref;

use super::context::RenderContext;
use super::expressions::{
    expand_references, finish_where, qualify_identifiers, quote_identifier, quoted_identifiers, render_column,
    render_expression, render_filters, rewrite_identifiers, translate,
};

pub(crate) const PLACEHOLDER_SELECT: &str = "SELECT 1 AS placeholder";

const SELECT_SEPARATOR: &str = ",\n    ";

pub fn render_node(ctx: &mut RenderContext, node: &Node) -> String {
    debug!("Rendering {} node {}", node.kind, node.id);
    match &node.kind {
        NodeKind::Projection | NodeKind::Calculation => render_projection(ctx, node),
        NodeKind::Join {
            join_type,
            conditions,
        } => render_join(ctx, node, join_type, conditions),
        NodeKind::Aggregation {
            group_by,
            aggregations,
        } => render_aggregation(ctx, node, group_by, aggregations),
        NodeKind::Union { union_all } => render_union(ctx, node, *union_all),
        NodeKind::Rank {
            partition_by,
            order_by,
            rank_column,
            threshold,
        } => render_rank(ctx, node, partition_by, order_by, rank_column, *threshold),
    }
}

fn label(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Projection => "Projection",
        NodeKind::Calculation => "Calculation",
        NodeKind::Join { .. } => "Join",
        NodeKind::Aggregation { .. } => "Aggregation",
        NodeKind::Union { .. } => "Union",
        NodeKind::Rank { .. } => "Rank",
    }
}

pub(crate) fn indent(sql: &str, prefix: &str) -> String {
    sql.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_input(ctx: &mut RenderContext, node: &Node) -> Option<String> {
    match node.inputs.first() {
        Some(input) => Some(clean_ref(input)),
        None => {
            ctx.warn_at(
                &node.id,
                &format!("{} {} has no inputs", label(&node.kind), node.id),
                WarningSeverity::High,
            );
            None
        }
    }
}

fn cleaned_inputs(ctx: &mut RenderContext, node: &Node) -> Option<Vec<String>> {
    let inputs: Vec<String> = node.inputs.iter().map(|i| clean_ref(i)).collect();
    if inputs.len() < 2 {
        ctx.warn_at(
            &node.id,
            &format!("{} {} has fewer than 2 inputs", label(&node.kind), node.id),
            WarningSeverity::High,
        );
        return None;
    }
    Some(inputs)
}

/// Render calculated attributes in declaration order.
///
/// Raw formulas have earlier calculated columns and `base` definitions substituted for
/// their `"NAME"` references. `raw_alias` then qualifies what is left; `column_alias`
/// qualifies structured expressions.
fn render_calculated(
    ctx: &RenderContext,
    node: &Node,
    base: &BTreeMap<String, String>,
    raw_alias: Option<&str>,
    column_alias: Option<&str>,
) -> Vec<(String, String)> {
    let mut definitions = base.clone();
    let mut rendered = Vec::with_capacity(node.calculated_attributes.len());
    for calc in &node.calculated_attributes {
        let sql = match &calc.expression {
            Expression::Raw {
                formula, data_type, ..
            } => {
                let mut expanded = expand_references(formula, &definitions);
                if let Some(alias) = raw_alias {
                    expanded = qualify_identifiers(&expanded, alias);
                }
                let translated = translate(ctx, &expanded, calc.data_type.as_ref().or(data_type.as_ref()));
                if translated.is_empty() {
                    "NULL".to_string()
                } else {
                    translated
                }
            }
            other => render_expression(ctx, other, column_alias),
        };
        definitions.insert(calc.name.to_uppercase(), format!("({})", sql));
        rendered.push((calc.name.clone(), sql));
    }
    rendered
}

fn select_item(expr: &str, name: &str) -> String {
    format!("{} AS {}", expr, quote_identifier(name))
}

fn render_projection(ctx: &mut RenderContext, node: &Node) -> String {
    let Some(input) = first_input(ctx, node) else {
        return PLACEHOLDER_SELECT.to_string();
    };
    let from = ctx.render_from(&input);

    let mut columns = Vec::new();
    let mut mapped = BTreeMap::new();
    for mapping in &node.mappings {
        let expr = render_expression(ctx, &mapping.expression, None);
        columns.push(select_item(&expr, &mapping.target_name));
        mapped.insert(mapping.target_name.to_uppercase(), expr);
    }
    for (name, expr) in render_calculated(ctx, node, &mapped, None, None) {
        columns.push(select_item(&expr, &name));
    }
    if columns.is_empty() {
        columns.push("*".to_string());
    }

    let where_clause = render_filters(ctx, &node.filters, None);
    let calculated: HashSet<String> = node
        .calculated_attributes
        .iter()
        .map(|c| c.name.to_uppercase())
        .collect();
    let reads_calculated = where_clause
        .as_deref()
        .map(|w| quoted_identifiers(w).iter().any(|id| calculated.contains(&id.to_uppercase())))
        .unwrap_or(false);

    if reads_calculated {
        let qualified = where_clause
            .as_deref()
            .and_then(|w| finish_where(ctx, &qualify_identifiers(w, "calc")));
        let inner = format!(
            "SELECT * FROM (\n  SELECT\n      {}\n  FROM {}\n) AS calc",
            columns.join(",\n      "),
            from
        );
        return match qualified {
            Some(w) => format!("{}\nWHERE {}", inner, w),
            None => inner,
        };
    }

    // The WHERE clause sees input columns, so projected names are replaced by their sources.
    let renames: BTreeMap<String, String> = node
        .mappings
        .iter()
        .filter_map(|m| {
            let source = mapped.get(&m.target_name.to_uppercase())?;
            (source != &quote_identifier(&m.target_name)).then(|| (m.target_name.to_uppercase(), source.clone()))
        })
        .collect();
    let mut sql = format!("SELECT\n    {}\nFROM {}", columns.join(SELECT_SEPARATOR), from);
    if let Some(w) = where_clause {
        let renamed = if renames.is_empty() {
            w
        } else {
            rewrite_identifiers(&w, |name| renames.get(&name.to_uppercase()).cloned())
        };
        sql.push_str(&format!("\nWHERE {}", renamed));
    }
    sql
}

fn render_join(ctx: &mut RenderContext, node: &Node, join_type: &str, conditions: &[JoinCondition]) -> String {
    let Some(inputs) = cleaned_inputs(ctx, node) else {
        return PLACEHOLDER_SELECT.to_string();
    };
    let left = &inputs[0];
    let left_from = ctx.render_from(left);
    let left_alias = ctx.alias(left);

    let mut join_clauses = Vec::new();
    let mut aliases = vec![left_alias.clone()];
    for (index, right) in inputs.iter().enumerate().skip(1) {
        let right_from = ctx.render_from(right);
        let right_alias = ctx.alias(right);
        let on: Vec<String> = conditions
            .iter()
            .filter(|c| match &c.right_input {
                Some(r) => clean_ref(r) == *right,
                None => index == 1,
            })
            .map(|c| {
                format!(
                    "{} {} {}",
                    render_column(&c.left, Some(&left_alias)),
                    c.operator,
                    render_column(&c.right, Some(&right_alias))
                )
            })
            .collect();
        let on = if on.is_empty() {
            ctx.warn_at(
                &node.id,
                &format!("Join {} creates cartesian product (no join conditions)", node.id),
                WarningSeverity::High,
            );
            "1=1".to_string()
        } else {
            on.join(" AND ")
        };
        join_clauses.push(format!("{} JOIN {} AS {} ON {}", join_type, right_from, right_alias, on));
        aliases.push(right_alias);
    }

    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    let mut mapped = BTreeMap::new();
    for mapping in &node.mappings {
        if !node.view_attributes.is_empty() && !node.view_attributes.contains(&mapping.target_name) {
            continue;
        }
        if !seen.insert(mapping.target_name.clone()) {
            continue;
        }
        let source_alias = mapping
            .source_node
            .as_deref()
            .map(clean_ref)
            .filter(|s| inputs.contains(s))
            .map(|s| ctx.alias(&s))
            .unwrap_or_else(|| left_alias.clone());
        let expr = render_expression(ctx, &mapping.expression, Some(&source_alias));
        columns.push(select_item(&expr, &mapping.target_name));
        mapped.insert(mapping.target_name.to_uppercase(), format!("({})", expr));
    }
    for (name, expr) in render_calculated(ctx, node, &mapped, None, Some(&left_alias)) {
        columns.push(select_item(&expr, &name));
    }
    if columns.is_empty() {
        columns = aliases.iter().map(|a| format!("{}.*", a)).collect();
    }

    let mut sql = format!(
        "SELECT\n    {}\nFROM {} AS {}\n{}",
        columns.join(SELECT_SEPARATOR),
        left_from,
        left_alias,
        join_clauses.join("\n")
    );
    if let Some(w) = render_filters(ctx, &node.filters, Some(&left_alias)) {
        sql.push_str(&format!("\nWHERE {}", w));
    }
    sql
}

fn aggregate_call(function: &str, expr: &str) -> String {
    let normalized = function.trim().to_uppercase().replace(' ', "_");
    match normalized.as_str() {
        "COUNT_DISTINCT" | "COUNTDISTINCT" => format!("COUNT(DISTINCT {})", expr),
        "" => format!("SUM({})", expr),
        other => format!("{}({})", other, expr),
    }
}

fn render_aggregation(
    ctx: &mut RenderContext,
    node: &Node,
    group_by: &[String],
    aggregations: &[AggregationSpec],
) -> String {
    let Some(input) = first_input(ctx, node) else {
        return PLACEHOLDER_SELECT.to_string();
    };
    let from = ctx.render_from(&input);

    let calculated: HashSet<String> = node
        .calculated_attributes
        .iter()
        .map(|c| c.name.to_uppercase())
        .collect();
    let aggregated: HashSet<String> = aggregations.iter().map(|a| a.target_name.to_uppercase()).collect();
    let by_target: BTreeMap<String, &Expression> = node
        .mappings
        .iter()
        .map(|m| (m.target_name.to_uppercase(), &m.expression))
        .collect();

    let mut items = Vec::new();
    let mut selected = HashSet::new();
    for mapping in &node.mappings {
        let key = mapping.target_name.to_uppercase();
        if calculated.contains(&key) || aggregated.contains(&key) || !selected.insert(key) {
            continue;
        }
        let expr = render_expression(ctx, &mapping.expression, None);
        items.push(select_item(&expr, &mapping.target_name));
    }

    let mut group_exprs = Vec::new();
    for column in group_by {
        let key = column.to_uppercase();
        if calculated.contains(&key) || aggregated.contains(&key) {
            continue;
        }
        let expr = match by_target.get(&key) {
            Some(expr) => render_expression(ctx, expr, None),
            None => quote_identifier(column),
        };
        if selected.insert(key) {
            items.push(select_item(&expr, column));
        }
        if !group_exprs.contains(&expr) {
            group_exprs.push(expr);
        }
    }

    for spec in aggregations {
        let source = spec
            .expression
            .column_name()
            .and_then(|c| by_target.get(&c.to_uppercase()).copied())
            .unwrap_or(&spec.expression);
        let expr = render_expression(ctx, source, None);
        items.push(select_item(&aggregate_call(&spec.function, &expr), &spec.target_name));
    }
    if items.is_empty() {
        items.push("*".to_string());
    }

    let mut inner = format!("SELECT\n    {}\nFROM {}", items.join(SELECT_SEPARATOR), from);
    if let Some(w) = render_filters(ctx, &node.filters, None) {
        inner.push_str(&format!("\nWHERE {}", w));
    }
    if !group_exprs.is_empty() {
        inner.push_str(&format!("\nGROUP BY {}", group_exprs.join(", ")));
    }

    if node.calculated_attributes.is_empty() {
        return inner;
    }
    let mut outer = vec!["agg_inner.*".to_string()];
    for (name, expr) in render_calculated(ctx, node, &BTreeMap::new(), Some("agg_inner"), Some("agg_inner")) {
        outer.push(select_item(&expr, &name));
    }
    format!(
        "SELECT\n    {}\nFROM (\n{}\n) AS agg_inner",
        outer.join(SELECT_SEPARATOR),
        indent(&inner, "  ")
    )
}

fn null_of_column(ctx: &RenderContext, node: &Node, column: &str) -> String {
    node.mappings
        .iter()
        .filter(|m| m.target_name == column)
        .find_map(|m| m.data_type.as_ref().or_else(|| m.expression.data_type()))
        .map(|t| format!("CAST(NULL AS {})", t.render(ctx.dialect())))
        .unwrap_or_else(|| "NULL".to_string())
}

fn render_union(ctx: &mut RenderContext, node: &Node, union_all: bool) -> String {
    let Some(inputs) = cleaned_inputs(ctx, node) else {
        return PLACEHOLDER_SELECT.to_string();
    };
    let mut targets: Vec<&str> = Vec::new();
    for mapping in &node.mappings {
        if !targets.contains(&mapping.target_name.as_str()) {
            targets.push(&mapping.target_name);
        }
    }

    let mut branches = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let from = ctx.render_from(input);
        let mappings: Vec<_> = node
            .mappings
            .iter()
            .filter(|m| m.source_node.as_deref().map(clean_ref).as_deref() == Some(input.as_str()))
            .collect();
        let select = if mappings.is_empty() || targets.is_empty() {
            debug!("Union {} input {} has no mappings, selecting all columns", node.id, input);
            "*".to_string()
        } else {
            targets
                .iter()
                .map(|target| match mappings.iter().find(|m| m.target_name == *target) {
                    Some(m) => select_item(&render_expression(ctx, &m.expression, None), target),
                    None => select_item(&null_of_column(ctx, node, target), target),
                })
                .collect::<Vec<_>>()
                .join(SELECT_SEPARATOR)
        };
        branches.push(format!("SELECT\n    {}\nFROM {}", select, from));
    }

    let keyword = if union_all { "UNION ALL" } else { "UNION" };
    let sql = branches.join(&format!("\n{}\n", keyword));
    match render_filters(ctx, &node.filters, None) {
        Some(w) => format!("SELECT * FROM (\n{}\n) AS union_result\nWHERE {}", sql, w),
        None => sql,
    }
}

fn render_rank(
    ctx: &mut RenderContext,
    node: &Node,
    partition_by: &[String],
    order_by: &[OrderBySpec],
    rank_column: &str,
    threshold: Option<u64>,
) -> String {
    let Some(input) = first_input(ctx, node) else {
        return PLACEHOLDER_SELECT.to_string();
    };
    let from = ctx.render_from(&input);

    let mut items: Vec<String> = node
        .mappings
        .iter()
        .map(|m| select_item(&render_expression(ctx, &m.expression, None), &m.target_name))
        .collect();
    if items.is_empty() {
        items.push(format!("{}.*", from));
    }

    let mut window = Vec::new();
    if !partition_by.is_empty() {
        let columns: Vec<String> = partition_by.iter().map(|c| quote_identifier(c)).collect();
        window.push(format!("PARTITION BY {}", columns.join(", ")));
    }
    let order: Vec<String> = order_by
        .iter()
        .map(|o| format!("{} {}", quote_identifier(&o.column), o.direction.keyword()))
        .collect();
    window.push(format!(
        "ORDER BY {}",
        if order.is_empty() { "1".to_string() } else { order.join(", ") }
    ));
    items.push(select_item(&format!("ROW_NUMBER() OVER ({})", window.join(" ")), rank_column));

    let mut sql = format!("SELECT\n    {}\nFROM {}", items.join(SELECT_SEPARATOR), from);
    if let Some(w) = render_filters(ctx, &node.filters, None) {
        sql.push_str(&format!("\nWHERE {}", w));
    }
    match threshold {
        Some(limit) => format!(
            "SELECT * FROM (\n{}\n) AS ranked\nWHERE {} <= {}",
            indent(&sql, "  "),
            quote_identifier(rank_column),
            limit
        ),
        None => sql,
    }
}
