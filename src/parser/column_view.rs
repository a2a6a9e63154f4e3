//! Legacy `ColumnView` documents: flat `viewNode` elements with typed `element` columns.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{TransformationError, TransformationResult};
use crate::model::{
    AggregationSpec, CalculatedAttribute, ColumnMapping, DataTypeSpec, Expression, JoinCondition,
    LogicalModel, Node, NodeKind, OrderBySpec, Predicate, Scenario, SortDirection, Variable,
    DEFAULT_RANK_COLUMN,
};
use crate::resolver::clean_ref;

use super::type_inference::parse_type_spec;
use super::xml::XmlElement;
use super::{label_of, map_join_type, synthesize_entity_input};

const DEFAULT_VIEW_ID: &str = "COLUMN_VIEW";

#[derive(Debug, Clone)]
struct ElementInfo {
    name: String,
    data_type: Option<DataTypeSpec>,
    formula: Option<String>,
    language: Option<String>,
    aggregation: Option<String>,
}

pub fn parse(root: &XmlElement) -> TransformationResult<Scenario> {
    let id = match root.attr_any(&["name", "id"]) {
        Some(id) => id.to_string(),
        None => {
            debug!("ColumnView without name, using {}", DEFAULT_VIEW_ID);
            DEFAULT_VIEW_ID.to_string()
        }
    };
    let mut scenario = Scenario::new(&id);
    scenario.metadata.description = label_of(root);

    for parameter in root.children("parameter") {
        if let Some(variable) = parse_parameter(parameter) {
            scenario.variables.push(variable);
        }
    }

    for view_node in root.children("viewNode") {
        let node = parse_view_node(&mut scenario, view_node)?;
        scenario.add_node(node)?;
    }

    if let Some(default_node) = root.attr("defaultNode").map(clean_ref).filter(|d| !d.is_empty()) {
        scenario.logical_model = Some(LogicalModel {
            id: default_node.clone(),
            base_node_id: Some(default_node),
            ..Default::default()
        });
    }
    debug!(
        "Parsed ColumnView {}: {} nodes, {} data sources, {} parameters",
        scenario.id(),
        scenario.nodes.len(),
        scenario.data_sources.len(),
        scenario.variables.len()
    );
    Ok(scenario)
}

fn parse_parameter(parameter: &XmlElement) -> Option<Variable> {
    let name = parameter.attr("name")?;
    let mut variable = Variable::new(name);
    variable.description = label_of(parameter);
    variable.data_type = parameter.child("inlineType").and_then(|t| {
        parse_type_spec(
            t.attr("primitiveType"),
            t.attr("length"),
            t.attr("scale"),
            t.attr("precision"),
        )
    });
    variable.default_value = parameter
        .child("defaultValue")
        .filter(|d| !d.is_nil())
        .and_then(|d| d.trimmed_text())
        .map(str::to_string);
    variable.mandatory = parameter.attr_flag("mandatory");
    let multiple = parameter.attr_flag("multipleSelections");
    variable.multi_line = multiple;
    variable.selection_type = Some(if multiple { "Multiple" } else { "Single" }.to_string());
    Some(variable)
}

fn parse_view_node(scenario: &mut Scenario, element: &XmlElement) -> TransformationResult<Node> {
    let id = element.attr_any(&["name", "id"]).ok_or_else(|| {
        TransformationError::parse_at("Encountered view node without identifier", &element.name, element.position)
    })?;
    let node_type = element.type_name().to_string();
    let elements = collect_elements(element);

    let kind = if node_type.ends_with("Projection") {
        NodeKind::Projection
    } else if node_type.ends_with("Aggregation") {
        aggregation_kind(&elements)
    } else if node_type.ends_with("Union") {
        NodeKind::Union { union_all: true }
    } else if node_type.ends_with("JoinNode") {
        join_kind(element)
    } else if node_type.ends_with("Rank") {
        rank_kind(element)
    } else {
        NodeKind::Calculation
    };
    debug!("ColumnView node {} ({}) -> {}", id, node_type, kind);

    let mut node = Node::new(id, kind);
    node.description = label_of(element);
    node.view_attributes = elements.iter().map(|e| e.name.clone()).collect();
    node.output_attributes = node.view_attributes.clone();
    node.calculated_attributes = elements
        .iter()
        .filter_map(|info| {
            let formula = info.formula.as_ref()?;
            Some(CalculatedAttribute {
                name: info.name.clone(),
                expression: Expression::raw_with(formula, info.language.clone(), info.data_type.clone()),
                data_type: info.data_type.clone(),
                hidden: false,
            })
        })
        .collect();

    if let Some(formula) = element.text_at(&["filterExpression", "formula"]) {
        let language = element.child("filterExpression").and_then(|f| f.attr("language"));
        node.filters.push(Predicate::Raw {
            formula,
            language: language.map(str::to_string),
        });
    }

    let types: BTreeMap<&str, Option<&DataTypeSpec>> = elements
        .iter()
        .map(|e| (e.name.as_str(), e.data_type.as_ref()))
        .collect();
    for input in element.children("input") {
        let source = resolve_input(scenario, input);
        if let Some(source) = &source {
            node.inputs.push(source.clone());
        }
        for mapping in input.children("mapping") {
            if let Some(m) = create_mapping(mapping, &types, source.clone()) {
                node.mappings.push(m);
            }
        }
    }
    Ok(node)
}

fn collect_elements(node: &XmlElement) -> Vec<ElementInfo> {
    node.children("element")
        .filter_map(|element| {
            let name = element.attr("name")?;
            let data_type = element.child("inlineType").and_then(|t| {
                parse_type_spec(
                    t.attr("primitiveType"),
                    t.attr("length"),
                    t.attr("scale"),
                    t.attr("precision"),
                )
            });
            let definition = element.child("calculationDefinition");
            Some(ElementInfo {
                name: name.to_string(),
                data_type,
                formula: definition.and_then(|d| d.text_at(&["formula"])),
                language: definition.and_then(|d| d.attr("language")).map(str::to_string),
                aggregation: element.attr("aggregationBehavior").map(str::to_string),
            })
        })
        .collect()
}

fn resolve_input(scenario: &mut Scenario, input: &XmlElement) -> Option<String> {
    if let Some(node) = input.attr("node").filter(|n| !n.trim().is_empty()) {
        return Some(clean_ref(node));
    }
    if let Some(view_node) = input.child("viewNode").and_then(|v| v.trimmed_text()) {
        return Some(clean_ref(view_node));
    }
    let entity = input.child("entity").and_then(|e| e.trimmed_text())?;
    Some(synthesize_entity_input(scenario, input, entity))
}

fn create_mapping(
    mapping: &XmlElement,
    types: &BTreeMap<&str, Option<&DataTypeSpec>>,
    source_node: Option<String>,
) -> Option<ColumnMapping> {
    let target = mapping.attr_any(&["targetName", "target"])?;
    let data_type = types.get(target).copied().flatten().cloned();
    let mapping_type = mapping.type_name();

    let expression = if mapping_type.ends_with("ConstantElementMapping") {
        if mapping.attr_flag("null") {
            Expression::raw_with("NULL", None, data_type.clone())
        } else {
            Expression::literal(mapping.attr("value").unwrap_or(""), data_type.clone())
        }
    } else if mapping_type.ends_with("ElementMapping") {
        let source = mapping.attr_any(&["sourceName", "source"])?;
        Expression::typed_column(source, data_type.clone())
    } else {
        debug!("Skipping mapping of type {:?} for {}", mapping_type, target);
        return None;
    };

    let mut column = ColumnMapping::from_input(target, expression, source_node);
    column.data_type = data_type;
    Some(column)
}

fn aggregation_kind(elements: &[ElementInfo]) -> NodeKind {
    let mut group_by = Vec::new();
    let mut aggregations = Vec::new();
    for info in elements {
        let behavior = info.aggregation.as_deref().unwrap_or("").trim().to_uppercase();
        if behavior.is_empty() || behavior == "NONE" {
            group_by.push(info.name.clone());
        } else {
            aggregations.push(AggregationSpec {
                target_name: info.name.clone(),
                function: behavior,
                expression: Expression::typed_column(&info.name, info.data_type.clone()),
                data_type: info.data_type.clone(),
            });
        }
    }
    NodeKind::Aggregation {
        group_by,
        aggregations,
    }
}

fn join_kind(element: &XmlElement) -> NodeKind {
    let Some(join) = element.child("join") else {
        return NodeKind::join("INNER");
    };
    let left = join.children("leftElementName").filter_map(|e| e.trimmed_text());
    let right = join.children("rightElementName").filter_map(|e| e.trimmed_text());
    NodeKind::Join {
        join_type: map_join_type(join.attr("joinType")).to_string(),
        conditions: left.zip(right).map(|(l, r)| JoinCondition::equals(l, r)).collect(),
    }
}

/// Last `/` segment of a cleaned element reference.
fn column_of(reference: &str) -> Option<String> {
    let cleaned = clean_ref(reference);
    let name = cleaned.rsplit('/').next().unwrap_or(&cleaned).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn rank_kind(element: &XmlElement) -> NodeKind {
    let Some(window) = element.child("windowFunction") else {
        return NodeKind::rank();
    };
    let partition_by = window
        .children("partitionElement")
        .filter_map(|p| p.trimmed_text().and_then(column_of))
        .collect();
    let order_by = window
        .children("order")
        .filter_map(|o| {
            let column = o.attr("byElement").and_then(column_of)?;
            Some(OrderBySpec {
                column,
                direction: SortDirection::from_str(o.attr("direction").unwrap_or("ASC")),
            })
        })
        .collect();
    let rank_column = window
        .child("rankElement")
        .and_then(|r| r.trimmed_text())
        .and_then(column_of)
        .unwrap_or_else(|| DEFAULT_RANK_COLUMN.to_string());
    let threshold = window
        .text_at(&["rankThreshold", "constantValue"])
        .and_then(|v| v.parse::<u64>().ok());
    NodeKind::Rank {
        partition_by,
        order_by,
        rank_column,
        threshold,
    }
}
