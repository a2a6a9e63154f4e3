//! Modern `Calculation:scenario` documents.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{TransformationError, TransformationResult};
use crate::model::{
    AggregationSpec, CalculatedAttribute, ColumnMapping, CurrencyConversion, DataSource, Expression,
    JoinCondition, LogicalAttribute, LogicalModel, Measure, Node, NodeKind, OrderBySpec, Predicate,
    Scenario, SortDirection, SourceType, Variable, DEFAULT_RANK_COLUMN,
};
use crate::resolver::clean_ref;

use super::type_inference::{infer_attribute_type, infer_literal_type, parse_type_spec};
use super::xml::XmlElement;
use super::{label_of, map_join_type, synthesize_entity_input};

const DEFAULT_SCENARIO_ID: &str = "SCENARIO";
const VIEW_FOLDERS: [&str; 3] = ["/calculationviews/", "/analyticviews/", "/attributeviews/"];

pub fn parse(root: &XmlElement) -> TransformationResult<Scenario> {
    let id = match root.attr("id") {
        Some(id) => id,
        None => {
            debug!("Calculation scenario without id, using {}", DEFAULT_SCENARIO_ID);
            DEFAULT_SCENARIO_ID
        }
    };
    let mut scenario = Scenario::new(id);
    scenario.metadata.description = label_of(root);
    scenario.metadata.default_client = root.attr("defaultClient").map(str::to_string);
    scenario.metadata.default_language = root.attr("defaultLanguage").map(str::to_string);

    for ds in root.path(&["dataSources", "DataSource"]) {
        if let Some(source) = parse_data_source(ds) {
            if !scenario.add_data_source(source) {
                debug!("Duplicate data source {:?} ignored", ds.attr("id"));
            }
        }
    }
    for variable in root.path(&["localVariables", "variable"]) {
        if let Some(v) = parse_variable(variable) {
            scenario.variables.push(v);
        }
    }
    for view in root.path(&["calculationViews", "calculationView"]) {
        let node = parse_calculation_view(&mut scenario, view)?;
        scenario.add_node(node)?;
    }
    if let Some(logical) = root.child("logicalModel") {
        scenario.logical_model = Some(parse_logical_model(logical));
    }
    debug!(
        "Parsed scenario {}: {} nodes, {} data sources, {} variables",
        scenario.id(),
        scenario.nodes.len(),
        scenario.data_sources.len(),
        scenario.variables.len()
    );
    Ok(scenario)
}

fn map_source_type(value: Option<&str>) -> SourceType {
    match value.unwrap_or("DATA_BASE_TABLE").trim().to_uppercase().as_str() {
        "DATA_BASE_TABLE" => SourceType::Table,
        "CALCULATION_VIEW" => SourceType::CalculationView,
        _ => SourceType::View,
    }
}

/// Repository path of a `resourceUri`, without view-type folders or the leading `/`.
pub fn object_from_resource_uri(uri: &str) -> String {
    let mut object = uri.trim().to_string();
    for folder in VIEW_FOLDERS {
        object = object.replace(folder, "/");
    }
    object.trim_start_matches('/').to_string()
}

fn parse_data_source(element: &XmlElement) -> Option<DataSource> {
    let id = element.attr("id")?;
    let mut source_type = map_source_type(element.attr("type"));
    let column_object = element.child("columnObject");
    let schema = column_object.and_then(|c| c.attr("schemaName")).unwrap_or("");
    let mut object = column_object
        .and_then(|c| c.attr("columnObjectName"))
        .unwrap_or("")
        .to_string();

    let resource_uri = element
        .child("resourceUri")
        .and_then(|r| r.trimmed_text().or_else(|| r.attr("xlink:href")))
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    if let Some(uri) = &resource_uri {
        object = object_from_resource_uri(uri);
    }
    if source_type != SourceType::CalculationView && object.rsplit('/').next().unwrap_or("").starts_with("CV_") {
        source_type = SourceType::CalculationView;
    }

    let mut source = DataSource::new(id, source_type, schema, &object);
    source.resource_uri = resource_uri;
    Some(source)
}

fn parse_variable(element: &XmlElement) -> Option<Variable> {
    let id = element.attr("id")?;
    let mut variable = Variable::new(id);
    variable.description = label_of(element);
    if let Some(props) = element.child("variableProperties") {
        variable.data_type = parse_type_spec(
            props.attr("datatype"),
            props.attr("length"),
            props.attr("scale"),
            props.attr("precision"),
        );
        variable.default_value = props.attr("defaultValue").map(str::to_string);
        variable.mandatory = props.attr_flag("mandatory");
        if let Some(selection) = props.child("selection") {
            variable.selection_type = selection.attr("type").map(str::to_string);
            variable.multi_line = selection.attr_flag("multiLine");
        }
        variable.attribute_name = props
            .first(&["valueDomain", "attribute"])
            .and_then(|a| a.attr("name"))
            .map(str::to_string);
    }
    Some(variable)
}

/// Inputs of a view in order, plus the mappings each one carries.
struct InputMappings {
    source: String,
    mappings: BTreeMap<String, ColumnMapping>,
}

fn resolve_input(scenario: &mut Scenario, input: &XmlElement) -> Option<String> {
    if let Some(node) = input.attr("node").filter(|n| !n.trim().is_empty()) {
        return Some(clean_ref(node));
    }
    for child in ["viewNode", "dataSource"] {
        if let Some(reference) = input.child(child).and_then(|c| c.trimmed_text()) {
            return Some(clean_ref(reference));
        }
    }
    let entity = input.child("entity").and_then(|e| e.trimmed_text())?;
    Some(synthesize_entity_input(scenario, input, entity))
}

fn parse_calculation_view(scenario: &mut Scenario, element: &XmlElement) -> TransformationResult<Node> {
    let id = element.attr("id").ok_or_else(|| {
        TransformationError::parse_at("Calculation view without id", &element.name, element.position)
    })?;

    let mut inputs = Vec::new();
    let mut per_input = Vec::new();
    let mut mappings = Vec::new();
    for input in element.children("input") {
        let Some(source) = resolve_input(scenario, input) else {
            debug!("Input of {} has no resolvable reference", id);
            continue;
        };
        let mut collected = BTreeMap::new();
        for mapping in input.children("mapping") {
            let target = mapping.attr_any(&["target", "targetName"]);
            let source_column = mapping.attr_any(&["source", "sourceName"]);
            let (Some(target), Some(source_column)) = (target, source_column) else {
                continue;
            };
            let data_type = infer_attribute_type(target);
            let mut column = ColumnMapping::from_input(
                target,
                Expression::typed_column(source_column, Some(data_type.clone())),
                Some(source.clone()),
            );
            column.data_type = Some(data_type);
            collected.insert(target.to_string(), column.clone());
            mappings.push(column);
        }
        per_input.push(InputMappings {
            source: source.clone(),
            mappings: collected,
        });
        inputs.push(source);
    }

    let view_type = element.type_name();
    let kind = match view_type {
        t if t.ends_with("ProjectionView") => NodeKind::Projection,
        t if t.ends_with("JoinView") => NodeKind::Join {
            join_type: map_join_type(element.attr("joinType")).to_string(),
            conditions: build_join_conditions(&join_attributes(element), &per_input),
        },
        t if t.ends_with("AggregationView") => aggregation_kind(element),
        t if t.ends_with("UnionView") => NodeKind::Union { union_all: true },
        t if t.ends_with("RankView") => rank_kind(element),
        _ => NodeKind::Calculation,
    };
    debug!("Scenario node {} ({}) -> {}", id, view_type, kind);

    let mut node = Node::new(id, kind);
    node.inputs = inputs;
    node.mappings = mappings;
    node.description = label_of(element);
    node.filters = parse_filters(element);
    node.view_attributes = element
        .path(&["viewAttributes", "viewAttribute"])
        .into_iter()
        .filter(|a| !a.attr_flag("hidden"))
        .filter_map(|a| a.attr("id").map(str::to_string))
        .collect();
    node.output_attributes = node.view_attributes.clone();
    node.calculated_attributes = parse_calculated_attributes(element);
    if let Some(order) = element.attr("joinOrder") {
        node.properties.insert("joinOrder".to_string(), order.to_string());
    }
    if let Some(cardinality) = element.attr("cardinality") {
        node.properties.insert("cardinality".to_string(), cardinality.to_string());
    }
    Ok(node)
}

fn map_filter_operator(value: Option<&str>) -> String {
    let upper = value.unwrap_or("EQ").trim().to_uppercase();
    match upper.as_str() {
        "EQ" | "" => "=".to_string(),
        "NE" => "<>".to_string(),
        "GT" => ">".to_string(),
        "GE" => ">=".to_string(),
        "LT" => "<".to_string(),
        "LE" => "<=".to_string(),
        "CP" => "LIKE".to_string(),
        _ => upper,
    }
}

fn parse_filters(element: &XmlElement) -> Vec<Predicate> {
    let mut predicates = Vec::new();
    for attribute in element.path(&["viewAttributes", "viewAttribute"]) {
        let (Some(column), Some(filter)) = (attribute.attr("id"), attribute.child("filter")) else {
            continue;
        };
        let including = filter.attr("including").map(|v| !v.eq_ignore_ascii_case("false")).unwrap_or(true);
        let column_type = infer_attribute_type(column);
        let left = Expression::typed_column(column, Some(column_type.clone()));
        let literal = |value: &str| {
            Expression::literal(value, infer_literal_type(value).or_else(|| Some(column_type.clone())))
        };
        let operator = map_filter_operator(filter.attr("operator"));

        if operator == "BETWEEN" {
            if let (Some(low), Some(high)) = (filter.attr("lowValue"), filter.attr("highValue")) {
                predicates.push(Predicate::Between {
                    expr: left,
                    low: literal(low),
                    high: literal(high),
                    including,
                });
                continue;
            }
        }
        if let Some(value) = filter.attr("value") {
            predicates.push(Predicate::Comparison {
                left,
                operator,
                right: literal(value),
                including,
            });
            continue;
        }
        let operands: Vec<&XmlElement> = filter.descendants("operands");
        let values: Vec<Expression> = operands
            .iter()
            .filter_map(|o| o.attr("value"))
            .map(|v| Expression::literal(v, Some(column_type.clone())))
            .collect();
        if !values.is_empty() {
            predicates.push(Predicate::InList {
                expr: left,
                values,
                including,
            });
        } else if filter.attr_flag("isNull") || operator == "NL" {
            predicates.push(Predicate::IsNull { expr: left, including });
        } else {
            debug!("Filter on {} has no value, skipped", column);
        }
    }
    predicates
}

fn parse_calculated_attributes(element: &XmlElement) -> Vec<CalculatedAttribute> {
    element
        .path(&["calculatedViewAttributes", "calculatedViewAttribute"])
        .into_iter()
        .filter_map(|calc| {
            let id = calc.attr("id")?;
            let data_type = parse_type_spec(
                calc.attr("datatype"),
                calc.attr("length"),
                calc.attr("scale"),
                calc.attr("precision"),
            );
            let formula = calc.text_at(&["formula"]).unwrap_or_default();
            let language = calc.attr("expressionLanguage").map(str::to_string);
            Some(CalculatedAttribute {
                name: id.to_string(),
                expression: Expression::raw_with(&formula, language, data_type.clone()),
                data_type,
                hidden: calc.attr_flag("hidden"),
            })
        })
        .collect()
}

fn join_attributes(element: &XmlElement) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for attr in element.descendants("joinAttribute") {
        if let Some(name) = attr.attr("name") {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Find the mapping a join attribute refers to within one input.
fn resolve_join_mapping<'a>(
    name: &str,
    mappings: &'a BTreeMap<String, ColumnMapping>,
) -> Option<&'a ColumnMapping> {
    if let Some(m) = mappings.get(name) {
        return Some(m);
    }
    if name.contains('$') {
        let segments: Vec<&str> = name.split('$').filter(|s| !s.is_empty()).collect();
        for i in (1..=segments.len()).rev() {
            if let Some(m) = mappings.get(&segments[..i].join("$")) {
                return Some(m);
            }
        }
        for segment in segments.iter().rev() {
            if let Some(m) = mappings.get(*segment) {
                return Some(m);
            }
        }
    }
    if name.starts_with("JOIN$") {
        let once = name.replacen("JOIN$", "", 1);
        let all = name.replace("JOIN$", "");
        return mappings.get(&once).or_else(|| mappings.get(&all));
    }
    None
}

fn build_join_conditions(attributes: &[String], per_input: &[InputMappings]) -> Vec<JoinCondition> {
    let Some((left, rest)) = per_input.split_first() else {
        return Vec::new();
    };
    let mut conditions = Vec::new();
    for (index, right) in rest.iter().enumerate() {
        for name in attributes {
            let (Some(l), Some(r)) = (
                resolve_join_mapping(name, &left.mappings),
                resolve_join_mapping(name, &right.mappings),
            ) else {
                debug!("Join attribute {} not mapped on both sides", name);
                continue;
            };
            let (Some(left_column), Some(right_column)) = (l.source_column(), r.source_column()) else {
                continue;
            };
            let mut condition = JoinCondition::equals(left_column, right_column);
            if index > 0 {
                condition.right_input = Some(right.source.clone());
            }
            conditions.push(condition);
        }
    }
    conditions
}

fn aggregation_kind(element: &XmlElement) -> NodeKind {
    let mut group_by = Vec::new();
    let mut aggregations = Vec::new();
    for attribute in element.path(&["viewAttributes", "viewAttribute"]) {
        let Some(id) = attribute.attr("id") else { continue };
        match attribute.attr("aggregationType").filter(|a| !a.trim().is_empty()) {
            Some(function) => {
                let data_type = infer_attribute_type(id);
                aggregations.push(AggregationSpec {
                    target_name: id.to_string(),
                    function: function.trim().to_uppercase(),
                    expression: Expression::typed_column(id, Some(data_type.clone())),
                    data_type: Some(data_type),
                });
            }
            None => group_by.push(id.to_string()),
        }
    }
    NodeKind::Aggregation {
        group_by,
        aggregations,
    }
}

fn rank_column_of(element: &XmlElement, attribute: &str, child: &str) -> Option<String> {
    element
        .attr(attribute)
        .or_else(|| element.child(child).and_then(|c| c.trimmed_text()))
        .map(clean_ref)
        .map(|r| r.rsplit('/').next().unwrap_or(&r).trim().to_string())
        .filter(|r| !r.is_empty())
}

fn rank_kind(element: &XmlElement) -> NodeKind {
    let window = element.child("windowFunction").unwrap_or(element);
    let mut partition_by = Vec::new();
    for partition in window
        .children("partitionViewAttributeName")
        .chain(window.children("partitionElement"))
    {
        if let Some(text) = partition.trimmed_text() {
            let cleaned = clean_ref(text);
            partition_by.push(cleaned.rsplit('/').next().unwrap_or(&cleaned).to_string());
        }
    }
    let order_by = window
        .children("order")
        .filter_map(|o| {
            let column = o
                .attr_any(&["byViewAttributeName", "byElement"])
                .map(clean_ref)
                .map(|c| c.rsplit('/').next().unwrap_or(&c).to_string())?;
            Some(OrderBySpec {
                column,
                direction: SortDirection::from_str(o.attr("direction").unwrap_or("ASC")),
            })
        })
        .collect();
    let rank_column = rank_column_of(window, "rankViewAttributeName", "rankViewAttributeName")
        .or_else(|| rank_column_of(window, "rankElement", "rankElement"))
        .unwrap_or_else(|| DEFAULT_RANK_COLUMN.to_string());
    let threshold = window.child("rankThreshold").and_then(|t| {
        t.attr("value")
            .map(str::to_string)
            .or_else(|| t.text_at(&["constantValue"]))
            .or_else(|| t.text_at(&["value"]))
            .and_then(|v| v.trim().parse::<u64>().ok())
    });
    NodeKind::Rank {
        partition_by,
        order_by,
        rank_column,
        threshold,
    }
}

fn parse_logical_model(element: &XmlElement) -> LogicalModel {
    let id = element.attr("id").map(clean_ref).unwrap_or_default();
    let mut model = LogicalModel {
        base_node_id: Some(id.clone()).filter(|b| !b.is_empty()),
        id,
        ..Default::default()
    };

    for attribute in element.path(&["attributes", "attribute"]) {
        let Some(name) = attribute.attr("id") else { continue };
        let key_mapping = attribute.child("keyMapping");
        model.attributes.push(LogicalAttribute {
            name: name.to_string(),
            column_name: key_mapping.and_then(|k| k.attr("columnName")).map(str::to_string),
            schema_name: key_mapping.and_then(|k| k.attr("schemaName")).map(str::to_string),
            column_object: key_mapping.and_then(|k| k.attr("columnObjectName")).map(str::to_string),
            order: attribute.attr("order").and_then(|o| o.parse().ok()),
            key: attribute.attr_flag("key"),
            hidden: attribute.attr_flag("hidden"),
            semantic_type: attribute.attr("semanticType").map(str::to_string),
            description: label_of(attribute),
        });
    }

    for calc in element.path(&["calculatedAttributes", "calculatedAttribute"]) {
        let Some(name) = calc.attr("id") else { continue };
        let formula = calc
            .text_at(&["keyCalculation", "formula"])
            .or_else(|| calc.text_at(&["expression"]))
            .or_else(|| calc.text_at(&["formula"]))
            .unwrap_or_default();
        let typed = calc.child("keyCalculation").unwrap_or(calc);
        let data_type = parse_type_spec(
            typed.attr("datatype"),
            typed.attr("length"),
            typed.attr("scale"),
            typed.attr("precision"),
        );
        model.calculated_attributes.push(CalculatedAttribute {
            name: name.to_string(),
            expression: Expression::raw_with(&formula, None, data_type.clone()),
            data_type,
            hidden: calc.attr_flag("hidden"),
        });
    }

    for measure in element.path(&["baseMeasures", "measure"]) {
        if let Some(m) = parse_measure(measure, false) {
            model.measures.push(m);
        }
    }
    for measure in element.path(&["calculatedMeasures", "calculatedMeasure"]) {
        if let Some(m) = parse_measure(measure, true) {
            model.measures.push(m);
        }
    }
    model
}

fn parse_measure(element: &XmlElement, calculated: bool) -> Option<Measure> {
    let mut measure = Measure::new(element.attr("id")?);
    measure.description = label_of(element);
    measure.aggregation = element.attr("aggregationType").map(str::to_string);
    measure.column_name = element
        .attr_any(&["columnName", "sourceColumn"])
        .map(str::to_string)
        .or_else(|| element.child("measureMapping").and_then(|m| m.attr("columnName")).map(str::to_string));
    measure.measure_type = element.attr("measureType").map(str::to_string);
    measure.data_type = parse_type_spec(
        element.attr("datatype"),
        element.attr("length"),
        element.attr("scale"),
        element.attr("precision"),
    );
    if calculated {
        measure.formula = element
            .text_at(&["expression"])
            .or_else(|| element.text_at(&["formula"]))
            .or_else(|| element.text_at(&["calculation"]));
    }
    measure.currency_attribute = element.attr("currency").map(str::to_string);
    measure.fixed_currency = element.attr("fixedCurrency").map(str::to_string);
    measure.conversion = element.child("currencyConversion").map(|c| {
        let field = |name: &str| {
            c.attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| c.text_at(&[name]))
        };
        CurrencyConversion {
            source_currency: field("sourceCurrency"),
            target_currency: field("targetCurrency"),
            reference_date: field("referenceDate"),
            rate_type: field("rateType"),
            client: field("client"),
            schema: field("schema"),
        }
    });
    Some(measure)
}
