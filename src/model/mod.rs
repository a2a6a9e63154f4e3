//! Intermediate representation of a calculation view.
//!
//! The parsers build a [`Scenario`] once; every later phase only reads it.

pub mod types;

pub use types::{DataTypeSpec, HanaVersion, TargetType, XmlFormat};

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{TransformationError, TransformationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Table,
    View,
    CalculationView,
    Unknown,
}

impl SourceType {
    pub fn name(&self) -> &'static str {
        match self {
            SourceType::Table => "TABLE",
            SourceType::View => "VIEW",
            SourceType::CalculationView => "CALCULATION_VIEW",
            SourceType::Unknown => "UNKNOWN",
        }
    }
}

/// Leaf reference to a physical table, a view or a nested calculation view.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub id: String,
    pub source_type: SourceType,
    pub schema_name: String,
    pub object_name: String,
    pub resource_uri: Option<String>,
}

impl DataSource {
    pub fn new(id: &str, source_type: SourceType, schema_name: &str, object_name: &str) -> Self {
        Self {
            id: id.to_string(),
            source_type,
            schema_name: schema_name.to_string(),
            object_name: object_name.to_string(),
            resource_uri: None,
        }
    }

    pub fn is_calculation_view(&self) -> bool {
        self.source_type == SourceType::CalculationView || self.object_name.starts_with("CV_")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub condition: Expression,
    pub result: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column {
        name: String,
        data_type: Option<DataTypeSpec>,
    },
    Literal {
        value: String,
        data_type: Option<DataTypeSpec>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
        data_type: Option<DataTypeSpec>,
    },
    Case {
        branches: Vec<CaseBranch>,
        otherwise: Option<Box<Expression>>,
        data_type: Option<DataTypeSpec>,
    },
    Raw {
        formula: String,
        language: Option<String>,
        data_type: Option<DataTypeSpec>,
    },
}

impl Expression {
    pub fn column(name: &str) -> Self {
        Expression::Column {
            name: name.to_string(),
            data_type: None,
        }
    }

    pub fn typed_column(name: &str, data_type: Option<DataTypeSpec>) -> Self {
        Expression::Column {
            name: name.to_string(),
            data_type,
        }
    }

    pub fn literal(value: &str, data_type: Option<DataTypeSpec>) -> Self {
        Expression::Literal {
            value: value.to_string(),
            data_type,
        }
    }

    pub fn raw(formula: &str) -> Self {
        Expression::Raw {
            formula: formula.to_string(),
            language: None,
            data_type: None,
        }
    }

    pub fn raw_with(formula: &str, language: Option<String>, data_type: Option<DataTypeSpec>) -> Self {
        Expression::Raw {
            formula: formula.to_string(),
            language,
            data_type,
        }
    }

    pub fn function(name: &str, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.to_string(),
            args,
            data_type: None,
        }
    }

    pub fn null() -> Self {
        Expression::raw("NULL")
    }

    pub fn data_type(&self) -> Option<&DataTypeSpec> {
        match self {
            Expression::Column { data_type, .. }
            | Expression::Literal { data_type, .. }
            | Expression::Function { data_type, .. }
            | Expression::Case { data_type, .. }
            | Expression::Raw { data_type, .. } => data_type.as_ref(),
        }
    }

    /// Column name when the expression is a plain column reference.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Expression::Column { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Operator inversion used for `including="false"` filters.
pub fn negate_operator(operator: &str) -> String {
    let upper = operator.trim().to_uppercase();
    let negated = match upper.as_str() {
        "=" => "<>",
        "<>" | "!=" => "=",
        ">" => "<=",
        "<=" => ">",
        ">=" => "<",
        "<" => ">=",
        "IN" => "NOT IN",
        "NOT IN" => "IN",
        "LIKE" => "NOT LIKE",
        "NOT LIKE" => "LIKE",
        "BETWEEN" => "NOT BETWEEN",
        "NOT BETWEEN" => "BETWEEN",
        "IS NULL" => "IS NOT NULL",
        "IS NOT NULL" => "IS NULL",
        _ => return format!("NOT {}", upper),
    };
    negated.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        left: Expression,
        operator: String,
        right: Expression,
        including: bool,
    },
    Between {
        expr: Expression,
        low: Expression,
        high: Expression,
        including: bool,
    },
    InList {
        expr: Expression,
        values: Vec<Expression>,
        including: bool,
    },
    IsNull {
        expr: Expression,
        including: bool,
    },
    Raw {
        formula: String,
        language: Option<String>,
    },
}

impl Predicate {
    pub fn raw(formula: &str) -> Self {
        Predicate::Raw {
            formula: formula.to_string(),
            language: None,
        }
    }

    /// Column names the predicate reads, for structured predicates only.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let exprs: Vec<&Expression> = match self {
            Predicate::Comparison { left, right, .. } => vec![left, right],
            Predicate::Between { expr, .. }
            | Predicate::InList { expr, .. }
            | Predicate::IsNull { expr, .. } => vec![expr],
            Predicate::Raw { .. } => Vec::new(),
        };
        exprs.into_iter().filter_map(|e| e.column_name()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub target_name: String,
    pub expression: Expression,
    pub source_node: Option<String>,
    pub data_type: Option<DataTypeSpec>,
}

impl ColumnMapping {
    pub fn new(target_name: &str, expression: Expression) -> Self {
        Self {
            target_name: target_name.to_string(),
            expression,
            source_node: None,
            data_type: None,
        }
    }

    pub fn from_input(target_name: &str, expression: Expression, source_node: Option<String>) -> Self {
        Self {
            target_name: target_name.to_string(),
            expression,
            source_node,
            data_type: None,
        }
    }

    /// Source column name when the mapping is a plain rename.
    pub fn source_column(&self) -> Option<&str> {
        self.expression.column_name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedAttribute {
    pub name: String,
    pub expression: Expression,
    pub data_type: Option<DataTypeSpec>,
    pub hidden: bool,
}

/// Equality between a column of the first join input and a column of a later one.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    pub left: String,
    pub right: String,
    pub operator: String,
    /// Input the right column belongs to; `None` means the second input.
    pub right_input: Option<String>,
}

impl JoinCondition {
    pub fn equals(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
            operator: "=".to_string(),
            right_input: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSpec {
    pub target_name: String,
    pub function: String,
    pub expression: Expression,
    pub data_type: Option<DataTypeSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn from_str(s: &str) -> SortDirection {
        if s.trim().to_uppercase().starts_with("DESC") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBySpec {
    pub column: String,
    pub direction: SortDirection,
}

pub const DEFAULT_RANK_COLUMN: &str = "RANK_COLUMN";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Projection,
    Calculation,
    Join {
        join_type: String,
        conditions: Vec<JoinCondition>,
    },
    Aggregation {
        group_by: Vec<String>,
        aggregations: Vec<AggregationSpec>,
    },
    Union {
        union_all: bool,
    },
    Rank {
        partition_by: Vec<String>,
        order_by: Vec<OrderBySpec>,
        rank_column: String,
        threshold: Option<u64>,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Projection => "PROJECTION",
            NodeKind::Calculation => "CALCULATION",
            NodeKind::Join { .. } => "JOIN",
            NodeKind::Aggregation { .. } => "AGGREGATION",
            NodeKind::Union { .. } => "UNION",
            NodeKind::Rank { .. } => "RANK",
        }
    }

    pub fn join(join_type: &str) -> Self {
        NodeKind::Join {
            join_type: join_type.to_string(),
            conditions: Vec::new(),
        }
    }

    pub fn aggregation() -> Self {
        NodeKind::Aggregation {
            group_by: Vec::new(),
            aggregations: Vec::new(),
        }
    }

    pub fn rank() -> Self {
        NodeKind::Rank {
            partition_by: Vec::new(),
            order_by: Vec::new(),
            rank_column: DEFAULT_RANK_COLUMN.to_string(),
            threshold: None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub inputs: Vec<String>,
    pub mappings: Vec<ColumnMapping>,
    pub filters: Vec<Predicate>,
    pub view_attributes: Vec<String>,
    pub output_attributes: Vec<String>,
    pub calculated_attributes: Vec<CalculatedAttribute>,
    pub properties: BTreeMap<String, String>,
    pub description: Option<String>,
}

impl Node {
    pub fn new(id: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            inputs: Vec::new(),
            mappings: Vec::new(),
            filters: Vec::new(),
            view_attributes: Vec::new(),
            output_attributes: Vec::new(),
            calculated_attributes: Vec::new(),
            properties: BTreeMap::new(),
            description: None,
        }
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.inputs.push(input.to_string());
        self
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn calculated(&self, name: &str) -> Option<&CalculatedAttribute> {
        self.calculated_attributes.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurrencyConversion {
    pub source_currency: Option<String>,
    pub target_currency: Option<String>,
    pub reference_date: Option<String>,
    pub rate_type: Option<String>,
    pub client: Option<String>,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub name: String,
    pub aggregation: Option<String>,
    pub column_name: Option<String>,
    pub measure_type: Option<String>,
    pub formula: Option<String>,
    pub data_type: Option<DataTypeSpec>,
    pub currency_attribute: Option<String>,
    pub fixed_currency: Option<String>,
    pub conversion: Option<CurrencyConversion>,
    pub description: Option<String>,
}

impl Measure {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            aggregation: None,
            column_name: None,
            measure_type: None,
            formula: None,
            data_type: None,
            currency_attribute: None,
            fixed_currency: None,
            conversion: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogicalAttribute {
    pub name: String,
    pub column_name: Option<String>,
    pub schema_name: Option<String>,
    pub column_object: Option<String>,
    pub order: Option<u32>,
    pub key: bool,
    pub hidden: bool,
    pub semantic_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogicalModel {
    pub id: String,
    pub base_node_id: Option<String>,
    pub attributes: Vec<LogicalAttribute>,
    pub calculated_attributes: Vec<CalculatedAttribute>,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: String,
    pub description: Option<String>,
    pub data_type: Option<DataTypeSpec>,
    pub mandatory: bool,
    pub default_value: Option<String>,
    pub selection_type: Option<String>,
    pub multi_line: bool,
    pub attribute_name: Option<String>,
}

impl Variable {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            description: None,
            data_type: None,
            mandatory: false,
            default_value: None,
            selection_type: None,
            multi_line: false,
            attribute_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScenarioMetadata {
    pub id: String,
    pub description: Option<String>,
    pub default_client: Option<String>,
    pub default_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scenario {
    pub metadata: ScenarioMetadata,
    pub data_sources: Vec<DataSource>,
    pub nodes: Vec<Node>,
    pub variables: Vec<Variable>,
    pub logical_model: Option<LogicalModel>,
}

impl Scenario {
    pub fn new(id: &str) -> Self {
        Self {
            metadata: ScenarioMetadata {
                id: id.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn data_source(&self, id: &str) -> Option<&DataSource> {
        self.data_sources.iter().find(|ds| ds.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.data_source(id).is_some() || self.node(id).is_some()
    }

    /// Register a node, rejecting a second node with the same id.
    pub fn add_node(&mut self, node: Node) -> TransformationResult<()> {
        if self.node(&node.id).is_some() {
            return Err(TransformationError::parse(
                &format!("duplicate node id {}", node.id),
                "node",
            ));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Register a data source; a repeated id keeps the first definition.
    pub fn add_data_source(&mut self, source: DataSource) -> bool {
        if self.data_source(&source.id).is_some() {
            return false;
        }
        self.data_sources.push(source);
        true
    }

    pub fn measures(&self) -> &[Measure] {
        self.logical_model
            .as_ref()
            .map(|m| m.measures.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_operator_involution() {
        for op in ["=", "<>", ">", "<=", ">=", "<", "IN", "NOT IN", "LIKE", "NOT LIKE", "BETWEEN"] {
            assert_eq!(negate_operator(&negate_operator(op)), op, "operator {op}");
        }
        assert_eq!(negate_operator("="), "<>");
        assert_eq!(negate_operator("!="), "=");
        assert_eq!(negate_operator("CONTAINS"), "NOT CONTAINS");
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut scenario = Scenario::new("CV_TEST");
        scenario.add_node(Node::new("P1", NodeKind::Projection)).unwrap();
        let err = scenario
            .add_node(Node::new("P1", NodeKind::Calculation))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node id P1"));
    }

    #[test]
    fn test_duplicate_data_source_keeps_first() {
        let mut scenario = Scenario::new("CV_TEST");
        assert!(scenario.add_data_source(DataSource::new("T", SourceType::Table, "S", "T")));
        assert!(!scenario.add_data_source(DataSource::new("T", SourceType::View, "X", "Y")));
        assert_eq!(scenario.data_source("T").unwrap().schema_name, "S");
    }

    #[test]
    fn test_predicate_referenced_columns() {
        let predicate = Predicate::Comparison {
            left: Expression::column("BUKRS"),
            operator: "=".to_string(),
            right: Expression::literal("1000", None),
            including: true,
        };
        assert_eq!(predicate.referenced_columns(), vec!["BUKRS"]);
        assert!(Predicate::raw("\"A\" = 1").referenced_columns().is_empty());
    }
}
