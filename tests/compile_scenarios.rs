mod common;

use common::{input, mapping, projection, transformer, view_attributes, ScenarioXml};
use cvt::{
    CalcViewTransformer, Dialect, TransformationConfig, TransformationError, WarningSeverity, XmlFormat,
};
use pretty_assertions::assert_eq;

fn paren_depth_ok(sql: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[test]
fn test_simple_projection_compiles_without_warnings() {
    let xml = ScenarioXml::new("CV_SIMPLE")
        .table("S_T", "S", "T")
        .view(&projection("Projection_1", "S_T", &["A"]))
        .logical_model("Projection_1", &["A"])
        .build();

    let compiled = transformer(Dialect::Snowflake).transform(xml.as_bytes()).unwrap();

    assert!(compiled.warnings.is_empty(), "unexpected warnings: {:?}", compiled.warnings);
    assert_eq!(compiled.scenario_id, "CV_SIMPLE");
    assert_eq!(compiled.format, XmlFormat::CalculationScenario);
    assert_eq!(
        compiled.sql,
        "WITH\n  projection_1 AS (\n    SELECT\n        \"A\" AS \"A\"\n    FROM \"S\".\"T\"\n  )\n\nSELECT \"A\" FROM projection_1"
    );
}

#[test]
fn test_join_without_conditions_warns_once() {
    let join = format!(
        r#"    <calculationView xsi:type="Calculation:JoinView" id="Join_1">{}{}{}</calculationView>"#,
        view_attributes(&["ORDER_ID", "NAME"]),
        input("ORDERS", &[("ORDER_ID", "ID")]),
        input("CUSTOMERS", &[("NAME", "NAME")]),
    );
    let xml = ScenarioXml::new("CV_CROSS")
        .table("ORDERS", "SALES", "ORDERS")
        .table("CUSTOMERS", "SALES", "CUSTOMERS")
        .view(&join)
        .logical_model("Join_1", &["ORDER_ID", "NAME"])
        .build();

    let compiled = transformer(Dialect::Snowflake).transform(xml.as_bytes()).unwrap();

    let cartesian: Vec<_> = compiled
        .warnings
        .iter()
        .filter(|w| w.message.contains("cartesian"))
        .collect();
    assert_eq!(compiled.warnings.len(), 1);
    assert_eq!(cartesian.len(), 1);
    assert_eq!(cartesian[0].severity, WarningSeverity::High);
    assert!(compiled.sql.contains("INNER JOIN \"SALES\".\"CUSTOMERS\" AS customers ON 1=1"));
    assert!(compiled.sql.contains("orders.\"ID\" AS \"ORDER_ID\""));
    assert!(compiled.validation.has_code("CARTESIAN_PRODUCT"));
}

#[test]
fn test_join_with_attribute_renders_condition() {
    let join = format!(
        r#"    <calculationView xsi:type="Calculation:JoinView" id="Join_1" joinType="leftOuter">{}{}{}<joinAttribute name="CUST"/></calculationView>"#,
        view_attributes(&["CUST", "NAME"]),
        input("ORDERS", &[("CUST", "CUST_ID")]),
        input("CUSTOMERS", &[("CUST", "ID"), ("NAME", "NAME")]),
    );
    let xml = ScenarioXml::new("CV_JOIN")
        .table("ORDERS", "SALES", "ORDERS")
        .table("CUSTOMERS", "SALES", "CUSTOMERS")
        .view(&join)
        .logical_model("Join_1", &["CUST", "NAME"])
        .build();

    let compiled = transformer(Dialect::Snowflake).transform(xml.as_bytes()).unwrap();

    assert!(compiled.warnings.is_empty(), "{:?}", compiled.warnings);
    assert!(compiled
        .sql
        .contains("LEFT OUTER JOIN \"SALES\".\"CUSTOMERS\" AS customers ON orders.\"CUST_ID\" = customers.\"ID\""));
}

#[test]
fn test_rank_threshold_wraps_query() {
    let rank = format!(
        r#"    <calculationView xsi:type="Calculation:RankView" id="Rank_1">{}
      <windowFunction>
        <partitionViewAttributeName>REGION</partitionViewAttributeName>
        <order byViewAttributeName="AMOUNT" direction="DESC"/>
        <rankThreshold><constantValue>10</constantValue></rankThreshold>
      </windowFunction>
    </calculationView>"#,
        input("SALES", &[("REGION", "REGION"), ("AMOUNT", "AMOUNT")]),
    );
    let xml = ScenarioXml::new("CV_TOP10")
        .table("SALES", "DWH", "SALES")
        .view(&rank)
        .logical_model("Rank_1", &["REGION", "AMOUNT"])
        .build();

    let compiled = transformer(Dialect::Snowflake).transform(xml.as_bytes()).unwrap();

    assert!(compiled.sql.contains("SELECT * FROM ("));
    assert!(compiled.sql.contains(
        "ROW_NUMBER() OVER (PARTITION BY \"REGION\" ORDER BY \"AMOUNT\" DESC) AS \"RANK_COLUMN\""
    ));
    assert!(compiled.sql.contains(") AS ranked\n    WHERE \"RANK_COLUMN\" <= 10"));
}

#[test]
fn test_unresolved_parameter_clause_is_dropped() {
    let xml = r##"<?xml version="1.0" encoding="UTF-8"?>
<View:ColumnView xmlns:View="http://www.sap.com/ndb/ViewModelView.ecore"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" name="CV_PLANT" defaultNode="#Projection_1">
  <parameter name="IP_WERKS" mandatory="false">
    <inlineType primitiveType="NVARCHAR" length="4"/>
  </parameter>
  <viewNode xsi:type="View:Projection" name="Projection_1">
    <element name="MANDT"/>
    <element name="WERKS"/>
    <input>
      <entity>#//"SAPABAP1".T001W</entity>
      <mapping xsi:type="View:ElementMapping" targetName="MANDT" sourceName="MANDT"/>
      <mapping xsi:type="View:ElementMapping" targetName="WERKS" sourceName="WERKS"/>
    </input>
    <filterExpression language="SQL"><formula>"MANDT" = '100' AND ('$$IP_WERKS$$' = '' OR "WERKS" = '$$IP_WERKS$$')</formula></filterExpression>
  </viewNode>
</View:ColumnView>"##;

    let compiled = transformer(Dialect::Hana).transform(xml.as_bytes()).unwrap();

    assert_eq!(compiled.format, XmlFormat::ColumnView);
    let where_line = compiled
        .sql
        .lines()
        .find(|l| l.trim_start().starts_with("WHERE"))
        .expect("filter rendered");
    assert!(where_line.contains("\"MANDT\" = '100'"), "{}", where_line);
    assert!(!where_line.contains("WERKS"), "{}", where_line);
    assert!(!compiled.sql.contains("$$IP_"));
    assert!(paren_depth_ok(where_line), "{}", where_line);
    assert!(paren_depth_ok(&compiled.sql));
}

#[test]
fn test_aggregation_groups_and_sums() {
    let aggregation = format!(
        r#"    <calculationView xsi:type="Calculation:AggregationView" id="Aggregation_1">
      <viewAttributes>
        <viewAttribute id="BUKRS"/>
        <viewAttribute id="WRBTR" aggregationType="sum"/>
      </viewAttributes>
      {}
    </calculationView>"#,
        input("BSEG", &[("BUKRS", "BUKRS"), ("WRBTR", "WRBTR")]),
    );
    let xml = ScenarioXml::new("CV_AGG")
        .table("BSEG", "SAPABAP1", "BSEG")
        .view(&aggregation)
        .logical_model("Aggregation_1", &["BUKRS", "WRBTR"])
        .build();

    let compiled = transformer(Dialect::Snowflake).transform(xml.as_bytes()).unwrap();

    assert!(compiled.sql.contains("SUM(\"WRBTR\") AS \"WRBTR\""));
    assert!(compiled.sql.contains("GROUP BY \"BUKRS\""));
    assert!(!compiled.sql.contains("\"WRBTR\" AS \"WRBTR\",\n"));
}

#[test]
fn test_union_pads_missing_columns() {
    let union = format!(
        r##"    <calculationView xsi:type="Calculation:UnionView" id="Union_1">{}
      <input node="#PLAN">{}{}</input>
      <input node="#ACTUAL">{}</input>
    </calculationView>"##,
        view_attributes(&["YEAR", "PLAN_AMOUNT"]),
        mapping("YEAR", "GJAHR"),
        mapping("PLAN_AMOUNT", "AMOUNT"),
        mapping("YEAR", "GJAHR"),
    );
    let xml = ScenarioXml::new("CV_UNION")
        .table("PLAN", "FI", "PLAN")
        .table("ACTUAL", "FI", "ACTUAL")
        .view(&union)
        .logical_model("Union_1", &["YEAR", "PLAN_AMOUNT"])
        .build();

    let compiled = transformer(Dialect::Snowflake).transform(xml.as_bytes()).unwrap();

    assert!(compiled.sql.contains("UNION ALL"));
    assert!(compiled.sql.contains("CAST(NULL AS "), "{}", compiled.sql);
    assert!(compiled.sql.contains("\"GJAHR\" AS \"YEAR\""));
    assert!(compiled.sql.contains("FROM \"FI\".\"PLAN\""));
}

#[test]
fn test_hana_view_over_calculation_view_source() {
    let xml = r##"<?xml version="1.0" encoding="UTF-8"?>
<Calculation:scenario xmlns:Calculation="http://www.sap.com/ndb/BiModelCalculation.ecore" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" id="CV_WRAPPER">
  <dataSources>
    <DataSource id="CV_BASE" type="CALCULATION_VIEW">
      <resourceUri>/finance.core/calculationviews/CV_BASE</resourceUri>
    </DataSource>
  </dataSources>
  <calculationViews>
    <calculationView xsi:type="Calculation:ProjectionView" id="Projection_1">
      <viewAttributes><viewAttribute id="KUNNR"/></viewAttributes>
      <input node="#CV_BASE"><mapping xsi:type="Calculation:AttributeMapping" target="KUNNR" source="KUNNR"/></input>
    </calculationView>
  </calculationViews>
  <logicalModel id="Projection_1"/>
</Calculation:scenario>"##;

    let transformer = CalcViewTransformer::builder()
        .with_dialect(Dialect::Hana)
        .with_view_name("CV_WRAPPER_MIG")
        .build()
        .unwrap();
    let compiled = transformer.transform(xml.as_bytes()).unwrap();

    assert!(compiled.sql.contains("CREATE VIEW \"CV_WRAPPER_MIG\" AS"));
    assert!(compiled.sql.contains("\"_SYS_BIC\".\"finance.core/CV_BASE\""), "{}", compiled.sql);
    assert!(compiled.warnings.is_empty(), "{:?}", compiled.warnings);
}

#[test]
fn test_unknown_root_is_parse_error() {
    let err = transformer(Dialect::Snowflake)
        .transform(b"<Report id=\"R\"/>")
        .unwrap_err();
    match err {
        TransformationError::ParseError { message, .. } => assert!(message.contains("Unknown XML format")),
        other => panic!("unexpected error {other}"),
    }
}

fn correction_config(validate: bool, auto_correct: bool) -> TransformationConfig {
    let mut config = TransformationConfig::default();
    config.output.validate = validate;
    config.output.auto_correct = auto_correct;
    config.correction.reserved_keywords = vec!["projection_1".to_string()];
    config
}

#[test]
fn test_auto_correct_runs_without_validation() {
    common::init_test_env();
    let xml = ScenarioXml::new("CV_SIMPLE")
        .table("S_T", "S", "T")
        .view(&projection("Projection_1", "S_T", &["A"]))
        .logical_model("Projection_1", &["A"])
        .build();

    for validate in [true, false] {
        let transformer = CalcViewTransformer::new(correction_config(validate, true), Dialect::Hana).unwrap();
        let compiled = transformer.transform(xml.as_bytes()).unwrap();
        assert_eq!(compiled.corrections.len(), 1, "validate={}", validate);
        assert_eq!(compiled.corrections[0].issue_code, "RESERVED_KEYWORD_AS_IDENTIFIER");
        assert!(compiled.sql.contains("WITH\n  \"projection_1\" AS ("), "{}", compiled.sql);
        assert!(compiled.sql.ends_with("FROM \"projection_1\""), "{}", compiled.sql);
        if !validate {
            assert_eq!(compiled.validation.issues().count(), 0);
        }
    }

    let transformer = CalcViewTransformer::new(correction_config(false, false), Dialect::Hana).unwrap();
    let compiled = transformer.transform(xml.as_bytes()).unwrap();
    assert!(compiled.corrections.is_empty());
    assert!(compiled.sql.ends_with("SELECT \"A\" FROM projection_1"));
}
