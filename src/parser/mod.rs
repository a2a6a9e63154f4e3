//! Calculation-view XML parsing.
//!
//! [`parse_scenario`] detects which of the two XML schemas a document uses and
//! hands the element tree to the matching sub-parser. Both produce the same
//! [`Scenario`] IR.

pub mod column_view;
pub mod detector;
pub mod scenario;
pub mod type_inference;
pub mod xml;

use log::debug;

use crate::error::TransformationResult;
use crate::model::{
    ColumnMapping, DataSource, Expression, HanaVersion, Node, NodeKind, Scenario, SourceType, XmlFormat,
};
use crate::resolver::clean_ref;

use self::xml::XmlElement;

/// A parsed document together with what detection learned about it.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub scenario: Scenario,
    pub format: XmlFormat,
    pub version_hint: Option<HanaVersion>,
}

pub fn parse_scenario(bytes: &[u8]) -> TransformationResult<ParsedDocument> {
    let root = xml::parse_document(bytes)?;
    let format = detector::detect_format(&root)?;
    let version_hint = detector::detect_version_hint(&root);
    debug!("Detected {} document (version hint {:?})", format, version_hint);

    let scenario = match format {
        XmlFormat::ColumnView => column_view::parse(&root)?,
        XmlFormat::CalculationScenario => scenario::parse(&root)?,
    };
    Ok(ParsedDocument {
        scenario,
        format,
        version_hint,
    })
}

/// `endUserTexts@label`, falling back to `descriptions@defaultDescription`.
pub(crate) fn label_of(element: &XmlElement) -> Option<String> {
    element
        .child("endUserTexts")
        .and_then(|e| e.attr("label"))
        .or_else(|| element.child("descriptions").and_then(|e| e.attr("defaultDescription")))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Schema and object named by an `entity` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub schema: Option<String>,
    pub object: String,
    /// Written in the `package::VIEW` repository form.
    pub repository: bool,
}

impl EntityRef {
    pub fn is_calculation_view(&self) -> bool {
        self.repository || self.object.starts_with("CV_")
    }
}

pub fn parse_entity(text: &str) -> EntityRef {
    let cleaned = clean_ref(text);
    let cleaned = cleaned.trim();

    if !cleaned.starts_with('"') {
        if let Some((package, view)) = cleaned.split_once("::") {
            return EntityRef {
                schema: Some(package.to_string()).filter(|p| !p.is_empty()),
                object: view.replace('"', ""),
                repository: true,
            };
        }
    }

    let (schema, object) = if let Some(rest) = cleaned.strip_prefix('"') {
        match rest.find('"') {
            Some(end) => {
                let schema = &rest[..end];
                let remainder = rest[end + 1..].strip_prefix('.').unwrap_or(&rest[end + 1..]);
                (Some(schema.to_string()), remainder.to_string())
            }
            None => (None, rest.to_string()),
        }
    } else {
        match cleaned.split_once('.') {
            Some((schema, object)) => (Some(schema.to_string()), object.to_string()),
            None => (None, cleaned.to_string()),
        }
    };
    EntityRef {
        schema: schema.filter(|s| !s.is_empty()),
        object: object.replace('"', ""),
        repository: false,
    }
}

/// Lowercase alias with every non-alphanumeric character replaced by `_`.
pub(crate) fn normalize_alias(value: &str) -> String {
    let alias: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if alias.is_empty() {
        "table".to_string()
    } else {
        alias
    }
}

/// Register a data source plus pass-through projection for an inline `entity` input.
///
/// Returns the projection id the consuming node should read from.
pub(crate) fn synthesize_entity_input(scenario: &mut Scenario, input: &XmlElement, entity_text: &str) -> String {
    let entity = parse_entity(entity_text);
    let alias = input
        .attr("alias")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| normalize_alias(&entity.object));

    let ds_id = format!("_synthetic_ds_{}", alias);
    let proj_id = format!("_synthetic_proj_{}", alias);
    let source_type = if entity.is_calculation_view() {
        SourceType::CalculationView
    } else {
        SourceType::Table
    };
    scenario.add_data_source(DataSource::new(
        &ds_id,
        source_type,
        entity.schema.as_deref().unwrap_or(""),
        &entity.object,
    ));

    if scenario.node(&proj_id).is_none() {
        let mut projection = Node::new(&proj_id, NodeKind::Projection).with_input(&ds_id);
        for mapping in input.children("mapping") {
            if let Some(source) = mapping.attr_any(&["sourceName", "source"]) {
                if projection.mappings.iter().any(|m| m.target_name == source) {
                    continue;
                }
                projection.mappings.push(ColumnMapping::from_input(
                    source,
                    Expression::column(source),
                    Some(ds_id.clone()),
                ));
            }
        }
        debug!(
            "Synthesized projection {} over {} ({} columns)",
            proj_id,
            entity.object,
            projection.mappings.len()
        );
        // ids carry a reserved prefix, so a clash means the same entity alias twice
        if let Err(e) = scenario.add_node(projection) {
            debug!("Synthetic projection not added: {}", e);
        }
    }
    proj_id
}

/// Canonical SQL join keyword for a calculation-view join type.
pub(crate) fn map_join_type(value: Option<&str>) -> &'static str {
    match value
        .unwrap_or("inner")
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
        .as_str()
    {
        "leftouter" | "left_outer" | "left" => "LEFT OUTER",
        "rightouter" | "right_outer" | "right" => "RIGHT OUTER",
        "fullouter" | "full_outer" | "full" => "FULL OUTER",
        "referential" | "textjoin" | "text_join" | "inner" => "INNER",
        other => {
            debug!("Unknown join type {}, assuming INNER", other);
            "INNER"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_forms() {
        assert_eq!(
            parse_entity("#//Macabi_BI.Eligibility::CV_MD_EYPOSPER"),
            EntityRef {
                schema: Some("Macabi_BI.Eligibility".to_string()),
                object: "CV_MD_EYPOSPER".to_string(),
                repository: true,
            }
        );
        let quoted = parse_entity("\"SAPABAP1\"./BIC/AZSALES\"");
        assert_eq!(quoted.schema.as_deref(), Some("SAPABAP1"));
        assert_eq!(quoted.object, "/BIC/AZSALES");

        let dotted = parse_entity("#/0/SAPABAP1.MARA");
        assert_eq!(dotted.schema.as_deref(), Some("SAPABAP1"));
        assert_eq!(dotted.object, "MARA");
        assert!(!dotted.is_calculation_view());

        let bare = parse_entity("CV_SALES");
        assert_eq!(bare.schema, None);
        assert!(bare.is_calculation_view());
    }

    #[test]
    fn test_map_join_type() {
        assert_eq!(map_join_type(Some("leftOuter")), "LEFT OUTER");
        assert_eq!(map_join_type(Some("full_outer")), "FULL OUTER");
        assert_eq!(map_join_type(None), "INNER");
        assert_eq!(map_join_type(Some("mystery")), "INNER");
    }

    #[test]
    fn test_normalize_alias() {
        assert_eq!(normalize_alias("/BIC/AZSALES"), "_bic_azsales");
        assert_eq!(normalize_alias(""), "table");
    }

    #[test]
    fn test_unknown_root_is_parse_error() {
        let err = parse_scenario(b"<report/>").unwrap_err();
        assert!(err.to_string().contains("Unknown XML format"));
    }
}
