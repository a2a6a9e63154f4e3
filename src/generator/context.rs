//! Per-render state: CTE aliases, accumulated warnings and FROM resolution.

use std::collections::BTreeMap;

use log::warn;

use crate::config::TransformationConfig;
use crate::dialects::{Dialect, DialectTransformationEngine};
use crate::dialects::snowflake::is_reserved_keyword;
use crate::error::{SourceLocation, TransformationWarning, WarningSeverity};
use crate::model::{DataTypeSpec, Scenario};
use crate::resolver::clean_ref;
use crate::translator::FormulaContext;

use super::expressions::{quote_identifier, quote_qualified};
use super::packages::PackageLookup;

pub struct RenderContext<'a> {
    pub scenario: &'a Scenario,
    pub engine: &'a dyn DialectTransformationEngine,
    pub config: &'a TransformationConfig,
    pub packages: &'a dyn PackageLookup,
    pub client: String,
    pub language: String,
    aliases: BTreeMap<String, String>,
    pub warnings: Vec<TransformationWarning>,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        scenario: &'a Scenario,
        engine: &'a dyn DialectTransformationEngine,
        config: &'a TransformationConfig,
        packages: &'a dyn PackageLookup,
    ) -> Self {
        let client = pick_default(&config.defaults.client, scenario.metadata.default_client.as_deref(), "PROD");
        let language = pick_default(
            &config.defaults.language,
            scenario.metadata.default_language.as_deref(),
            "EN",
        );
        Self {
            scenario,
            engine,
            config,
            packages,
            client,
            language,
            aliases: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.engine.dialect()
    }

    pub fn formula_context<'b>(&'b self, result_type: Option<&'b DataTypeSpec>) -> FormulaContext<'b> {
        FormulaContext::new(&self.client, &self.language, self.engine.hana_version()).with_result_type(result_type)
    }

    pub fn warn(&mut self, message: &str, severity: WarningSeverity) {
        warn!("{}", message);
        self.warnings.push(TransformationWarning::new(message, severity));
    }

    pub fn warn_at(&mut self, node_id: &str, message: &str, severity: WarningSeverity) {
        warn!("{} ({})", message, node_id);
        self.warnings.push(TransformationWarning::with_location(
            message,
            severity,
            SourceLocation::node(node_id),
        ));
    }

    /// Stable CTE alias for a node or data-source id.
    pub fn alias(&mut self, id: &str) -> String {
        let key = clean_ref(id);
        if let Some(alias) = self.aliases.get(&key) {
            return alias.clone();
        }
        let base = cte_alias(&key);
        let mut alias = base.clone();
        let mut suffix = 2;
        while self.aliases.values().any(|a| a == &alias) {
            alias = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.aliases.insert(key, alias.clone());
        alias
    }

    pub fn has_alias(&self, id: &str) -> bool {
        self.aliases.contains_key(&clean_ref(id))
    }

    pub fn into_parts(self) -> (BTreeMap<String, String>, Vec<TransformationWarning>) {
        (self.aliases, self.warnings)
    }

    /// Table expression for an input: a qualified object or the CTE alias of a node.
    pub fn render_from(&mut self, input: &str) -> String {
        let id = clean_ref(input);
        let scenario = self.scenario;

        if let Some(ds) = scenario.data_source(&id) {
            if self.dialect() == Dialect::Hana && ds.is_calculation_view() {
                if ds.object_name.contains('/') {
                    return format!("\"_SYS_BIC\".{}", quote_identifier(&ds.object_name));
                }
                let package = if ds.schema_name.contains('.') {
                    Some(ds.schema_name.clone())
                } else {
                    self.packages.get_package(&ds.object_name)
                };
                return self.sys_bic_reference(&ds.object_name, package);
            }
            let schema = self.config.resolve_schema(&ds.schema_name);
            if schema.trim().is_empty() {
                return quote_identifier(&ds.object_name);
            }
            return format!("{}.{}", quote_qualified(&schema), quote_identifier(&ds.object_name));
        }

        if self.dialect() == Dialect::Hana && id.contains("CV_") {
            if let Some((package, view)) = id.rsplit_once("::") {
                let package = package.rsplit('/').next().unwrap_or(package).trim();
                return self.sys_bic_reference(view, Some(package.to_string()).filter(|p| !p.is_empty()));
            }
        }

        if scenario.node(&id).is_none() {
            self.warn(&format!("Input {} not found in scenario", id), WarningSeverity::High);
        }
        self.alias(&id)
    }

    fn sys_bic_reference(&mut self, view: &str, package: Option<String>) -> String {
        match package {
            Some(package) => format!("\"_SYS_BIC\".{}", quote_identifier(&format!("{}/{}", package, view))),
            None => {
                self.warn(
                    &format!("Package not found for CV {}, using _SYS_BIC without path", view),
                    WarningSeverity::Medium,
                );
                format!("\"_SYS_BIC\".{}", quote_identifier(view))
            }
        }
    }
}

fn pick_default(configured: &str, scenario: Option<&str>, fallback: &str) -> String {
    [Some(configured), scenario]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// SQL-safe alias derived from a cleaned id.
pub fn cte_alias(id: &str) -> String {
    let mut alias: String = clean_ref(id)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' { c } else { '_' })
        .collect();
    if alias.is_empty() {
        alias = "node".to_string();
    }
    if alias.starts_with(|c: char| c.is_ascii_digit()) {
        alias = format!("n_{}", alias);
    }
    if is_reserved_keyword(&alias) {
        alias.push_str("_node");
    }
    alias
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::engine_for;
    use crate::generator::packages::{NoPackages, PackageMapper};
    use crate::model::{DataSource, HanaVersion, Node, NodeKind, SourceType};
    use std::collections::HashMap;

    #[test]
    fn test_cte_alias_rules() {
        assert_eq!(cte_alias("#/0/Projection_1"), "projection_1");
        assert_eq!(cte_alias("Star Join/Agg-2"), "star_join_agg_2");
        assert_eq!(cte_alias("1st"), "n_1st");
        assert_eq!(cte_alias("Union"), "union_node");
        assert_eq!(cte_alias("#"), "node");
    }

    fn scenario() -> Scenario {
        let mut scenario = Scenario::new("CV_TEST");
        scenario.add_data_source(DataSource::new("ds", SourceType::Table, "SAPABAP1", "MARA"));
        scenario.add_data_source(DataSource::new("cv", SourceType::CalculationView, "", "CV_STOCK"));
        scenario.add_data_source(DataSource::new(
            "cv_pkg",
            SourceType::CalculationView,
            "Macabi_BI.Eligibility",
            "CV_ELIG",
        ));
        scenario.add_node(Node::new("Projection_1", NodeKind::Projection)).unwrap();
        scenario
    }

    #[test]
    fn test_alias_collisions_get_suffix() {
        let scenario = scenario();
        let engine = engine_for(Dialect::Snowflake, HanaVersion::V2).unwrap();
        let config = TransformationConfig::default();
        let mut ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &NoPackages);
        assert_eq!(ctx.alias("Projection_1"), "projection_1");
        assert_eq!(ctx.alias("#Projection_1"), "projection_1");
        assert_eq!(ctx.alias("projection 1"), "projection_1_2");
    }

    #[test]
    fn test_render_from_tables_and_nodes() {
        let scenario = scenario();
        let engine = engine_for(Dialect::Snowflake, HanaVersion::V2).unwrap();
        let mut config = TransformationConfig::default();
        config.schema.overrides.insert("SAPABAP1".to_string(), "RAW.SAP".to_string());
        let mut ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &NoPackages);
        assert_eq!(ctx.render_from("#ds"), "\"RAW\".\"SAP\".\"MARA\"");
        assert_eq!(ctx.render_from("cv"), "\"CV_STOCK\"");
        assert_eq!(ctx.render_from("#/0/Projection_1"), "projection_1");
        assert!(ctx.warnings.is_empty());

        assert_eq!(ctx.render_from("Missing"), "missing");
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[test]
    fn test_render_from_hana_calculation_views() {
        let scenario = scenario();
        let engine = engine_for(Dialect::Hana, HanaVersion::V2).unwrap();
        let config = TransformationConfig::default();
        let mapper = PackageMapper::new(HashMap::from([("CV_STOCK".to_string(), "logistics.core".to_string())]));

        let mut ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &mapper);
        assert_eq!(ctx.render_from("cv"), "\"_SYS_BIC\".\"logistics.core/CV_STOCK\"");
        assert_eq!(ctx.render_from("cv_pkg"), "\"_SYS_BIC\".\"Macabi_BI.Eligibility/CV_ELIG\"");
        assert_eq!(
            ctx.render_from("#/0/Sales.Reporting::CV_REVENUE"),
            "\"_SYS_BIC\".\"Sales.Reporting/CV_REVENUE\""
        );
        assert!(ctx.warnings.is_empty());

        // A package path alone does not make an input an external view.
        assert_eq!(ctx.render_from("Sales.Reporting::Projection_1"), "sales_reporting__projection_1");
        assert_eq!(ctx.warnings.len(), 1);
        assert!(ctx.warnings[0].message.contains("not found in scenario"));

        let mut ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &NoPackages);
        assert_eq!(ctx.render_from("cv"), "\"_SYS_BIC\".\"CV_STOCK\"");
        assert!(ctx.warnings[0].message.contains("Package not found for CV CV_STOCK"));
    }

    #[test]
    fn test_defaults_prefer_configuration() {
        let mut scenario = scenario();
        scenario.metadata.default_client = Some("200".to_string());
        let engine = engine_for(Dialect::Snowflake, HanaVersion::V2).unwrap();
        let mut config = TransformationConfig::default();
        config.defaults.client = String::new();
        let ctx = RenderContext::new(&scenario, engine.as_ref(), &config, &NoPackages);
        assert_eq!(ctx.client, "200");
        assert_eq!(ctx.language, "EN");
    }
}
