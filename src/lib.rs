//! # Calculation View Transpiler
//!
//! This library compiles SAP HANA calculation-view XML into SQL for a target
//! dialect. Both the legacy column-view schema and the calculation-scenario
//! schema are understood; the output is a single `WITH ... SELECT` statement,
//! optionally wrapped in a view definition.
//!
//! ## Supported Dialects
//!
//! - **SAP HANA** - views over `_SYS_BIC`, HANA 1.0 through 2.0 SPS04
//! - **Snowflake** - the default target
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cvt::{CalcViewTransformer, Dialect, TransformationConfig};
//!
//! let xml = std::fs::read("CV_SALES.calculationview").unwrap();
//!
//! // Defaults: Snowflake, validation on, no view wrapper
//! let transformer = CalcViewTransformer::new(TransformationConfig::default(), Dialect::Snowflake).unwrap();
//! let compiled = transformer.transform(&xml).unwrap();
//! println!("{}", compiled.sql);
//!
//! // Builder pattern for custom configuration
//! let transformer = CalcViewTransformer::builder()
//!     .with_dialect(Dialect::Hana)
//!     .with_schema_mapping("SAPABAP1", "SAPHANADB")
//!     .with_view_name("_SYS_BIC.CV_SALES_MIGRATED")
//!     .with_auto_correct(true)
//!     .build()
//!     .unwrap();
//!
//! for warning in transformer.transform(&xml).unwrap().warnings {
//!     eprintln!("{}", warning);
//! }
//! ```

pub mod config;
pub mod dialects;
pub mod error;
pub mod generator;
pub mod model;
pub mod parser;
pub mod resolver;
pub mod rules;
pub mod translator;
pub mod utils;

pub use config::TransformationConfig;
pub use dialects::Dialect;
pub use error::{
    DetailedResult, EnhancedTransformationMetadata, PerformanceMetrics, SourceLocation, TransformationError,
    TransformationResult, TransformationWarning, WarningSeverity,
};
pub use generator::packages::{NoPackages, PackageLookup, PackageMapper};
pub use model::{HanaVersion, Scenario, XmlFormat};
pub use rules::RuleCatalogs;
pub use utils::correction::{AutoFixConfig, Correction};
pub use utils::validation::ValidationResult;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::generator::{RenderedSql, SqlRenderer};
use crate::parser::{detector, ParsedDocument};
use crate::utils::correction::AutoCorrector;
use crate::utils::validation::{SqlValidator, ValidationContext};

/// Result of compiling one calculation view.
#[derive(Debug, Clone)]
pub struct CompiledView {
    pub sql: String,
    pub warnings: Vec<TransformationWarning>,
    pub validation: ValidationResult,
    pub corrections: Vec<Correction>,
    pub format: XmlFormat,
    /// Newer of the version the document needs and the configured target.
    pub recommended_version: HanaVersion,
    pub scenario_id: String,
}

pub struct CalcViewTransformer {
    config: TransformationConfig,
    dialect: Dialect,
    engine: Box<dyn dialects::DialectTransformationEngine>,
    packages: Arc<dyn PackageLookup>,
}

impl CalcViewTransformer {
    pub fn new(config: TransformationConfig, dialect: Dialect) -> TransformationResult<Self> {
        Self::with_parts(config, dialect, RuleCatalogs::embedded()?, None)
    }

    fn with_parts(
        mut config: TransformationConfig,
        dialect: Dialect,
        catalogs: Arc<RuleCatalogs>,
        packages: Option<Arc<dyn PackageLookup>>,
    ) -> TransformationResult<Self> {
        config.target.dialect = dialect.name().to_string();
        config.validate()?;
        let engine = dialects::DialectEngineFactory::create_engine(dialect, &config, catalogs)?;
        let packages: Arc<dyn PackageLookup> = match (packages, &config.packages.mapping_file) {
            (Some(lookup), _) => lookup,
            (None, Some(file)) => Arc::new(PackageMapper::from_file(file)?),
            (None, None) => Arc::new(NoPackages),
        };
        debug!(
            "Transformer ready: {} (HANA {})",
            engine.name(),
            engine.hana_version()
        );
        Ok(Self {
            config,
            dialect,
            engine,
            packages,
        })
    }

    /// Transformer for the dialect named in the configuration.
    pub fn with_config(config: TransformationConfig) -> TransformationResult<Self> {
        let dialect = config.target.dialect()?;
        Self::new(config, dialect)
    }

    pub fn from_config_file<P: AsRef<Path>>(path: P) -> TransformationResult<Self> {
        Self::with_config(TransformationConfig::from_file(path)?)
    }

    pub fn from_environment() -> TransformationResult<Self> {
        Self::with_config(TransformationConfig::from_env()?)
    }

    pub fn builder() -> CalcViewTransformerBuilder {
        CalcViewTransformerBuilder::new()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn config(&self) -> &TransformationConfig {
        &self.config
    }

    /// Detect the XML schema and version hint without compiling.
    pub fn detect(&self, xml: &[u8]) -> TransformationResult<(XmlFormat, HanaVersion)> {
        let root = parser::xml::parse_document(xml)?;
        let format = detector::detect_format(&root)?;
        let hint = detector::detect_version_hint(&root);
        Ok((format, detector::recommended_version(hint, self.engine.hana_version())))
    }

    pub fn parse(&self, xml: &[u8]) -> TransformationResult<ParsedDocument> {
        parser::parse_scenario(xml)
    }

    /// Render SQL for an already parsed scenario, without validation.
    pub fn render(&self, scenario: &Scenario) -> RenderedSql {
        SqlRenderer::new(self.engine.as_ref(), &self.config, self.packages.as_ref()).render(scenario)
    }

    pub fn transform(&self, xml: &[u8]) -> TransformationResult<CompiledView> {
        let document = self.parse(xml)?;
        let rendered = self.render(&document.scenario);
        self.finish(document, rendered)
    }

    pub fn transform_batch(&self, documents: Vec<&[u8]>) -> Vec<TransformationResult<CompiledView>> {
        documents.into_iter().map(|xml| self.transform(xml)).collect()
    }

    pub fn transform_detailed(&self, xml: &[u8]) -> DetailedResult<CompiledView> {
        debug!("Detailed transformation");
        let start_time = Instant::now();
        let mut metrics = PerformanceMetrics::default();
        let mut applied = Vec::new();

        let document = match self.parse(xml) {
            Ok(document) => document,
            Err(e) => {
                metrics.parse_time_ms = start_time.elapsed().as_millis() as u64;
                metrics.total_time_ms = metrics.parse_time_ms;
                return detailed_failure(e, applied, metrics, "Parse error encountered");
            }
        };
        metrics.parse_time_ms = start_time.elapsed().as_millis() as u64;
        applied.push(format!("Parsed {} document", document.format));

        let render_start = Instant::now();
        let rendered = self.render(&document.scenario);
        metrics.render_time_ms = render_start.elapsed().as_millis() as u64;
        applied.push(format!("Rendered {} CTEs", rendered.cte_aliases.len()));

        let validate_start = Instant::now();
        let result = self.finish(document, rendered);
        metrics.validate_time_ms = validate_start.elapsed().as_millis() as u64;
        metrics.total_time_ms = start_time.elapsed().as_millis() as u64;

        info!("Completed in {}ms", metrics.total_time_ms);

        match result {
            Ok(compiled) => {
                if self.config.output.validate {
                    applied.push("Validated".to_string());
                }
                if !compiled.corrections.is_empty() {
                    applied.push(format!("Applied {} corrections", compiled.corrections.len()));
                }
                let warnings: Vec<String> = compiled
                    .warnings
                    .iter()
                    .map(|w| w.to_string())
                    .chain(compiled.validation.warnings.iter().map(|i| i.to_string()))
                    .collect();
                DetailedResult {
                    warnings: warnings.clone(),
                    metadata: Some(EnhancedTransformationMetadata {
                        transformations_applied: applied,
                        warnings,
                        performance_metrics: metrics,
                    }),
                    result: Ok(compiled),
                }
            }
            Err(e) => detailed_failure(e, applied, metrics, "Validation failed"),
        }
    }

    fn finish(&self, document: ParsedDocument, rendered: RenderedSql) -> TransformationResult<CompiledView> {
        let ParsedDocument {
            scenario,
            format,
            version_hint,
        } = document;
        let recommended_version = detector::recommended_version(version_hint, self.engine.hana_version());
        let RenderedSql {
            mut sql,
            warnings,
            cte_aliases,
            terminal,
        } = rendered;

        let mut validation = ValidationResult::new();
        let mut corrections = Vec::new();
        if self.config.output.validate {
            let validator = SqlValidator::new(self.engine.as_ref());
            let ctx = ValidationContext {
                scenario: &scenario,
                cte_aliases: &cte_aliases,
                terminal: terminal.as_deref(),
            };
            validation = validator.validate(&sql, &ctx);
        }

        // Corrections are pattern driven and do not need validation issues.
        if self.config.output.auto_correct {
            let corrector = AutoCorrector::new(self.dialect, self.config.correction.clone());
            let corrected = corrector.correct(&sql, &validation);
            if corrected.changed() {
                info!("Applied {} corrections to {}", corrected.corrections.len(), scenario.id());
                validation = validation.without_codes(&corrected.fixed_codes());
                sql = corrected.corrected_sql;
                corrections = corrected.corrections;
            }
        }

        if let Some(error) = validation.to_error() {
            return Err(error);
        }

        info!(
            "Compiled {} to {} ({} warnings)",
            scenario.id(),
            self.dialect,
            warnings.len()
        );
        Ok(CompiledView {
            sql,
            warnings,
            validation,
            corrections,
            format,
            recommended_version,
            scenario_id: scenario.id().to_string(),
        })
    }
}

fn detailed_failure(
    error: TransformationError,
    applied: Vec<String>,
    metrics: PerformanceMetrics,
    note: &str,
) -> DetailedResult<CompiledView> {
    let mut warnings = Vec::new();
    if let TransformationError::ValidationError { suggestions, .. } = &error {
        warnings.extend(suggestions.iter().map(|s| format!("Try: {}", s)));
    }
    DetailedResult {
        warnings: warnings.clone(),
        metadata: Some(EnhancedTransformationMetadata {
            transformations_applied: applied,
            warnings: vec![note.to_string()],
            performance_metrics: metrics,
        }),
        result: Err(error),
    }
}

pub struct CalcViewTransformerBuilder {
    config: TransformationConfig,
    dialect: Dialect,
    catalogs: Option<Arc<RuleCatalogs>>,
    packages: Option<Arc<dyn PackageLookup>>,
}

impl CalcViewTransformerBuilder {
    fn new() -> Self {
        Self {
            config: TransformationConfig::default(),
            dialect: Dialect::default(),
            catalogs: None,
            packages: None,
        }
    }

    /// Start from an existing configuration; its dialect becomes the default.
    pub fn with_config(mut self, config: TransformationConfig) -> Self {
        if let Ok(dialect) = config.target.dialect() {
            self.dialect = dialect;
        }
        self.config = config;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_hana_version(mut self, version: HanaVersion) -> Self {
        self.config.target.hana_version = version.name().to_string();
        self
    }

    pub fn with_schema_mapping(mut self, from: &str, to: &str) -> Self {
        self.config
            .schema
            .overrides
            .insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_target_schema(mut self, schema: &str) -> Self {
        self.config.schema.target_schema = Some(schema.to_string());
        self
    }

    pub fn with_client(mut self, client: &str) -> Self {
        self.config.defaults.client = client.to_string();
        self
    }

    /// Wrap the query in a view definition with this name.
    pub fn with_view_name(mut self, name: &str) -> Self {
        self.config.output.create_view = true;
        self.config.output.view_name = Some(name.to_string());
        self
    }

    pub fn with_package_lookup(mut self, lookup: Arc<dyn PackageLookup>) -> Self {
        self.packages = Some(lookup);
        self
    }

    pub fn with_catalogs(mut self, catalogs: Arc<RuleCatalogs>) -> Self {
        self.catalogs = Some(catalogs);
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.config.output.validate = enabled;
        self
    }

    pub fn with_auto_correct(mut self, enabled: bool) -> Self {
        self.config.output.auto_correct = enabled;
        self
    }

    pub fn build(self) -> TransformationResult<CalcViewTransformer> {
        let catalogs = match self.catalogs {
            Some(catalogs) => catalogs,
            None => RuleCatalogs::embedded()?,
        };
        CalcViewTransformer::with_parts(self.config, self.dialect, catalogs, self.packages)
    }
}

impl Default for CalcViewTransformerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SCENARIO: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<Calculation:scenario xmlns:Calculation="http://www.sap.com/ndb/BiModelCalculation.ecore" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" id="CV_MATERIAL">
  <dataSources>
    <DataSource id="MARA" type="DATA_BASE_TABLE">
      <columnObject schemaName="SAPABAP1" columnObjectName="MARA"/>
    </DataSource>
  </dataSources>
  <calculationViews>
    <calculationView xsi:type="Calculation:ProjectionView" id="Projection_1">
      <viewAttributes>
        <viewAttribute id="MATNR"/>
      </viewAttributes>
      <input node="#MARA">
        <mapping xsi:type="Calculation:AttributeMapping" target="MATNR" source="MATNR"/>
      </input>
    </calculationView>
  </calculationViews>
  <logicalModel id="Projection_1">
    <attributes>
      <attribute id="MATNR">
        <keyMapping columnObjectName="Projection_1" columnName="MATNR"/>
      </attribute>
    </attributes>
  </logicalModel>
</Calculation:scenario>"##;

    #[test]
    fn test_transform_snowflake() {
        let transformer = CalcViewTransformer::builder()
            .with_schema_mapping("SAPABAP1", "RAW")
            .build()
            .unwrap();
        let compiled = transformer.transform(SCENARIO.as_bytes()).unwrap();
        assert_eq!(compiled.scenario_id, "CV_MATERIAL");
        assert_eq!(compiled.format, XmlFormat::CalculationScenario);
        assert!(compiled.warnings.is_empty(), "{:?}", compiled.warnings);
        assert!(compiled.sql.contains("\"RAW\".\"MARA\""));
        assert!(compiled.sql.ends_with("SELECT \"MATNR\" FROM projection_1"));
    }

    #[test]
    fn test_builder_view_and_dialect() {
        let transformer = CalcViewTransformer::builder()
            .with_dialect(Dialect::Hana)
            .with_view_name("CV_MATERIAL_MIG")
            .build()
            .unwrap();
        assert_eq!(transformer.dialect(), Dialect::Hana);
        assert_eq!(transformer.config().target.dialect, "hana");
        let compiled = transformer.transform(SCENARIO.as_bytes()).unwrap();
        assert!(compiled.sql.contains("\"CV_MATERIAL_MIG\""));
        assert!(compiled.sql.contains("\"SAPABAP1\".\"MARA\""));
    }

    #[test]
    fn test_package_lookup_is_injected() {
        let lookup: Arc<dyn PackageLookup> = Arc::new(PackageMapper::new(HashMap::from([(
            "CV_X".to_string(),
            "pkg".to_string(),
        )])));
        let transformer = CalcViewTransformer::builder()
            .with_package_lookup(lookup)
            .build()
            .unwrap();
        assert_eq!(transformer.packages.get_package("CV_X").as_deref(), Some("pkg"));
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let transformer = CalcViewTransformer::new(TransformationConfig::default(), Dialect::Snowflake).unwrap();
        let err = transformer.transform(b"<unknownRoot/>").unwrap_err();
        assert!(matches!(err, TransformationError::ParseError { .. }));

        let detailed = transformer.transform_detailed(b"<unknownRoot/>");
        assert!(detailed.result.is_err());
        let metadata = detailed.metadata.unwrap();
        assert_eq!(metadata.warnings, vec!["Parse error encountered".to_string()]);
    }

    #[test]
    fn test_detailed_and_batch() {
        let transformer = CalcViewTransformer::new(TransformationConfig::default(), Dialect::Snowflake).unwrap();
        let detailed = transformer.transform_detailed(SCENARIO.as_bytes());
        assert!(detailed.result.is_ok());
        let metadata = detailed.metadata.unwrap();
        assert!(metadata
            .transformations_applied
            .contains(&"Parsed calculation_scenario document".to_string()));

        let results = transformer.transform_batch(vec![SCENARIO.as_bytes(), b"<broken"]);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_detect() {
        let transformer = CalcViewTransformer::new(TransformationConfig::default(), Dialect::Snowflake).unwrap();
        let (format, version) = transformer.detect(SCENARIO.as_bytes()).unwrap();
        assert_eq!(format, XmlFormat::CalculationScenario);
        assert_eq!(version, HanaVersion::V2);
    }
}
