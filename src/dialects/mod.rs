pub mod hana;
pub mod snowflake;

use std::fmt;
use std::sync::Arc;

use crate::config::TransformationConfig;
use crate::error::{TransformationError, TransformationResult};
use crate::model::HanaVersion;
use crate::rules::RuleCatalogs;
use crate::translator::FormulaContext;
use crate::utils::validation::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Hana,
    Snowflake,
}

impl Dialect {
    pub fn all() -> &'static [Dialect] {
        &[Dialect::Hana, Dialect::Snowflake]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Hana => "hana",
            Dialect::Snowflake => "snowflake",
        }
    }

    pub fn from_str(s: &str) -> Result<Dialect, String> {
        match s.trim().to_lowercase().as_str() {
            "hana" | "sap-hana" | "sap_hana" => Ok(Dialect::Hana),
            "snowflake" | "sf" => Ok(Dialect::Snowflake),
            _ => Err(format!(
                "Unsupported dialect: {}. Supported dialects: {}",
                s,
                Dialect::all()
                    .iter()
                    .map(|d| d.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::Snowflake
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Everything the renderer and validator need to know about a target dialect.
pub trait DialectTransformationEngine: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn name(&self) -> &'static str;

    fn hana_version(&self) -> HanaVersion;

    /// Translate a raw calculation-view formula into dialect SQL.
    fn translate_formula(&self, formula: &str, ctx: &FormulaContext) -> String;

    /// Translate a structured function call whose arguments are already rendered.
    fn translate_function(&self, name: &str, args: &[String]) -> Option<String>;

    fn date_literal(&self, value: &str) -> String;

    fn timestamp_literal(&self, value: &str) -> String;

    /// Statement prefix that creates a view over the query; `quoted_name` is already quoted.
    fn view_preamble(&self, quoted_name: &str) -> String;

    /// Post-process an assembled WHERE clause body. An empty result drops the clause.
    fn cleanup_where_clause(&self, clause: &str) -> String;

    /// Dialect-specific checks over the final SQL text.
    fn validate_dialect(&self, sql: &str) -> ValidationResult;
}

pub struct DialectEngineFactory;

impl DialectEngineFactory {
    pub fn create_engine(
        dialect: Dialect,
        config: &TransformationConfig,
        catalogs: Arc<RuleCatalogs>,
    ) -> Result<Box<dyn DialectTransformationEngine>, TransformationError> {
        let version = config.target.hana_version()?;
        match dialect {
            Dialect::Hana => Ok(Box::new(hana::HanaTransformationEngine::new(catalogs, version))),
            Dialect::Snowflake => Ok(Box::new(snowflake::SnowflakeTransformationEngine::new(
                catalogs, version,
            ))),
        }
    }

    pub fn supported_dialects() -> &'static [Dialect] {
        Dialect::all()
    }
}

/// Default engine for `dialect` with the embedded catalogs.
pub fn engine_for(dialect: Dialect, version: HanaVersion) -> TransformationResult<Box<dyn DialectTransformationEngine>> {
    let catalogs = RuleCatalogs::embedded()?;
    Ok(match dialect {
        Dialect::Hana => Box::new(hana::HanaTransformationEngine::new(catalogs, version)),
        Dialect::Snowflake => Box::new(snowflake::SnowflakeTransformationEngine::new(catalogs, version)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!(Dialect::from_str("HANA").unwrap(), Dialect::Hana);
        assert_eq!(Dialect::from_str("snowflake").unwrap(), Dialect::Snowflake);
        let err = Dialect::from_str("oracle").unwrap_err();
        assert!(err.contains("hana, snowflake"));
    }

    #[test]
    fn test_default_dialect() {
        assert_eq!(Dialect::default(), Dialect::Snowflake);
        assert_eq!(Dialect::Hana.to_string(), "hana");
    }

    #[test]
    fn test_factory_creates_matching_engine() {
        let config = TransformationConfig::default();
        let catalogs = RuleCatalogs::embedded().unwrap();
        for dialect in DialectEngineFactory::supported_dialects() {
            let engine = DialectEngineFactory::create_engine(*dialect, &config, catalogs.clone()).unwrap();
            assert_eq!(engine.dialect(), *dialect);
        }
    }
}
