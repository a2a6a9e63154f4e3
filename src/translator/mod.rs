//! Expression and function translation.
//!
//! Raw formulas from calculation views are rewritten textually; the dialect
//! engines in [`crate::dialects`] decide which steps run and in what order.

pub mod catalog;
pub mod functions;
pub mod rewrites;
pub mod scanner;

use std::sync::LazyLock;

use regex::{NoExpand, Regex};

use crate::model::{DataTypeSpec, HanaVersion, TargetType};

pub use catalog::{apply_catalog_rewrites, apply_pattern_rewrites};
pub use functions::translate_function;

static CLIENT_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$\$client\$\$").expect("valid client placeholder regex"));
static LANGUAGE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\$language\$\$").expect("valid language placeholder regex")
});

/// Per-formula settings handed to the dialect engine.
#[derive(Debug, Clone)]
pub struct FormulaContext<'a> {
    pub client: &'a str,
    pub language: &'a str,
    pub hana_version: HanaVersion,
    pub result_type: Option<&'a DataTypeSpec>,
}

impl<'a> FormulaContext<'a> {
    pub fn new(client: &'a str, language: &'a str, hana_version: HanaVersion) -> Self {
        Self {
            client,
            language,
            hana_version,
            result_type: None,
        }
    }

    pub fn with_result_type(mut self, result_type: Option<&'a DataTypeSpec>) -> Self {
        self.result_type = result_type;
        self
    }

    /// True when the formula is declared to produce a string.
    pub fn produces_string(&self) -> bool {
        self.result_type
            .map(|t| t.kind == TargetType::Varchar)
            .unwrap_or(false)
    }
}

/// Replace `$$client$$` and `$$language$$` with the configured values.
pub fn substitute_placeholders(text: &str, ctx: &FormulaContext) -> String {
    let with_client = CLIENT_PLACEHOLDER.replace_all(text, NoExpand(ctx.client));
    LANGUAGE_PLACEHOLDER
        .replace_all(&with_client, NoExpand(ctx.language))
        .into_owned()
}
