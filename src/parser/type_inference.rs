//! Type guesses from attribute names and literal values, plus the source type table.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{DataTypeSpec, TargetType};

static DATE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DATE|DAT$|DATUM|ERDAT|AEDAT|BUDAT|VALUT|DATENT|AUGDT").expect("valid regex")
});
static TIMESTAMP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TIMESTAMP|TIME$|TSTMP|UTIME|UTS").expect("valid regex"));
static NUMERIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"AMT|AMOUNT|BETR|MENGE|QUAN|NUM|CNT|RATE|PRICE|VALUE|IDNRK|ANZ").expect("valid regex")
});
static DATE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{8}|\d{4}-\d{2}-\d{2})$").expect("valid regex"));

/// Guess a column type from its name (SAP naming conventions).
pub fn infer_attribute_type(name: &str) -> DataTypeSpec {
    let upper = name.to_uppercase();
    if DATE_NAME.is_match(&upper) {
        return DataTypeSpec::date();
    }
    if TIMESTAMP_NAME.is_match(&upper) {
        return DataTypeSpec::timestamp();
    }
    if NUMERIC_NAME.is_match(&upper) {
        return DataTypeSpec::number(38, 6);
    }
    DataTypeSpec::varchar(if upper.chars().count() > 10 { 255 } else { 40 })
}

pub fn infer_literal_type(value: &str) -> Option<DataTypeSpec> {
    let stripped = value.trim();
    if stripped.is_empty() {
        return None;
    }
    if DATE_LITERAL.is_match(stripped) {
        return Some(DataTypeSpec::date());
    }
    if stripped.bytes().all(|b| b.is_ascii_digit()) {
        return Some(DataTypeSpec::number(stripped.len().min(38) as u32, 0));
    }
    Some(DataTypeSpec::varchar(stripped.chars().count().max(10) as u32))
}

fn parse_int(value: Option<&str>) -> Option<u32> {
    value.and_then(|v| v.trim().parse::<u32>().ok()).filter(|v| *v > 0)
}

/// Map a declared source type with its length/scale/precision onto a target type.
pub fn parse_type_spec(
    datatype: Option<&str>,
    length: Option<&str>,
    scale: Option<&str>,
    precision: Option<&str>,
) -> Option<DataTypeSpec> {
    let datatype = datatype.map(str::trim).filter(|d| !d.is_empty())?;
    let length = parse_int(length).or_else(|| parse_int(precision));
    let scale = scale.and_then(|s| s.trim().parse::<u32>().ok());

    let spec = match datatype.to_uppercase().as_str() {
        "VARCHAR" | "NVARCHAR" | "ALPHANUM" | "CHAR" => DataTypeSpec::varchar(length.unwrap_or(255)),
        "DECIMAL" | "NUMERIC" => DataTypeSpec::number(length.unwrap_or(38), scale.unwrap_or(0)),
        "INTEGER" | "INT" | "SMALLINT" | "BIGINT" | "TINYINT" => {
            DataTypeSpec::number(length.unwrap_or(38), 0)
        }
        "DOUBLE" | "FLOAT" | "REAL" => DataTypeSpec {
            kind: TargetType::Number,
            length: Some(38),
            scale,
        },
        "BOOLEAN" => DataTypeSpec::new(TargetType::Boolean),
        "DATE" => DataTypeSpec::date(),
        "TIMESTAMP" | "SECONDDATE" | "TIMESTAMP_NTZ" => DataTypeSpec::timestamp(),
        _ => DataTypeSpec::varchar(length.unwrap_or(255)),
    };
    Some(spec)
}
