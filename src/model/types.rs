use std::fmt;

use crate::dialects::Dialect;

/// Column types the generated SQL can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Varchar,
    Number,
    Boolean,
    Date,
    TimestampNtz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypeSpec {
    pub kind: TargetType,
    pub length: Option<u32>,
    pub scale: Option<u32>,
}

impl DataTypeSpec {
    pub fn new(kind: TargetType) -> Self {
        Self {
            kind,
            length: None,
            scale: None,
        }
    }

    pub fn varchar(length: u32) -> Self {
        Self {
            kind: TargetType::Varchar,
            length: Some(length),
            scale: None,
        }
    }

    pub fn number(precision: u32, scale: u32) -> Self {
        Self {
            kind: TargetType::Number,
            length: Some(precision),
            scale: Some(scale),
        }
    }

    pub fn date() -> Self {
        Self::new(TargetType::Date)
    }

    pub fn timestamp() -> Self {
        Self::new(TargetType::TimestampNtz)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self.kind, TargetType::Date | TargetType::TimestampNtz)
    }

    /// Render the type in the column-definition syntax of `dialect`.
    pub fn render(&self, dialect: Dialect) -> String {
        match (self.kind, dialect) {
            (TargetType::Varchar, Dialect::Snowflake) => match self.length {
                Some(len) => format!("VARCHAR({})", len),
                None => "VARCHAR".to_string(),
            },
            (TargetType::Varchar, Dialect::Hana) => {
                format!("NVARCHAR({})", self.length.unwrap_or(5000))
            }
            (TargetType::Number, dialect) => {
                let name = match dialect {
                    Dialect::Snowflake => "NUMBER",
                    Dialect::Hana => "DECIMAL",
                };
                match (self.length, self.scale) {
                    (Some(p), Some(s)) => format!("{}({}, {})", name, p, s),
                    (Some(p), None) => format!("{}({})", name, p),
                    _ => name.to_string(),
                }
            }
            (TargetType::Boolean, _) => "BOOLEAN".to_string(),
            (TargetType::Date, _) => "DATE".to_string(),
            (TargetType::TimestampNtz, Dialect::Snowflake) => "TIMESTAMP_NTZ".to_string(),
            (TargetType::TimestampNtz, Dialect::Hana) => "TIMESTAMP".to_string(),
        }
    }
}

/// Which XML schema a calculation view was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XmlFormat {
    ColumnView,
    CalculationScenario,
}

impl XmlFormat {
    pub fn name(&self) -> &'static str {
        match self {
            XmlFormat::ColumnView => "column_view",
            XmlFormat::CalculationScenario => "calculation_scenario",
        }
    }
}

impl fmt::Display for XmlFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// HANA releases, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HanaVersion {
    V1,
    V2,
    V2Sps01,
    V2Sps03,
    V2Sps04,
}

impl HanaVersion {
    pub fn all() -> &'static [HanaVersion] {
        &[
            HanaVersion::V1,
            HanaVersion::V2,
            HanaVersion::V2Sps01,
            HanaVersion::V2Sps03,
            HanaVersion::V2Sps04,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            HanaVersion::V1 => "1.0",
            HanaVersion::V2 => "2.0",
            HanaVersion::V2Sps01 => "2.0 SPS01",
            HanaVersion::V2Sps03 => "2.0 SPS03",
            HanaVersion::V2Sps04 => "2.0 SPS04",
        }
    }

    pub fn from_str(s: &str) -> Result<HanaVersion, String> {
        let normalized = s
            .trim()
            .to_uppercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalized.as_str() {
            "1" | "1.0" => Ok(HanaVersion::V1),
            "2" | "2.0" => Ok(HanaVersion::V2),
            "2.0 SPS01" | "SPS01" => Ok(HanaVersion::V2Sps01),
            "2.0 SPS03" | "SPS03" => Ok(HanaVersion::V2Sps03),
            "2.0 SPS04" | "SPS04" => Ok(HanaVersion::V2Sps04),
            _ => Err(format!(
                "Unsupported HANA version: {}. Supported versions: {}",
                s,
                HanaVersion::all()
                    .iter()
                    .map(|v| v.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    pub fn is_legacy(&self) -> bool {
        *self == HanaVersion::V1
    }
}

impl Default for HanaVersion {
    fn default() -> Self {
        HanaVersion::V2
    }
}

impl fmt::Display for HanaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
