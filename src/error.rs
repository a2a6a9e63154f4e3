use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformationError {
    #[error("Parse error: {message} (element: {element})")]
    ParseError {
        message: String,
        element: String,
        position: usize,
    },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("SQL validation failed: {}", violations.join("; "))]
    ValidationError {
        violations: Vec<String>,
        suggestions: Vec<String>,
    },

    #[error("Rule catalog error in {catalog}: {message}")]
    RuleCatalogError { catalog: String, message: String },

    #[error("Package mapping error: {message}")]
    PackageMappingError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct TransformationWarning {
    pub message: String,
    pub location: Option<SourceLocation>,
    pub severity: WarningSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
}

/// Where in the compiled view a warning originated.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub node_id: String,
    pub file: Option<String>,
}

pub type TransformationResult<T> = Result<T, TransformationError>;

impl Clone for TransformationError {
    fn clone(&self) -> Self {
        match self {
            Self::ParseError {
                message,
                element,
                position,
            } => Self::ParseError {
                message: message.clone(),
                element: element.clone(),
                position: *position,
            },
            Self::ConfigError { message } => Self::ConfigError {
                message: message.clone(),
            },
            Self::ValidationError {
                violations,
                suggestions,
            } => Self::ValidationError {
                violations: violations.clone(),
                suggestions: suggestions.clone(),
            },
            Self::RuleCatalogError { catalog, message } => Self::RuleCatalogError {
                catalog: catalog.clone(),
                message: message.clone(),
            },
            Self::PackageMappingError { message } => Self::PackageMappingError {
                message: message.clone(),
            },
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Self::SerializationError(e) => {
                use serde::de::Error as _;
                Self::SerializationError(serde_json::Error::custom(e.to_string()))
            }
        }
    }
}

impl TransformationError {
    pub fn parse(message: &str, element: &str) -> Self {
        Self::ParseError {
            message: message.to_string(),
            element: element.to_string(),
            position: 0,
        }
    }

    pub fn parse_at(message: &str, element: &str, position: usize) -> Self {
        Self::ParseError {
            message: message.to_string(),
            element: element.to_string(),
            position,
        }
    }

    pub fn validation(violations: Vec<String>, suggestions: Vec<String>) -> Self {
        Self::ValidationError {
            violations,
            suggestions,
        }
    }

    pub fn config(message: &str) -> Self {
        Self::ConfigError {
            message: message.to_string(),
        }
    }

    pub fn catalog(catalog: &str, message: &str) -> Self {
        Self::RuleCatalogError {
            catalog: catalog.to_string(),
            message: message.to_string(),
        }
    }

    pub fn package_mapping(message: &str) -> Self {
        Self::PackageMappingError {
            message: message.to_string(),
        }
    }
}

impl TransformationWarning {
    pub fn new(message: &str, severity: WarningSeverity) -> Self {
        Self {
            message: message.to_string(),
            location: None,
            severity,
        }
    }

    pub fn with_location(
        message: &str,
        severity: WarningSeverity,
        location: SourceLocation,
    ) -> Self {
        Self {
            message: message.to_string(),
            location: Some(location),
            severity,
        }
    }

    pub fn low(message: &str) -> Self {
        Self::new(message, WarningSeverity::Low)
    }

    pub fn medium(message: &str) -> Self {
        Self::new(message, WarningSeverity::Medium)
    }

    pub fn high(message: &str) -> Self {
        Self::new(message, WarningSeverity::High)
    }
}

impl std::fmt::Display for TransformationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " in node {}", location.node_id)?;
            if let Some(file) = &location.file {
                write!(f, " ({})", file)?;
            }
        }
        Ok(())
    }
}

impl SourceLocation {
    pub fn node(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            file: None,
        }
    }

    pub fn with_file(node_id: &str, file: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            file: Some(file.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub parse_time_ms: u64,
    pub render_time_ms: u64,
    pub validate_time_ms: u64,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DetailedResult<T> {
    pub result: TransformationResult<T>,
    pub warnings: Vec<String>,
    pub metadata: Option<EnhancedTransformationMetadata>,
}

#[derive(Debug, Clone)]
pub struct EnhancedTransformationMetadata {
    pub transformations_applied: Vec<String>,
    pub warnings: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
}
