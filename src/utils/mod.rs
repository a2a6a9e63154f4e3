pub mod correction;
pub mod file_ops;
pub mod validation;

pub use correction::{AutoCorrector, AutoFixConfig, Correction, CorrectionConfidence, CorrectionResult};
pub use validation::{
    IssueSeverity, SqlValidator, ValidationContext, ValidationIssue, ValidationResult,
};
