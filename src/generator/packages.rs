//! Repository package lookup for calculation-view references.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{TransformationError, TransformationResult};

/// Resolves the repository package a calculation view was activated in.
pub trait PackageLookup: Send + Sync {
    fn get_package(&self, view: &str) -> Option<String>;
}

/// Lookup that knows no packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPackages;

impl PackageLookup for NoPackages {
    fn get_package(&self, _view: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    mappings: HashMap<String, String>,
}

/// Package mapping loaded from a `{"mappings": {"CV_NAME": "pkg.path"}}` JSON file.
#[derive(Debug, Clone, Default)]
pub struct PackageMapper {
    mappings: HashMap<String, String>,
}

impl PackageMapper {
    pub fn new(mappings: HashMap<String, String>) -> Self {
        Self { mappings }
    }

    pub fn from_json(content: &str) -> TransformationResult<Self> {
        let file: MappingFile = serde_json::from_str(content).map_err(|e| {
            TransformationError::package_mapping(&format!("Invalid package mapping JSON: {}", e))
        })?;
        debug!("Loaded {} package mappings", file.mappings.len());
        Ok(Self::new(file.mappings))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> TransformationResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TransformationError::package_mapping(&format!(
                "Cannot read package mapping {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl PackageLookup for PackageMapper {
    fn get_package(&self, view: &str) -> Option<String> {
        if let Some(package) = self.mappings.get(view) {
            return Some(package.clone());
        }
        self.mappings
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(view))
            .map(|(_, package)| package.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_lookup_exact_then_case_insensitive() {
        let mapper = PackageMapper::from_json(
            r#"{"mappings": {"CV_SALES": "finance.reporting", "cv_stock": "logistics"}}"#,
        )
        .unwrap();
        assert_eq!(mapper.len(), 2);
        assert_eq!(mapper.get_package("CV_SALES").as_deref(), Some("finance.reporting"));
        assert_eq!(mapper.get_package("CV_STOCK").as_deref(), Some("logistics"));
        assert_eq!(mapper.get_package("CV_OTHER"), None);
    }

    #[test]
    fn test_from_file_and_errors() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"mappings": {{"CV_A": "pkg.a"}}}}"#).unwrap();
        let mapper = PackageMapper::from_file(file.path()).unwrap();
        assert_eq!(mapper.get_package("CV_A").as_deref(), Some("pkg.a"));

        let err = PackageMapper::from_json("not json").unwrap_err();
        assert!(matches!(err, TransformationError::PackageMappingError { .. }));
        assert!(PackageMapper::from_file("/nonexistent/packages.json").is_err());
        assert_eq!(NoPackages.get_package("CV_A"), None);
    }
}
