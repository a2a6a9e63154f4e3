//! Format and version detection from the document root.

use log::debug;

use crate::error::{TransformationError, TransformationResult};
use crate::model::{HanaVersion, XmlFormat};

use super::xml::XmlElement;

pub fn detect_format(root: &XmlElement) -> TransformationResult<XmlFormat> {
    if root.name.contains("ColumnView") {
        Ok(XmlFormat::ColumnView)
    } else if root.name.contains("scenario") {
        Ok(XmlFormat::CalculationScenario)
    } else {
        Err(TransformationError::parse_at(
            &format!("Unknown XML format: {}", root.name),
            &root.name,
            root.position,
        ))
    }
}

/// Oldest HANA release that supports the features the document uses, when it can be told.
pub fn detect_version_hint(root: &XmlElement) -> Option<HanaVersion> {
    if let Ok(XmlFormat::ColumnView) = detect_format(root) {
        return Some(HanaVersion::V1);
    }

    let views = root.descendants("calculationView");
    let uses = |needle: &str| views.iter().any(|v| v.xsi_type().unwrap_or("").contains(needle));

    if uses("HierarchyView") || uses("WindowFunctionView") {
        return Some(HanaVersion::V2Sps03);
    }
    if uses("IntersectView") || uses("MinusView") {
        return Some(HanaVersion::V2Sps01);
    }
    if root.local_name == "scenario" {
        return Some(HanaVersion::V2);
    }
    None
}

/// The newer of the detected hint and the configured version.
pub fn recommended_version(hint: Option<HanaVersion>, configured: HanaVersion) -> HanaVersion {
    match hint {
        Some(detected) if detected > configured => {
            debug!("Document requires HANA {}, newer than configured {}", detected, configured);
            detected
        }
        _ => configured,
    }
}
