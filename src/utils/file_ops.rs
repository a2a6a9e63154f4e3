use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{TransformationError, TransformationResult};

pub fn is_xml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == "xml" || e == "calculationview"
        })
        .unwrap_or(false)
}

/// Read a calculation-view file as raw bytes; the parser handles the encoding declaration.
pub fn read_xml_file(path: &Path) -> TransformationResult<Vec<u8>> {
    if !path.is_file() {
        return Err(TransformationError::config(&format!(
            "Input file not found: {}",
            path.display()
        )));
    }
    let bytes = fs::read(path)?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

pub fn ensure_parent_dir(path: &Path) -> TransformationResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `sql` to `path`, creating missing directories. A trailing newline is ensured.
pub fn write_sql_file(path: &Path, sql: &str) -> TransformationResult<()> {
    ensure_parent_dir(path)?;
    let mut content = sql.to_string();
    if !content.ends_with('\n') {
        content.push('\n');
    }
    fs::write(path, content)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// `<output_dir>/<name>.sql`, with path separators in `name` flattened.
pub fn output_path_for(output_dir: &Path, name: &str) -> PathBuf {
    let file_name: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    output_dir.join(format!("{}.sql", file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_xml_file() {
        assert!(is_xml_file(Path::new("views/CV_SALES.xml")));
        assert!(is_xml_file(Path::new("CV_SALES.calculationview")));
        assert!(is_xml_file(Path::new("CV_SALES.XML")));
        assert!(!is_xml_file(Path::new("CV_SALES.sql")));
        assert!(!is_xml_file(Path::new("README")));
    }

    #[test]
    fn test_write_and_read_round_trip_through_nested_dir() {
        let dir = tempdir().unwrap();
        let target = output_path_for(&dir.path().join("out/nested"), "pkg::CV_SALES");
        assert!(target.ends_with("pkg__CV_SALES.sql"));

        write_sql_file(&target, "SELECT 1").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "SELECT 1\n");

        let xml_path = dir.path().join("view.xml");
        fs::write(&xml_path, "<root/>").unwrap();
        assert_eq!(read_xml_file(&xml_path).unwrap(), b"<root/>".to_vec());
    }

    #[test]
    fn test_read_missing_file_is_config_error() {
        let dir = tempdir().unwrap();
        let err = read_xml_file(&dir.path().join("missing.xml")).unwrap_err();
        assert!(matches!(err, TransformationError::ConfigError { .. }));
    }
}
