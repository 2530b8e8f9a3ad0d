//! Reading and atomically writing OSCAL files.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::format::{parse_oscal, serialize_oscal, Format};
use crate::merge::merge;
use crate::model::OscalModel;
use crate::OscalResult;

/// Read an OSCAL document, choosing the format from the extension.
pub fn read_model(path: &Path) -> OscalResult<OscalModel> {
    let format = Format::from_path(path)?;
    let raw = fs::read_to_string(path)?;
    parse_oscal(&raw, format, &path.display().to_string())
}

/// Write `model` to `path`, replacing any existing file atomically.
pub fn write_model(path: &Path, model: &OscalModel) -> OscalResult<()> {
    let format = Format::from_path(path)?;
    let body = serialize_oscal(model, format)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // Temp file in the same directory so the rename stays on one filesystem.
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(body.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;

    debug!(path = %path.display(), bytes = body.len(), "wrote OSCAL document");
    Ok(())
}

/// Merge `incoming` into the document at `path` (if any) and write the result.
///
/// A malformed existing file fails the write and leaves it untouched.
pub fn write_merged(path: &Path, incoming: OscalModel) -> OscalResult<OscalModel> {
    let merged = if path.exists() {
        let existing = read_model(path)?;
        info!(path = %path.display(), "merging into existing OSCAL document");
        merge(existing, incoming)?
    } else {
        incoming
    };
    write_model(path, &merged)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssessmentResult, AssessmentResults, Metadata};
    use crate::MergeError;

    fn results(result_uuid: &str) -> OscalModel {
        OscalModel::from_assessment_results(AssessmentResults {
            uuid: "ar-1".to_string(),
            metadata: Metadata {
                title: "Assessment".to_string(),
                ..Default::default()
            },
            results: vec![AssessmentResult {
                uuid: result_uuid.to_string(),
                title: "run".to_string(),
                start: "2024-01-01T00:00:00Z".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["out.yaml", "out.json"] {
            let path = dir.path().join(name);
            let model = results("r1");
            write_model(&path, &model).unwrap();
            assert_eq!(read_model(&path).unwrap(), model);
        }
    }

    #[test]
    fn test_write_merged_appends_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessment-results.yaml");

        write_merged(&path, results("r1")).unwrap();
        let merged = write_merged(&path, results("r2")).unwrap();

        let ar = merged.assessment_results.unwrap();
        let uuids: Vec<&str> = ar.results.iter().map(|r| r.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["r1", "r2"]);
        assert_eq!(read_model(&path).unwrap().assessment_results.unwrap().results.len(), 2);
    }

    #[test]
    fn test_malformed_existing_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "component-definition: [unclosed").unwrap();

        let err = write_merged(&path, results("r1")).unwrap_err();
        assert!(matches!(err, MergeError::Parse { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "component-definition: [unclosed");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_model(&dir.path().join("out.txt"), &results("r1")).unwrap_err();
        assert!(matches!(err, MergeError::UnsupportedFormat(_)));
    }
}
