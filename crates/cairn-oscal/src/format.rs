//! YAML and JSON encodings of OSCAL documents.

use std::path::Path;

use crate::error::MergeError;
use crate::model::OscalModel;
use crate::OscalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Select a format from the file extension.
    pub fn from_path(path: &Path) -> OscalResult<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            _ => Err(MergeError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Parse an OSCAL document. `source_name` only labels errors.
///
/// YAML is a superset of JSON, so `Format::Yaml` also accepts JSON input.
pub fn parse_oscal(raw: &str, format: Format, source_name: &str) -> OscalResult<OscalModel> {
    let parsed: Result<OscalModel, String> = match format {
        Format::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
        Format::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
    };
    let model = parsed.map_err(|reason| MergeError::Parse {
        source_name: source_name.to_string(),
        reason,
    })?;
    if model.is_empty() {
        return Err(MergeError::Parse {
            source_name: source_name.to_string(),
            reason: "no OSCAL model found".to_string(),
        });
    }
    Ok(model)
}

/// Serialize an OSCAL document.
pub fn serialize_oscal(model: &OscalModel, format: Format) -> OscalResult<String> {
    match format {
        Format::Yaml => {
            serde_yaml::to_string(model).map_err(|e| MergeError::Serialize(e.to_string()))
        }
        Format::Json => {
            let mut out = serde_json::to_string_pretty(model)
                .map_err(|e| MergeError::Serialize(e.to_string()))?;
            out.push('\n');
            Ok(out)
        }
    }
}
