//! Error types for OSCAL parsing, merging and writing

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    /// The document could not be parsed as an OSCAL model
    #[error("failed to parse OSCAL document {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// The file extension selects no supported format
    #[error("unsupported OSCAL file extension: {0}")]
    UnsupportedFormat(PathBuf),

    /// Serialization failed
    #[error("failed to serialize OSCAL document: {0}")]
    Serialize(String),

    /// A collection holds the same UUID twice
    #[error("duplicate {collection} uuid {uuid}")]
    DuplicateUuid {
        collection: &'static str,
        uuid: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
