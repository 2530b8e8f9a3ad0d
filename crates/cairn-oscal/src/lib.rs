//! Cairn-OSCAL: the OSCAL documents cairn reads and writes
//!
//! Typed models cover what validation needs (component definitions,
//! assessment results, back-matter); every other field is preserved through
//! flattened `extra` maps, so documents round-trip without loss.
//!
//! ## Layer 1 - Artifacts
//!
//! - [`parse_oscal`] / [`serialize_oscal`]: YAML or JSON, chosen by extension
//! - [`merge`]: identity-based merge by UUID
//! - [`write_merged`]: merge into an existing file and replace it atomically

mod error;
mod format;
mod io;
mod merge;
pub mod model;

pub use error::MergeError;
pub use format::{parse_oscal, serialize_oscal, Format};
pub use io::{read_model, write_merged, write_model};
pub use merge::merge;
pub use model::*;

/// Result type for OSCAL operations.
pub type OscalResult<T> = std::result::Result<T, MergeError>;

/// OSCAL schema version written into new documents.
pub const OSCAL_VERSION: &str = "1.1.2";
