//! Typed errors for the places where callers branch on the failure kind.
//!
//! Everything else in the crate propagates `anyhow::Error`.

use thiserror::Error;

/// A catalog row that cannot become a scene record.
///
/// The row is dropped and the run continues; the header variant is the one
/// exception and aborts the run before dispatch.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("catalog header is empty")]
    EmptyHeader,

    #[error("catalog header is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("row has no sceneID")]
    MissingSceneId,

    #[error("scene {scene_id}: acquisitionDate '{value}' is not YYYY-MM-DD")]
    BadAcquisitionDate { scene_id: String, value: String },
}

/// Failure reported by the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index rejected the document shape (mapping/parse error).
    #[error("index rejected document {scene_id}: {message}")]
    Validation { scene_id: String, message: String },

    /// `.` and `..` cannot be document ids: URL parsing folds them away.
    #[error("scene id '{0}' is not a valid document id")]
    InvalidId(String),

    #[error("index returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("index request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
