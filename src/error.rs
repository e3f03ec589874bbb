//! Error taxonomy for checkpoint loading, assembly, and export.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the export pipeline.
///
/// Every variant is fatal for the checkpoint being exported; nothing is
/// retried. The pipeline layer adds context naming the checkpoint and stage.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The checkpoint is missing the dimensions record, a required weight,
    /// or contains a parameter the dimensions record does not imply.
    #[error("checkpoint schema: {0}")]
    Schema(String),

    /// A hyperparameter invariant is violated, or a loaded weight's shape
    /// disagrees with the shape implied by the dimensions record.
    #[error("shape: {0}")]
    Shape(String),

    /// Graph capture produced an unexpected result for a component.
    #[error("capture failed for {component}: {reason}")]
    Capture {
        component: &'static str,
        reason: String,
    },

    /// A file could not be read or written.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
