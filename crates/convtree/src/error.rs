use thiserror::Error;

use crate::models::FailureKind;

/// Failure to turn one conversation document into a node arena.
///
/// Only these two conditions stop a document; everything else the loader
/// encounters is recorded as an [`crate::models::Anomaly`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("document is not valid JSON: {source}")]
    InvalidJson {
        #[from]
        source: serde_json::Error,
    },

    #[error("malformed conversation document: {reason}")]
    MalformedDocument { reason: String },
}

impl LoadError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InvalidJson { .. } => FailureKind::InvalidJson,
            Self::MalformedDocument { .. } => FailureKind::MalformedDocument,
        }
    }
}
