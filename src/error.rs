//! Error types for the decoding core.
//!
//! None of these are fatal: the classifier turns a `ClassifyError` into a
//! diagnostic event, and a `ToolInputError` only downgrades a tool header to
//! its bare name.

use thiserror::Error;

/// Why a non-blank NDJSON line could not be turned into a typed event.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("missing \"type\" field")]
    MissingType,

    #[error("unknown event type \"{0}\"")]
    UnknownType(String),

    #[error("invalid {kind} payload: {message}")]
    InvalidPayload { kind: &'static str, message: String },
}

impl ClassifyError {
    /// Short machine-friendly label used as a structured log field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MalformedJson(_) => "malformed_json",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}

/// Failure to read the accumulated tool-input buffer as a JSON object.
#[derive(Debug, Error)]
pub enum ToolInputError {
    #[error("tool input is empty")]
    Empty,

    #[error("tool input is not valid JSON: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("tool input is not a JSON object")]
    NotObject,
}
