//! Frame parsing errors.

use thiserror::Error;

/// Errors produced while decoding an inbound frame.
///
/// Only [`FrameError::TooLarge`] closes the connection; every other variant
/// is answered with an `error` frame and the session stays open.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame exceeds [`crate::MAX_FRAME_BYTES`].
    #[error("frame too large: {len} bytes (limit {limit})")]
    TooLarge {
        /// Observed frame length.
        len: usize,
        /// The enforced limit.
        limit: usize,
    },

    /// Frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Frame object has neither a `type` nor a `t` key.
    #[error("frame has no kind")]
    MissingKind,

    /// Frame kind is not one this broker accepts.
    #[error("unknown frame kind: {0}")]
    UnknownKind(String),

    /// Frame kind is known but its payload does not match the schema.
    #[error("bad {kind} payload: {source}")]
    BadPayload {
        /// The frame kind whose payload failed to decode.
        kind: &'static str,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

impl FrameError {
    /// Whether this error must close the socket (oversize) rather than
    /// produce an `error` frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::TooLarge { .. })
    }

    /// Static label for metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            FrameError::TooLarge { .. } => "frame_too_large",
            FrameError::Json(_) => "invalid_json",
            FrameError::NotAnObject => "not_an_object",
            FrameError::MissingKind => "missing_kind",
            FrameError::UnknownKind(_) => "unknown_kind",
            FrameError::BadPayload { .. } => "bad_payload",
        }
    }
}
