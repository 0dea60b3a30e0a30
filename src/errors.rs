//! Error types for the storage and AI collaborators.
//!
//! The graph builder and layout engine are infallible over a well-formed note
//! collection, so nothing here ever reaches them.

use thiserror::Error;

/// Failures of the note store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Note not found: {id}")]
    NotFound { id: String },

    /// The disk is full. In-memory state is intact; the user may retry or export.
    #[error("Storage is full: {reason}")]
    Capacity { reason: String },
}

// ENOSPC on unix, ERROR_DISK_FULL on windows
const STORAGE_FULL_CODES: &[i32] = &[28, 112];

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(ref io)
                if io
                    .raw_os_error()
                    .map(|code| STORAGE_FULL_CODES.contains(&code))
                    .unwrap_or(false) =>
            {
                StoreError::Capacity {
                    reason: io.to_string(),
                }
            }
            other => StoreError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Failures of the generative AI service.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI service is not configured (set GEMINI_API_KEY)")]
    NotConfigured,

    #[error("Invalid AI base URL: {reason}")]
    InvalidBaseUrl { reason: String },

    #[error("AI request failed: {reason}")]
    Request { reason: String },

    #[error("AI service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI service returned no text")]
    EmptyResponse,

    #[error("AI response rejected: {reason}")]
    InvalidResponse { reason: String },
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Request {
            reason: err.to_string(),
        }
    }
}

/// Failures surfaced by the workspace session.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("Note not found: {id}")]
    UnknownNote { id: String },

    #[error("No note is open")]
    NoActiveNote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enospc_maps_to_capacity() {
        let io = std::io::Error::from_raw_os_error(28);
        let err: StoreError = sled::Error::Io(io).into();
        assert!(matches!(err, StoreError::Capacity { .. }));
    }

    #[test]
    fn test_other_io_maps_to_database() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: StoreError = sled::Error::Io(io).into();
        assert!(matches!(err, StoreError::Database { .. }));
    }

    #[test]
    fn test_workspace_error_is_transparent() {
        let err = WorkspaceError::from(AiError::EmptyResponse);
        assert_eq!(err.to_string(), "AI service returned no text");
    }
}
