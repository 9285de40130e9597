// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error types for the Mosaic key-value cache adapter.

use thiserror::Error;

/// Errors that can occur when interacting with a key-value backend.
#[derive(Debug, Error)]
pub enum KvError {
    /// The backend is not reachable (connection refused, connection lost).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer in time.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The key holds a value of another kind.
    #[error("wrong type for key '{key}': expected {expected}")]
    WrongType {
        /// The offending key.
        key: String,
        /// The kind the operation needed.
        expected: &'static str,
    },

    /// Failed to serialize or deserialize a value.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl KvError {
    /// True for failures caused by the backend being unreachable or slow, as
    /// opposed to failures caused by the data itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, KvError::Unavailable(_) | KvError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_display() {
        let err = KvError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "backend unavailable: connection refused");
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_timeout_is_unavailable() {
        assert!(KvError::Timeout("hget".to_string()).is_unavailable());
    }

    #[test]
    fn test_wrong_type_display() {
        let err = KvError::WrongType {
            key: "client:1".to_string(),
            expected: "hash",
        };
        assert!(err.to_string().contains("client:1"));
        assert!(err.to_string().contains("hash"));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_serialization_error_display() {
        let err = KvError::SerializationError("bad json".to_string());
        assert!(err.to_string().contains("serialization error"));
        assert!(!err.is_unavailable());
    }
}
