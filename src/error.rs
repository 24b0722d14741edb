// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use thiserror::Error;

/// Error taxonomy of the bridge. Every variant renders with a stable
/// machine-checkable prefix; the rendered string is what crosses the wire
/// in the error arm of a response.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unknown type tag (programmer error on the caller side).
    #[error("invalid_type: {0}")]
    InvalidType(String),

    /// Envelope tag disagrees with the variable's declared type.
    #[error("type_mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Raw payload does not parse as a value of the declared type.
    #[error("validation_failed: {0}")]
    ValidationFailed(String),

    /// Value parsed fine but violates the variable's constraints.
    #[error("constraint_violation: {0}")]
    ConstraintViolation(String),

    /// Variable lookup failed.
    #[error("not_found: {0}")]
    NotFound(String),

    /// Session id is unknown to the store.
    #[error("session_not_found: {0}")]
    SessionNotFound(String),

    /// Session outlived its TTL; it has been torn down.
    #[error("session_expired: {0}")]
    SessionExpired(String),

    /// Name already taken within the session.
    #[error("already_exists: {0}")]
    AlreadyExists(String),

    /// Atomic batch rejected; nothing was applied.
    #[error("validation_failed: {} update(s) rejected", errors.len())]
    BatchFailed { errors: BTreeMap<String, String> },

    /// Invariant violated or a handler panicked. The rendered message is
    /// deliberately opaque; details go to the error log only.
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Wire form of the error: the Display string, prefix included.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}
