//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found, or belongs to another tenant.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (duplicate definition, stale version, dependent records).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request is well-formed but not allowed in the current state
    /// (e.g. overpayment, editing a paid invoice).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::BadRequest(_) => "bad_request",
            DomainError::Unauthorized => "unauthorized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(DomainError::validation("x").kind(), "validation_error");
        assert_eq!(DomainError::not_found().kind(), "not_found");
        assert_eq!(DomainError::conflict("x").kind(), "conflict");
        assert_eq!(DomainError::bad_request("x").kind(), "bad_request");
    }

    #[test]
    fn bad_request_message_is_preserved() {
        let err = DomainError::bad_request("payment exceeds due amount");
        assert_eq!(err.to_string(), "bad request: payment exceeds due amount");
    }
}
