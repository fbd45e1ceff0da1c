//! # Error Handling
//!
//! This module provides the error types for Commons Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Lookup & State Errors                                             │
//! │  │   ├── NotFound              - Record does not exist                 │
//! │  │   └── InvalidState          - Record exists but op not allowed      │
//! │  │                                                                      │
//! │  ├── Validation Errors                                                 │
//! │  │   └── Validation            - Rejected before any store write       │
//! │  │                                                                      │
//! │  ├── Reporting Errors                                                  │
//! │  │   └── DuplicateReport       - Same reporter/target/context already  │
//! │  │                                                                      │
//! │  ├── Store Errors                                                      │
//! │  │   ├── Unavailable           - Backend unreachable (retryable)       │
//! │  │   ├── PermissionDenied      - Read denied by access rule            │
//! │  │   └── Serialization         - Document encode/decode failed         │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      └── Internal              - Should not happen in normal operation │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers branch on the variant, never on the message text. `Unavailable`
//! is the only transient category: operations that hit it can be retried
//! verbatim, and the cascade in [`crate::messaging`] is written to resume
//! from exactly where a retryable failure stopped it.

use thiserror::Error;

/// Result type alias for Commons Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Commons Core
///
/// All errors are categorized by domain to make error handling clearer
/// and to provide meaningful error messages to users.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lookup & State Errors (100-199)
    // ========================================================================

    /// The record an operation targets does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The record exists but is not in a state that permits the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ========================================================================
    // Validation Errors (200-299)
    // ========================================================================

    /// Input rejected before any store write was issued
    #[error("Validation failed: {0}")]
    Validation(String),

    // ========================================================================
    // Reporting Errors (300-399)
    // ========================================================================

    /// A matching report from this reporter already exists
    #[error("Duplicate report: {0}")]
    DuplicateReport(String),

    // ========================================================================
    // Store Errors (400-499)
    // ========================================================================

    /// The document store is unreachable or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A read was denied by the store's access rules
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Lookup & state
    /// - 200-299: Validation
    /// - 300-399: Reporting
    /// - 400-499: Store
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Lookup & state (100-199)
            Error::NotFound(_) => 100,
            Error::InvalidState(_) => 101,

            // Validation (200-299)
            Error::Validation(_) => 200,

            // Reporting (300-399)
            Error::DuplicateReport(_) => 300,

            // Store (400-499)
            Error::Unavailable(_) => 400,
            Error::PermissionDenied(_) => 401,
            Error::Serialization(_) => 402,

            // Internal (900-999)
            Error::Internal(_) => 900,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying
    /// the same operation without changing its inputs.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::DuplicateReport(_) | Error::InvalidState(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
