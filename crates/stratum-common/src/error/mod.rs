//! Database error types.
//!
//! Every error the kernel emits carries a stable [`ErrorCode`], a primary
//! argument (usually the offending object name) and, where useful, a nested
//! cause. Codes are grouped by category in hex ranges and are stable across
//! versions for programmatic handling.

use std::fmt;
use thiserror::Error;

use crate::types::{SessionId, TxMode};

/// Stable error codes for categorizing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,

    // Storage errors (0x0100 - 0x01FF)
    /// Row not found in its store.
    RowNotFound = 0x0100,
    /// Action illegal for the store kind.
    StoreMisuse = 0x0101,
    /// Encoded row data is corrupt.
    RowCorrupted = 0x0102,
    /// Duplicate key in a unique index.
    DuplicateKey = 0x0103,

    // Transaction errors (0x0300 - 0x03FF)
    /// Commit lost to a concurrent conflicting transaction.
    SerializationFailure = 0x0300,
    /// Statement aborted by timeout, cancel or deadlock avoidance.
    StatementAborted = 0x0301,
    /// Operation illegal in the current transaction state.
    InvalidTransactionState = 0x0302,

    // Rights errors (0x0400 - 0x04FF)
    /// Access check failed.
    NotAuthorized = 0x0400,
    /// Grantor lacks the privilege being granted.
    GrantInvalid = 0x0401,
    /// Revoke of a role the grantee does not directly hold.
    RoleNotGranted = 0x0402,
    /// Grantee already exists.
    GranteeExists = 0x0403,
    /// Grantee does not exist.
    GranteeNotFound = 0x0404,

    // Catalog errors (0x0500 - 0x05FF)
    /// Name does not resolve.
    ObjectNotFound = 0x0500,
    /// Drop without cascade while referrers exist.
    ObjectReferenced = 0x0501,
    /// An object with the name already exists.
    ObjectExists = 0x0502,
    /// Drop of a non-empty schema without cascade.
    SchemaNotEmpty = 0x0503,
    /// Mutation of a system schema.
    SchemaNotModifiable = 0x0504,
    /// Rename across schemas.
    InvalidSchemaRename = 0x0505,

    // Session errors (0x0600 - 0x06FF)
    /// Session closed or connection lost.
    ConnectionFailure = 0x0600,
    /// Operation on a closed session.
    SessionClosed = 0x0601,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Storage",
            0x03 => "Transaction",
            0x04 => "Rights",
            0x05 => "Catalog",
            0x06 => "Session",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for StratumDB.
///
/// # Example
///
/// ```rust
/// use stratum_common::error::{ErrorCode, StratumError, StratumResult};
///
/// fn lookup(name: &str) -> StratumResult<()> {
///     Err(StratumError::ObjectNotFound { name: name.to_string() })
/// }
///
/// assert_eq!(lookup("T1").unwrap_err().code(), ErrorCode::ObjectNotFound);
/// ```
#[derive(Debug, Error)]
pub enum StratumError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Row not found in its store.
    #[error("row {row_id} not found")]
    RowNotFound {
        /// The missing row id or position.
        row_id: u64,
    },

    /// An operation illegal for the store kind was attempted.
    #[error("illegal store operation: {message}")]
    StoreMisuse {
        /// Description of the misuse.
        message: String,
    },

    /// Encoded row data failed to decode.
    #[error("row data corrupted: {message}")]
    RowCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Duplicate key in a unique index.
    #[error("duplicate key in unique index {index}")]
    DuplicateKey {
        /// The violated index name.
        index: String,
    },

    /// Commit lost due to a concurrent conflicting transaction.
    #[error("serialization failure in session {session_id}")]
    SerializationFailure {
        /// The losing session.
        session_id: SessionId,
    },

    /// Statement aborted by timeout, cancel or deadlock avoidance.
    #[error("statement aborted in session {session_id}")]
    StatementAborted {
        /// The affected session.
        session_id: SessionId,
    },

    /// Operation illegal in the current transaction state.
    #[error("invalid transaction state: {message}")]
    InvalidTransactionState {
        /// What was attempted.
        message: String,
    },

    /// Mode switch refused while transactions are live.
    #[error("cannot switch to {target} with live transactions")]
    ModeSwitchRefused {
        /// The requested mode.
        target: TxMode,
    },

    /// Access check failed.
    #[error("user lacks privilege on {name}")]
    NotAuthorized {
        /// The protected object.
        name: String,
    },

    /// Grantor lacks the privilege being granted.
    #[error("grantor cannot grant requested privilege on {name}")]
    GrantInvalid {
        /// The object of the grant.
        name: String,
    },

    /// Revoke of a role the grantee does not directly hold.
    #[error("role {name} has not been granted")]
    RoleNotGranted {
        /// The role name.
        name: String,
    },

    /// A grantee with the name already exists.
    #[error("grantee {name} already exists")]
    GranteeExists {
        /// The colliding name.
        name: String,
    },

    /// Grantee does not exist.
    #[error("grantee {name} not found")]
    GranteeNotFound {
        /// The missing name.
        name: String,
    },

    /// Name does not resolve.
    #[error("object not found: {name}")]
    ObjectNotFound {
        /// The unresolved name.
        name: String,
    },

    /// Drop without cascade while referrers exist.
    #[error("object {name} is referenced by {referrer}")]
    ObjectReferenced {
        /// The object being dropped.
        name: String,
        /// One of its referrers.
        referrer: String,
    },

    /// An object with the name already exists.
    #[error("object already exists: {name}")]
    ObjectExists {
        /// The colliding name.
        name: String,
    },

    /// Drop of a non-empty schema without cascade.
    #[error("schema {name} is not empty")]
    SchemaNotEmpty {
        /// The schema name.
        name: String,
    },

    /// Mutation of a system schema.
    #[error("schema {name} cannot be modified")]
    SchemaNotModifiable {
        /// The schema name.
        name: String,
    },

    /// Rename placing an object in a different schema.
    #[error("cannot rename into schema {name}")]
    InvalidSchemaRename {
        /// The target schema.
        name: String,
    },

    /// Session closed or connection lost.
    #[error("connection failure in session {session_id}")]
    ConnectionFailure {
        /// The affected session.
        session_id: SessionId,
    },

    /// Operation on a closed session.
    #[error("session {session_id} is closed")]
    SessionClosed {
        /// The closed session.
        session_id: SessionId,
    },
}

impl StratumError {
    /// Returns the stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            StratumError::Internal { .. } => ErrorCode::Internal,
            StratumError::NotSupported { .. } => ErrorCode::NotSupported,
            StratumError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            StratumError::RowNotFound { .. } => ErrorCode::RowNotFound,
            StratumError::StoreMisuse { .. } => ErrorCode::StoreMisuse,
            StratumError::RowCorrupted { .. } => ErrorCode::RowCorrupted,
            StratumError::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            StratumError::SerializationFailure { .. } => ErrorCode::SerializationFailure,
            StratumError::StatementAborted { .. } => ErrorCode::StatementAborted,
            StratumError::InvalidTransactionState { .. } | StratumError::ModeSwitchRefused { .. } => {
                ErrorCode::InvalidTransactionState
            }
            StratumError::NotAuthorized { .. } => ErrorCode::NotAuthorized,
            StratumError::GrantInvalid { .. } => ErrorCode::GrantInvalid,
            StratumError::RoleNotGranted { .. } => ErrorCode::RoleNotGranted,
            StratumError::GranteeExists { .. } => ErrorCode::GranteeExists,
            StratumError::GranteeNotFound { .. } => ErrorCode::GranteeNotFound,
            StratumError::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            StratumError::ObjectReferenced { .. } => ErrorCode::ObjectReferenced,
            StratumError::ObjectExists { .. } => ErrorCode::ObjectExists,
            StratumError::SchemaNotEmpty { .. } => ErrorCode::SchemaNotEmpty,
            StratumError::SchemaNotModifiable { .. } => ErrorCode::SchemaNotModifiable,
            StratumError::InvalidSchemaRename { .. } => ErrorCode::InvalidSchemaRename,
            StratumError::ConnectionFailure { .. } => ErrorCode::ConnectionFailure,
            StratumError::SessionClosed { .. } => ErrorCode::SessionClosed,
        }
    }

    /// Shorthand for an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        StratumError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for StratumDB operations.
pub type StratumResult<T> = Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_categories() {
        assert_eq!(ErrorCode::SerializationFailure.category(), "Transaction");
        assert_eq!(ErrorCode::NotAuthorized.category(), "Rights");
        assert_eq!(ErrorCode::ObjectNotFound.category(), "Catalog");
        assert_eq!(ErrorCode::SessionClosed.category(), "Session");
    }

    #[test]
    fn test_error_to_code() {
        let err = StratumError::SchemaNotEmpty {
            name: "S".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::SchemaNotEmpty);

        let err = StratumError::ModeSwitchRefused {
            target: TxMode::Mvcc,
        };
        assert_eq!(err.code(), ErrorCode::InvalidTransactionState);
    }

    #[test]
    fn test_display() {
        let err = StratumError::ObjectNotFound {
            name: "PUBLIC.T1".to_string(),
        };
        assert_eq!(format!("{}", err), "object not found: PUBLIC.T1");
    }
}
