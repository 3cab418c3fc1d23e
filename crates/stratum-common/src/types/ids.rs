//! Core identifier types for StratumDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session identifier - uniquely identifies a client session.
///
/// Session IDs are issued by the session manager and never reused within
/// the lifetime of a database instance.
///
/// # Example
///
/// ```rust
/// use stratum_common::types::SessionId;
///
/// let session = SessionId::new(3);
/// assert_eq!(session.as_u64(), 3);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Invalid session ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `SessionId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid session ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "SessionId(INVALID)")
        } else {
            write!(f, "SessionId({})", self.0)
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

/// Row identifier - identifies a row within one row store.
///
/// Memory-resident rows carry a monotone id drawn from the store's id
/// sequence; once a store promotes to disk, rows are addressed by their
/// file position instead, and the same 64-bit space carries positions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RowId(u64);

impl RowId {
    /// Invalid row ID constant, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// First row id issued by a fresh store.
    pub const FIRST: Self = Self(0);

    /// Creates a new `RowId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next row ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid row ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "RowId(INVALID)")
        } else {
            write!(f, "RowId({})", self.0)
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RowId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<RowId> for u64 {
    #[inline]
    fn from(id: RowId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id = SessionId::new(7);
        assert!(id.is_valid());
        assert_eq!(id.as_u64(), 7);
        assert!(!SessionId::INVALID.is_valid());
        assert_eq!(format!("{}", id), "7");
    }

    #[test]
    fn test_row_id_next() {
        let id = RowId::FIRST;
        assert_eq!(id.next().as_u64(), 1);
        assert!(RowId::FIRST.is_valid());
        assert!(!RowId::INVALID.is_valid());
    }

    #[test]
    fn test_row_id_ordering() {
        assert!(RowId::new(1) < RowId::new(2));
        assert_eq!(u64::from(RowId::new(9)), 9);
    }
}
