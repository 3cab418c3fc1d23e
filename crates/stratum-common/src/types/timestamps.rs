//! The global change timestamp.
//!
//! Every row-mutating action and every statement boundary is stamped from a
//! single atomic counter owned by the transaction manager. Timestamps are
//! strictly increasing across the whole database, which gives MVCC its
//! visibility order and the row-action log its global sort key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotone 64-bit change timestamp.
///
/// The zero timestamp is reserved: a `RowAction` whose commit timestamp is
/// zero is uncommitted.
///
/// # Example
///
/// ```rust
/// use stratum_common::types::Timestamp;
///
/// let ts = Timestamp::new(12);
/// assert!(Timestamp::ZERO < ts && ts < Timestamp::MAX);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The uncommitted / unset timestamp.
    pub const ZERO: Self = Self(0);

    /// The maximum timestamp, later than every issued one.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks whether this is the unset timestamp.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    #[inline]
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Timestamp> for u64 {
    #[inline]
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_order() {
        assert!(Timestamp::ZERO < Timestamp::new(1));
        assert!(Timestamp::new(1) < Timestamp::MAX);
        assert!(Timestamp::ZERO.is_zero());
        assert!(!Timestamp::new(5).is_zero());
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Timestamp::new(99);
        assert_eq!(u64::from(ts), 99);
        assert_eq!(Timestamp::from(99u64), ts);
    }
}
