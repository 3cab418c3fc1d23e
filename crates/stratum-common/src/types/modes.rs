//! Transaction modes, isolation levels and row-action kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The concurrency control mode of the transaction manager.
///
/// The database starts in one mode and can switch while at most one
/// transaction is live; the new manager inherits the timestamp counter and
/// the live-transaction deque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxMode {
    /// Strict two-phase locking: table-level read/write locks held to
    /// transaction end.
    Locks,
    /// Two-phase locking for writers plus multi-version reads for
    /// read-only transactions.
    MvLocks,
    /// Multi-version concurrency control: no data locks, per-row version
    /// chains, write-write conflict detection.
    Mvcc,
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxMode::Locks => write!(f, "LOCKS"),
            TxMode::MvLocks => write!(f, "MVLOCKS"),
            TxMode::Mvcc => write!(f, "MVCC"),
        }
    }
}

/// SQL transaction isolation level.
///
/// READ UNCOMMITTED is accepted at SET time but rewritten to READ
/// COMMITTED; the kernel never serves dirty reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Rewritten to `ReadCommitted` when set.
    ReadUncommitted,
    /// Statement-level read consistency; read locks released at statement
    /// end under 2PL.
    ReadCommitted,
    /// Transaction-level read consistency; read locks held to commit.
    RepeatableRead,
    /// Full serializable execution.
    Serializable,
}

impl IsolationLevel {
    /// The level actually applied when this one is requested.
    #[inline]
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self {
            IsolationLevel::ReadUncommitted => IsolationLevel::ReadCommitted,
            other => other,
        }
    }

    /// Returns true if read locks are held until transaction end.
    #[inline]
    #[must_use]
    pub const fn holds_read_locks(self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// The kind of a logged row action.
///
/// An update is decomposed into a delete followed by an insert, each with a
/// changed-column mask. A row inserted and deleted by the same transaction
/// collapses to `InsertDelete` at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowActionKind {
    /// Row inserted by the owning transaction.
    Insert,
    /// Row deleted by the owning transaction.
    Delete,
    /// Row inserted then deleted within the same transaction.
    InsertDelete,
    /// Permanent delete of an already-merged row; illegal in hybrid
    /// stores.
    DeleteFinal,
    /// Logically erased action; skipped by commit and rollback.
    None,
}

impl RowActionKind {
    /// Returns true if the action still carries an effect.
    #[inline]
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, RowActionKind::None)
    }
}

impl fmt::Display for RowActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowActionKind::Insert => write!(f, "INSERT"),
            RowActionKind::Delete => write!(f, "DELETE"),
            RowActionKind::InsertDelete => write!(f, "INSERT_DELETE"),
            RowActionKind::DeleteFinal => write!(f, "DELETE_FINAL"),
            RowActionKind::None => write!(f, "NONE"),
        }
    }
}
