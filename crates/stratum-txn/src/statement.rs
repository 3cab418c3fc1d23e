//! The compiled-statement interface.
//!
//! SQL parsing and planning live outside the kernel; what reaches the
//! transaction machinery is a compiled statement that declares its
//! read-set and write-set up front and executes against a session. Lock
//! acquisition and the waited-set computation work entirely from those
//! declared sets.

use std::sync::Arc;

use stratum_catalog::name::NameRef;
use stratum_common::error::StratumResult;
use stratum_common::types::{Timestamp, Value};

use crate::session::Session;

/// The outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// A row-mutating statement's update count.
    UpdateCount(usize),
    /// A query's result rows. One-shot: callers drain or drop.
    Rows(Vec<Vec<Value>>),
}

impl StatementResult {
    /// The update count, zero for row results.
    #[must_use]
    pub fn update_count(&self) -> usize {
        match self {
            StatementResult::UpdateCount(n) => *n,
            StatementResult::Rows(_) => 0,
        }
    }
}

/// A compiled statement.
pub trait Statement: Send + Sync {
    /// Tables the statement reads.
    fn read_set(&self) -> &[NameRef];

    /// Tables the statement writes.
    fn write_set(&self) -> &[NameRef];

    /// DDL statements take the catalog lock: every other transacting
    /// session joins the waited set.
    fn is_catalog_change(&self) -> bool {
        false
    }

    /// Whether the statement participates in the transaction machinery.
    /// Session-attribute statements do not.
    fn is_transaction_statement(&self) -> bool {
        true
    }

    /// DDL-style statements force a commit before and after execution.
    fn is_autocommit_statement(&self) -> bool {
        false
    }

    /// Timestamp of the last compilation, compared against the catalog's
    /// schema-change timestamp.
    fn compile_timestamp(&self) -> Timestamp {
        Timestamp::ZERO
    }

    /// Runs the statement body against the session.
    fn execute(&self, session: &Arc<Session>) -> StratumResult<StatementResult>;
}

/// A statement assembled from declared lock sets and a closure body.
/// The kernel's tests and embedders build their statements this way.
pub struct FnStatement<F> {
    reads: Vec<NameRef>,
    writes: Vec<NameRef>,
    catalog_change: bool,
    body: F,
}

impl<F> FnStatement<F>
where
    F: Fn(&Arc<Session>) -> StratumResult<StatementResult> + Send + Sync,
{
    /// Creates a statement with the given read and write sets.
    #[must_use]
    pub fn new(reads: Vec<NameRef>, writes: Vec<NameRef>, body: F) -> Self {
        Self {
            reads,
            writes,
            catalog_change: false,
            body,
        }
    }

    /// Marks the statement as a catalog change (DDL).
    #[must_use]
    pub fn catalog_change(mut self) -> Self {
        self.catalog_change = true;
        self
    }
}

impl<F> Statement for FnStatement<F>
where
    F: Fn(&Arc<Session>) -> StratumResult<StatementResult> + Send + Sync,
{
    fn read_set(&self) -> &[NameRef] {
        &self.reads
    }

    fn write_set(&self) -> &[NameRef] {
        &self.writes
    }

    fn is_catalog_change(&self) -> bool {
        self.catalog_change
    }

    fn execute(&self, session: &Arc<Session>) -> StratumResult<StatementResult> {
        (self.body)(session)
    }
}
