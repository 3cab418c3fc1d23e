//! # stratum-txn
//!
//! Transaction managers, sessions and the database facade for StratumDB.
//!
//! This crate coordinates concurrent sessions reading and writing shared
//! tables under configurable isolation:
//!
//! - **Transaction managers** in three modes - strict 2PL, MV2PL and
//!   MVCC - with mode switching while at most one transaction is live.
//! - **The row-action log**: a per-session ordered sequence of row
//!   mutations forming the commit/rollback unit, with savepoints.
//! - **Sessions**: per-client state, the statement wait loop, cancel by
//!   random id, statement timeouts.
//! - **The database facade**: one value owning the catalog, rights,
//!   stores and the active manager.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Database                            │
//! │   ┌──────────┐  ┌───────────────┐  ┌────────────────────┐   │
//! │   │ Catalog  │  │ GranteeManager│  │ TransactionManager │   │
//! │   └──────────┘  └───────────────┘  │  Locks│MvLocks│Mvcc│   │
//! │                                    └─────────┬──────────┘   │
//! │   ┌──────────────┐  ┌───────────┐            │              │
//! │   │SessionManager│  │ RowStores │◀── commitRow/rollbackRow  │
//! │   └──────┬───────┘  └───────────┘                           │
//! │          ▼                                                  │
//! │   Session ── execute(stmt) ── beginAction ── latch wait     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod database;
pub mod latch;
pub mod lock;
pub mod manager;
pub mod session;
pub mod statement;

pub use action::{ActionRef, RowAction, RowActionLog, Savepoint};
pub use database::Database;
pub use latch::CountDownLatch;
pub use lock::LockTable;
pub use manager::{
    CommitLog, LobUsage, NoopCommitLog, NoopLobUsage, ResetMode, TransactionManager, TxCommon,
};
pub use session::{Session, SessionManager};
pub use statement::{FnStatement, Statement, StatementResult};
