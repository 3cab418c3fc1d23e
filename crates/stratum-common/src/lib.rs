//! # stratum-common
//!
//! Common types, errors, and configuration for StratumDB.
//!
//! This crate provides the foundational types shared by every layer of the
//! storage kernel:
//!
//! - **Types**: core identifiers (`SessionId`, `RowId`), the global change
//!   `Timestamp`, isolation levels, transaction modes, row-action kinds and
//!   the `Value` cell type used by rows and index keys
//! - **Errors**: unified error handling with `StratumError` and its stable
//!   `ErrorCode` taxonomy
//! - **Config**: database configuration structures
//!
//! ## Example
//!
//! ```rust
//! use stratum_common::types::{RowId, SessionId, Timestamp};
//! use stratum_common::error::StratumResult;
//!
//! fn example() -> StratumResult<()> {
//!     let session = SessionId::new(1);
//!     let row = RowId::new(42);
//!     let ts = Timestamp::new(7);
//!     assert!(session.is_valid() && row.is_valid() && !ts.is_zero());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::DatabaseConfig;
pub use error::{ErrorCode, StratumError, StratumResult};
pub use types::{IsolationLevel, RowActionKind, RowId, SessionId, Timestamp, TxMode, Value};
