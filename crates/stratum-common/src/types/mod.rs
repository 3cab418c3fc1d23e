//! Core types shared across the storage kernel.

mod ids;
mod modes;
mod timestamps;
mod value;

pub use ids::{RowId, SessionId};
pub use modes::{IsolationLevel, RowActionKind, TxMode};
pub use timestamps::Timestamp;
pub use value::Value;
