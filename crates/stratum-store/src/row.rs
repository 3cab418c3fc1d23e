//! Rows.

use stratum_common::types::{RowId, Value};

/// A logical tuple held by one store.
///
/// Memory-resident rows carry a monotone id from the store's sequence;
/// once the store promotes, rows are addressed by their file position in
/// the same 64-bit space and `is_memory` turns false.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: RowId,
    memory: bool,
    data: Vec<Value>,
}

impl Row {
    /// Creates a memory-resident row.
    #[must_use]
    pub fn memory(id: RowId, data: Vec<Value>) -> Self {
        Self {
            id,
            memory: true,
            data,
        }
    }

    /// Creates a cached row addressed by file position.
    #[must_use]
    pub fn cached(pos: RowId, data: Vec<Value>) -> Self {
        Self {
            id: pos,
            memory: false,
            data,
        }
    }

    /// The row's id (memory) or file position (cached).
    #[inline]
    #[must_use]
    pub const fn id(&self) -> RowId {
        self.id
    }

    /// Returns true while the row is memory-resident.
    #[inline]
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        self.memory
    }

    /// The column values.
    #[must_use]
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Extracts the key values for an index column list.
    #[must_use]
    pub fn key_for(&self, columns: &[usize]) -> Vec<Value> {
        columns
            .iter()
            .map(|&i| self.data.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }
}
