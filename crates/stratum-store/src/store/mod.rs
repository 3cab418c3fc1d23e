//! The hybrid row store.
//!
//! Rows begin in memory under AVL indexes. When the configured memory row
//! count is exceeded the store promotes: every row is relinked into the
//! session's data cache in primary-index order and the in-memory roots are
//! discarded. A store created with promotion disabled stays in memory for
//! life.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use stratum_common::error::{StratumError, StratumResult};
use stratum_common::types::{RowActionKind, RowId, TxMode, Value};

use crate::avl::AvlIndex;
use crate::cache::DataCache;
use crate::codec::{decode_row, encode_row};
use crate::row::Row;

/// One index over a store.
#[derive(Debug, Clone)]
pub struct IndexDef {
    /// Column positions forming the key.
    pub columns: Vec<usize>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// The shape of a store: column count and its indexes. Index 0 is the
/// primary index.
#[derive(Debug, Clone)]
pub struct StoreDef {
    /// Number of columns per row.
    pub column_count: usize,
    /// Index definitions, primary first.
    pub indexes: Vec<IndexDef>,
}

impl StoreDef {
    /// A single-index store keyed on the given columns.
    #[must_use]
    pub fn keyed(column_count: usize, key_columns: Vec<usize>, unique: bool) -> Self {
        Self {
            column_count,
            indexes: vec![IndexDef {
                columns: key_columns,
                unique,
            }],
        }
    }
}

/// The row-store collaborator interface: a store is injected per table
/// and the transaction manager drives it through commit and rollback.
pub trait RowStore: Send + Sync {
    /// Creates and stores a row.
    fn add(&self, data: Vec<Value>, in_transaction: bool) -> StratumResult<Row>;

    /// Fetches a row by id or position. `keep_in_memory` pins the row in
    /// a paging cache; the arena-backed cache has nothing to pin.
    fn get(&self, id: RowId, keep_in_memory: bool) -> StratumResult<Option<Row>>;

    /// Inserts a row into every index.
    fn index_row(&self, row: &Row) -> StratumResult<()>;

    /// Unlinks a row from every index.
    fn delete(&self, row: &Row);

    /// Frees a row's storage.
    fn remove(&self, row: &Row);

    /// Applies the persistent effect of a committed action.
    fn commit_row(&self, row: &Row, action: RowActionKind, tx_mode: TxMode) -> StratumResult<()>;

    /// Reverses the persistent effect of a rolled-back action.
    fn rollback_row(&self, row: &Row, action: RowActionKind, tx_mode: TxMode)
        -> StratumResult<()>;

    /// Drops every row and resets the null bitmap.
    fn remove_all(&self);

    /// Number of indexed rows.
    fn row_count(&self) -> usize;

    /// Returns true once the store has promoted to the cache.
    fn is_cached(&self) -> bool;

    /// Index-less null check for one column.
    fn has_null(&self, column: usize) -> bool;

    /// Full scan in primary-index order.
    fn scan(&self) -> Vec<Row>;
}

struct StoreState {
    use_disk: bool,
    is_cached: bool,
    row_id_sequence: u64,
    rows: HashMap<RowId, Row>,
    indexes: Vec<AvlIndex>,
    nulls: Vec<bool>,
    element_count: usize,
}

/// A row container that starts in memory and promotes to the data cache.
pub struct HybridRowStore {
    def: StoreDef,
    max_memory_row_count: usize,
    cache: Arc<DataCache>,
    state: RwLock<StoreState>,
}

impl HybridRowStore {
    /// Creates a store. With `disk_based` false, or a zero memory row
    /// count, the store never promotes.
    #[must_use]
    pub fn new(
        def: StoreDef,
        max_memory_row_count: usize,
        cache: Arc<DataCache>,
        disk_based: bool,
    ) -> Self {
        let indexes = def.indexes.iter().map(|_| AvlIndex::new()).collect();
        let nulls = vec![false; def.column_count];
        let use_disk = disk_based && max_memory_row_count > 0;

        Self {
            def,
            max_memory_row_count,
            cache,
            state: RwLock::new(StoreState {
                use_disk,
                is_cached: false,
                row_id_sequence: 0,
                rows: HashMap::new(),
                indexes,
                nulls,
                element_count: 0,
            }),
        }
    }

    /// Detaches the store from its cache, or drops the in-memory index
    /// roots.
    pub fn release(&self) {
        let mut state = self.state.write();
        if state.is_cached {
            self.cache.adjust_store_count(-1);
            state.is_cached = false;
        }
        for index in &mut state.indexes {
            index.clear();
        }
        state.rows.clear();
        state.element_count = 0;
    }

    fn fetch(&self, state: &StoreState, id: RowId) -> StratumResult<Option<Row>> {
        if state.is_cached {
            match self.cache.get(id) {
                Some(bytes) => Ok(Some(Row::cached(id, decode_row(&bytes)?))),
                None => Ok(None),
            }
        } else {
            Ok(state.rows.get(&id).cloned())
        }
    }

    fn index_row_locked(&self, state: &mut StoreState, row: &Row) -> StratumResult<()> {
        for (def, index) in self.def.indexes.iter().zip(&state.indexes) {
            if def.unique && index.contains_key(&row.key_for(&def.columns)) {
                return Err(StratumError::DuplicateKey {
                    index: format!("index on columns {:?}", def.columns),
                });
            }
        }

        for (def, index) in self.def.indexes.iter().zip(state.indexes.iter_mut()) {
            index.insert(row.key_for(&def.columns), row.id());
        }

        state.element_count += 1;
        Ok(())
    }

    fn unindex_row_locked(&self, state: &mut StoreState, row: &Row) {
        let mut unlinked = false;
        for (def, index) in self.def.indexes.iter().zip(state.indexes.iter_mut()) {
            unlinked |= index.remove(&row.key_for(&def.columns), row.id());
        }
        if unlinked && state.element_count > 0 {
            state.element_count -= 1;
        }
    }

    /// Relinks every row into the cache and discards the memory roots.
    fn change_to_disk_locked(&self, state: &mut StoreState) -> StratumResult<()> {
        self.cache.adjust_store_count(1);
        state.is_cached = true;

        debug!(rows = state.element_count, "row store promoting to cache");

        if state.element_count == 0 {
            return Ok(());
        }

        let ordered: Vec<Vec<Value>> = state.indexes[0]
            .iter()
            .filter_map(|id| state.rows.get(&id).map(|row| row.data().to_vec()))
            .collect();

        for index in &mut state.indexes {
            index.clear();
        }
        state.rows.clear();
        state.nulls.iter_mut().for_each(|n| *n = false);
        state.element_count = 0;

        for data in ordered {
            let pos = self.cache.allocate();
            self.cache.put(pos, encode_row(&data));
            let row = Row::cached(pos, data);

            for (i, value) in row.data().iter().enumerate() {
                if value.is_null() {
                    state.nulls[i] = true;
                }
            }
            self.index_row_locked(state, &row)?;
        }

        Ok(())
    }
}

impl RowStore for HybridRowStore {
    fn add(&self, data: Vec<Value>, _in_transaction: bool) -> StratumResult<Row> {
        if data.len() != self.def.column_count {
            return Err(StratumError::InvalidArgument {
                message: format!(
                    "row has {} columns, store expects {}",
                    data.len(),
                    self.def.column_count
                ),
            });
        }

        let mut state = self.state.write();

        if !state.is_cached
            && state.use_disk
            && state.element_count >= self.max_memory_row_count
        {
            self.change_to_disk_locked(&mut state)?;
        }

        let row = if state.is_cached {
            let pos = self.cache.allocate();
            self.cache.put(pos, encode_row(&data));
            Row::cached(pos, data)
        } else {
            let id = RowId::new(state.row_id_sequence);
            state.row_id_sequence += 1;
            let row = Row::memory(id, data);
            state.rows.insert(id, row.clone());
            row
        };

        for (i, value) in row.data().iter().enumerate() {
            if value.is_null() {
                state.nulls[i] = true;
            }
        }

        Ok(row)
    }

    fn get(&self, id: RowId, _keep_in_memory: bool) -> StratumResult<Option<Row>> {
        let state = self.state.read();
        self.fetch(&state, id)
    }

    fn index_row(&self, row: &Row) -> StratumResult<()> {
        let mut state = self.state.write();
        self.index_row_locked(&mut state, row)
    }

    fn delete(&self, row: &Row) {
        let mut state = self.state.write();
        self.unindex_row_locked(&mut state, row);
    }

    fn remove(&self, row: &Row) {
        let mut state = self.state.write();
        if row.is_memory() {
            state.rows.remove(&row.id());
        } else if state.is_cached {
            self.cache.free(row.id());
        }
    }

    fn commit_row(&self, row: &Row, action: RowActionKind, _tx_mode: TxMode) -> StratumResult<()> {
        match action {
            RowActionKind::Delete | RowActionKind::InsertDelete => {
                self.remove(row);
                Ok(())
            }
            RowActionKind::Insert | RowActionKind::None => Ok(()),
            RowActionKind::DeleteFinal => Err(StratumError::StoreMisuse {
                message: "DELETE_FINAL is illegal in a hybrid store".to_string(),
            }),
        }
    }

    fn rollback_row(
        &self,
        row: &Row,
        action: RowActionKind,
        _tx_mode: TxMode,
    ) -> StratumResult<()> {
        match action {
            RowActionKind::Delete => {
                let mut state = self.state.write();
                if row.is_memory() {
                    state.rows.insert(row.id(), row.clone());
                }
                self.index_row_locked(&mut state, row)
            }
            RowActionKind::Insert => {
                self.delete(row);
                self.remove(row);
                Ok(())
            }
            RowActionKind::InsertDelete => {
                self.remove(row);
                Ok(())
            }
            RowActionKind::DeleteFinal | RowActionKind::None => Ok(()),
        }
    }

    fn remove_all(&self) {
        let mut state = self.state.write();
        for index in &mut state.indexes {
            index.clear();
        }
        state.rows.clear();
        state.nulls.iter_mut().for_each(|n| *n = false);
        state.element_count = 0;
    }

    fn row_count(&self) -> usize {
        self.state.read().element_count
    }

    fn is_cached(&self) -> bool {
        self.state.read().is_cached
    }

    fn has_null(&self, column: usize) -> bool {
        let state = self.state.read();
        state.nulls.get(column).copied().unwrap_or(false)
    }

    fn scan(&self) -> Vec<Row> {
        let state = self.state.read();
        state.indexes[0]
            .iter()
            .filter_map(|id| self.fetch(&state, id).ok().flatten())
            .collect()
    }
}
