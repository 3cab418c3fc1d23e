//! The table-level lock table for the two-phase-locking modes.
//!
//! Two maps: exclusive write locks (`table -> session`) and shared read
//! locks (`table -> {sessions}`). The table does no locking of its own;
//! every mutation happens under the transaction manager's write lock.
//! Names in the system schema are never locked.

use std::collections::HashMap;

use stratum_catalog::manager::SYSTEM_SCHEMA;
use stratum_catalog::name::NameRef;
use stratum_common::types::SessionId;

/// Returns true for names exempt from locking.
#[must_use]
pub fn is_unlockable(name: &NameRef) -> bool {
    name.schema
        .as_ref()
        .is_some_and(|schema| schema.local() == SYSTEM_SCHEMA)
}

/// Table-level read/write lock ownership.
#[derive(Default)]
pub struct LockTable {
    write_locks: HashMap<NameRef, SessionId>,
    read_locks: HashMap<NameRef, Vec<SessionId>>,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The exclusive holder of a table, if any.
    #[must_use]
    pub fn write_holder(&self, name: &NameRef) -> Option<SessionId> {
        self.write_locks.get(name).copied()
    }

    /// The shared holders of a table.
    #[must_use]
    pub fn readers_of(&self, name: &NameRef) -> Vec<SessionId> {
        self.read_locks.get(name).cloned().unwrap_or_default()
    }

    /// Takes the exclusive lock.
    pub fn lock_write(&mut self, name: NameRef, session: SessionId) {
        if is_unlockable(&name) {
            return;
        }
        self.write_locks.insert(name, session);
    }

    /// Joins the shared holders.
    pub fn lock_read(&mut self, name: NameRef, session: SessionId) {
        if is_unlockable(&name) {
            return;
        }
        let readers = self.read_locks.entry(name).or_default();
        if !readers.contains(&session) {
            readers.push(session);
        }
    }

    /// Releases every lock a session holds.
    pub fn unlock_all(&mut self, session: SessionId) {
        self.write_locks.retain(|_, holder| *holder != session);
        self.read_locks.retain(|_, readers| {
            readers.retain(|holder| *holder != session);
            !readers.is_empty()
        });
    }

    /// Releases a session's read locks on the given tables only.
    pub fn unlock_reads(&mut self, session: SessionId, names: &[NameRef]) {
        for name in names {
            if let Some(readers) = self.read_locks.get_mut(name) {
                readers.retain(|holder| *holder != session);
                if readers.is_empty() {
                    self.read_locks.remove(name);
                }
            }
        }
    }

    /// Returns true while the session already holds every lock the
    /// statement needs: exclusive on the write set, and no foreign
    /// writer over the read set.
    #[must_use]
    pub fn holds_locks(&self, session: SessionId, reads: &[NameRef], writes: &[NameRef]) -> bool {
        for name in writes {
            if is_unlockable(name) {
                continue;
            }
            if self.write_holder(name) != Some(session) {
                return false;
            }
            if self
                .readers_of(name)
                .iter()
                .any(|holder| *holder != session)
            {
                return false;
            }
        }

        for name in reads {
            if is_unlockable(name) {
                continue;
            }
            if let Some(holder) = self.write_holder(name) {
                if holder != session {
                    return false;
                }
            }
        }

        true
    }

    /// Number of held locks, writes plus read entries.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.write_locks.len() + self.read_locks.values().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_catalog::name::{NameRegistry, ObjectKind};

    fn table(registry: &NameRegistry, local: &str) -> NameRef {
        let owner = registry.new_name("SA", ObjectKind::Grantee);
        let schema = registry.new_schema_name("PUBLIC", owner);
        registry.new_object_name(local, ObjectKind::Table, schema)
    }

    #[test]
    fn test_write_lock_ownership() {
        let registry = NameRegistry::new();
        let t1 = table(&registry, "T1");
        let mut locks = LockTable::new();

        locks.lock_write(t1.clone(), SessionId::new(1));
        assert_eq!(locks.write_holder(&t1), Some(SessionId::new(1)));

        locks.unlock_all(SessionId::new(1));
        assert_eq!(locks.write_holder(&t1), None);
        assert_eq!(locks.lock_count(), 0);
    }

    #[test]
    fn test_shared_readers() {
        let registry = NameRegistry::new();
        let t1 = table(&registry, "T1");
        let mut locks = LockTable::new();

        locks.lock_read(t1.clone(), SessionId::new(1));
        locks.lock_read(t1.clone(), SessionId::new(2));
        locks.lock_read(t1.clone(), SessionId::new(2));
        assert_eq!(locks.readers_of(&t1).len(), 2);

        locks.unlock_reads(SessionId::new(1), &[t1.clone()]);
        assert_eq!(locks.readers_of(&t1), vec![SessionId::new(2)]);
    }

    #[test]
    fn test_holds_locks() {
        let registry = NameRegistry::new();
        let t1 = table(&registry, "T1");
        let t2 = table(&registry, "T2");
        let mut locks = LockTable::new();
        let me = SessionId::new(1);

        locks.lock_write(t1.clone(), me);
        assert!(locks.holds_locks(me, &[], &[t1.clone()]));
        assert!(locks.holds_locks(me, &[t2.clone()], &[t1.clone()]));

        // another session's write lock over my read set
        locks.lock_write(t2.clone(), SessionId::new(2));
        assert!(!locks.holds_locks(me, &[t2.clone()], &[t1.clone()]));

        // a foreign reader over my write set
        locks.lock_read(t1.clone(), SessionId::new(3));
        assert!(!locks.holds_locks(me, &[], &[t1]));
    }

    #[test]
    fn test_system_schema_names_exempt() {
        let registry = NameRegistry::new();
        let owner = registry.new_name("SA", ObjectKind::Grantee);
        let system = registry.new_schema_name(SYSTEM_SCHEMA, owner);
        let name = registry.new_object_name("SESSIONS", ObjectKind::Table, system);

        let mut locks = LockTable::new();
        locks.lock_write(name.clone(), SessionId::new(1));
        assert_eq!(locks.write_holder(&name), None);
        assert!(locks.holds_locks(SessionId::new(2), &[name.clone()], &[name]));
    }
}
