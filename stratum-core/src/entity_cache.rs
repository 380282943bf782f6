//! Transaction-scoped identity cache for records read from the database.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::record::{Record, TypeHandle};
use crate::value::BindValue;

/// Isolation level of the transaction an [`EntityCache`] belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Whether rows read twice in one transaction are guaranteed to agree.
    pub fn caches_entities(self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

type EntityKey = (TypeHandle, SmallVec<[BindValue; 2]>);

fn entity_key(record: TypeHandle, key: &[BindValue]) -> EntityKey {
    (record, SmallVec::from(key))
}

/// Records seen in one transaction, keyed by type and primary key.
///
/// Created by the caller per transaction and dropped with it. Under
/// isolation levels that allow non-repeatable reads the cache stays empty.
#[derive(Debug, Default)]
pub struct EntityCache {
    isolation: IsolationLevel,
    entries: RwLock<HashMap<EntityKey, Arc<dyn Record>>>,
}

impl EntityCache {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_enabled(&self) -> bool {
        self.isolation.caches_entities()
    }

    pub fn get(&self, record: TypeHandle, key: &[BindValue]) -> Option<Arc<dyn Record>> {
        if !self.is_enabled() {
            return None;
        }
        self.entries.read().get(&entity_key(record, key)).cloned()
    }

    /// Returns the instance already cached under `key`, or caches `instance`.
    pub fn intern(&self, key: Vec<BindValue>, instance: Arc<dyn Record>) -> Arc<dyn Record> {
        if !self.is_enabled() {
            return instance;
        }
        let handle = instance.handle();
        self.entries
            .write()
            .entry((handle, SmallVec::from_vec(key)))
            .or_insert(instance)
            .clone()
    }

    /// Drops the cached instance, e.g. after the row was updated or deleted.
    pub fn evict(&self, record: TypeHandle, key: &[BindValue]) -> Option<Arc<dyn Record>> {
        self.entries.write().remove(&entity_key(record, key))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
