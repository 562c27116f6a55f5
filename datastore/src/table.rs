use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::{Entity, Key, KeyId, Query};

/// Entities for one namespace, ordered by key.
///
/// Numeric ids are allocated from a monotonic counter, so within a kind
/// entities come back in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "TableFile", into = "TableFile")]
pub(crate) struct Table {
    next_id: i64,
    entities: BTreeMap<Key, Map<String, Value>>,
}

impl Table {
    pub(crate) fn get(&self, key: &Key) -> Option<Entity> {
        self.entities
            .get(key)
            .map(|properties| Entity::from_parts(key.clone(), properties.clone()))
    }

    /// Insert or replace an entity, allocating an id for incomplete keys.
    pub(crate) fn put(&mut self, entity: Entity) -> Key {
        let (key, properties) = entity.into_parts();
        let key = match key.key_id() {
            KeyId::Incomplete => {
                self.next_id += 1;
                key.with_id(self.next_id)
            }
            KeyId::Id(id) => {
                self.next_id = self.next_id.max(*id);
                key
            }
            KeyId::Name(_) => key,
        };

        self.entities.insert(key.clone(), properties);
        key
    }

    pub(crate) fn delete(&mut self, key: &Key) -> bool {
        self.entities.remove(key).is_some()
    }

    pub(crate) fn query(&self, query: &Query) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|(key, _)| key.kind() == query.kind())
            .map(|(key, properties)| Entity::from_parts(key.clone(), properties.clone()))
            .filter(|entity| query.matches(entity))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    next_id: i64,
    entities: Vec<Entity>,
}

impl From<TableFile> for Table {
    fn from(value: TableFile) -> Self {
        let mut table = Table {
            next_id: value.next_id,
            entities: BTreeMap::new(),
        };
        for entity in value.entities {
            table.put(entity);
        }
        table
    }
}

impl From<Table> for TableFile {
    fn from(value: Table) -> Self {
        TableFile {
            next_id: value.next_id,
            entities: value
                .entities
                .into_iter()
                .map(|(key, properties)| Entity::from_parts(key, properties))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_increasing_ids() {
        let mut table = Table::default();
        let a = table.put(Entity::new(Key::incomplete("Index")).with("name", "a"));
        let b = table.put(Entity::new(Key::incomplete("Index")).with("name", "b"));
        assert_eq!(a.as_id(), Some(1));
        assert_eq!(b.as_id(), Some(2));

        let names: Vec<_> = table
            .query(&Query::new("Index"))
            .iter()
            .map(|entity| entity.get("name").cloned())
            .collect();
        assert_eq!(names, vec![Some("a".into()), Some("b".into())]);
    }

    #[test]
    fn explicit_ids_advance_counter() {
        let mut table = Table::default();
        table.put(Entity::new(Key::id("Index", 10)));
        let key = table.put(Entity::new(Key::incomplete("Index")));
        assert_eq!(key.as_id(), Some(11));
    }

    #[test]
    fn serde_preserves_counter() {
        let mut table = Table::default();
        table.put(Entity::new(Key::incomplete("Index")).with("name", "a"));
        let key = table.put(Entity::new(Key::incomplete("Index")).with("name", "b"));
        table.delete(&key);

        let json = serde_json::to_string(&table).unwrap();
        let mut restored: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 1);

        let key = restored.put(Entity::new(Key::incomplete("Index")));
        assert_eq!(key.as_id(), Some(3));
    }
}
