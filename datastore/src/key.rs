use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The identifying part of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyId {
    /// A numeric id, allocated by the datastore.
    Id(i64),

    /// A caller-chosen name.
    Name(String),

    /// No id yet. The datastore allocates one on [`put`](crate::Datastore::put).
    Incomplete,
}

/// Addresses a single entity: a kind plus an id or name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    id: KeyId,
}

impl Key {
    /// A key without an id, to be allocated on insert.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Incomplete,
        }
    }

    /// A key with a numeric id.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Id(id),
        }
    }

    /// A key with a name.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Name(name.into()),
        }
    }

    /// The entity kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The id or name.
    pub fn key_id(&self) -> &KeyId {
        &self.id
    }

    /// The numeric id, if this key has one.
    pub fn as_id(&self) -> Option<i64> {
        match self.id {
            KeyId::Id(id) => Some(id),
            _ => None,
        }
    }

    /// The name, if this key has one.
    pub fn as_name(&self) -> Option<&str> {
        match &self.id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Whether the key identifies a single entity.
    pub fn is_complete(&self) -> bool {
        !matches!(self.id, KeyId::Incomplete)
    }

    pub(crate) fn with_id(&self, id: i64) -> Self {
        Self::id(self.kind.clone(), id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            KeyId::Id(id) => write!(f, "{}/{}", self.kind, id),
            KeyId::Name(name) => write!(f, "{}/{:?}", self.kind, name),
            KeyId::Incomplete => write!(f, "{}/?", self.kind),
        }
    }
}

/// A schemaless document stored under a [`Key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    key: Key,
    properties: Map<String, Value>,
}

impl Entity {
    /// An entity with no properties.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: Map::new(),
        }
    }

    /// Set a property, builder style.
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }

    /// Set a property.
    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(property.into(), value.into());
    }

    /// The entity key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Look up a property.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property)
    }

    /// All properties.
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub(crate) fn into_parts(self) -> (Key, Map<String, Value>) {
        (self.key, self.properties)
    }

    pub(crate) fn from_parts(key: Key, properties: Map<String, Value>) -> Self {
        Self { key, properties }
    }
}

/// An equality filter on one property.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    property: String,
    value: Value,
}

impl Filter {
    /// The filtered property.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// The value it must equal.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A query over one kind, with equality filters which must all match.
///
/// ```rust
/// use datastore::Query;
///
/// let query = Query::new("PackageStoreIndex").filter("name", "left-pad");
/// assert_eq!(query.kind(), "PackageStoreIndex");
/// assert_eq!(query.filters().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    kind: String,
    filters: Vec<Filter>,
}

impl Query {
    /// An unfiltered query over `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
        }
    }

    /// Add an equality filter.
    pub fn filter(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            property: property.into(),
            value: value.into(),
        });
        self
    }

    /// The kind queried.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The filters applied.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Whether an entity satisfies this query.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.key().kind() == self.kind
            && self
                .filters
                .iter()
                .all(|filter| entity.get(&filter.property) == Some(&filter.value))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_accessors() {
        let key = Key::id("PackageStoreIndex", 7);
        assert_eq!(key.as_id(), Some(7));
        assert_eq!(key.as_name(), None);
        assert!(key.is_complete());
        assert_eq!(key.to_string(), "PackageStoreIndex/7");

        let key = Key::name("Secret", "secret");
        assert_eq!(key.as_name(), Some("secret"));
        assert_eq!(key.to_string(), "Secret/\"secret\"");

        assert!(!Key::incomplete("PackageStoreIndex").is_complete());
    }

    #[test]
    fn query_matches() {
        let entity = Entity::new(Key::id("PackageStoreIndex", 1)).with("name", "left-pad");

        assert!(Query::new("PackageStoreIndex").matches(&entity));
        assert!(Query::new("PackageStoreIndex")
            .filter("name", "left-pad")
            .matches(&entity));
        assert!(!Query::new("PackageStoreIndex")
            .filter("name", "right-pad")
            .matches(&entity));
        assert!(!Query::new("Secret").matches(&entity));
        assert!(!Query::new("PackageStoreIndex")
            .filter("version", json!("1.0.0"))
            .matches(&entity));
    }
}
