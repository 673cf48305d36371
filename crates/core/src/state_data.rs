//! String map with case-insensitive key lookup, used for job state data.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Map of state data entries.
///
/// Lookups ignore ASCII/Unicode case; iteration yields the keys as they were
/// last written. Inserting a key that differs only in case replaces the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseInsensitiveMap {
    entries: BTreeMap<String, (String, String)>,
}

impl CaseInsensitiveMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn fold(key: &str) -> String {
        key.to_lowercase()
    }

    /// Insert or replace an entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        self.entries
            .insert(Self::fold(&key), (key, value.into()))
            .map(|(_, old)| old)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&Self::fold(key)).map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Self::fold(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&Self::fold(key)).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, value)` pairs with their original key spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for CaseInsensitiveMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for CaseInsensitiveMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for CaseInsensitiveMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}
