//! Label id → person name mapping.

use crate::types::{LabelId, Person};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("label file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("label file format: {0}")]
    Format(#[from] serde_json::Error),
    #[error("label key {0:?} is not an integer id")]
    BadKey(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelStore {
    names: BTreeMap<LabelId, String>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: LabelId, name: impl Into<String>) {
        self.names.insert(label, name.into());
    }

    pub fn name(&self, label: LabelId) -> Option<&str> {
        self.names.get(&label).map(String::as_str)
    }

    pub fn contains(&self, label: LabelId) -> bool {
        self.names.contains_key(&label)
    }

    pub fn person(&self, label: LabelId) -> Option<Person> {
        self.name(label).map(|name| Person {
            label,
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// People ordered by label id.
    pub fn iter(&self) -> impl Iterator<Item = (LabelId, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// JSON object keyed by the decimal label id.
    pub fn to_json(&self) -> Result<Vec<u8>, LabelError> {
        let encoded: BTreeMap<String, &str> = self
            .iter()
            .map(|(id, name)| (id.to_string(), name))
            .collect();
        Ok(serde_json::to_vec_pretty(&encoded)?)
    }

    /// Parse the JSON form, turning string keys back into integer ids.
    pub fn from_json(bytes: &[u8]) -> Result<Self, LabelError> {
        let raw: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
        let mut store = Self::new();
        for (key, name) in raw {
            let id: LabelId = key.trim().parse().map_err(|_| LabelError::BadKey(key.clone()))?;
            store.insert(id, name);
        }
        Ok(store)
    }

    pub fn read(path: &Path) -> Result<Self, LabelError> {
        Self::from_json(&std::fs::read(path)?)
    }
}

impl FromIterator<(LabelId, String)> for LabelStore {
    fn from_iter<I: IntoIterator<Item = (LabelId, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keys_are_strings() {
        let store: LabelStore =
            [(0, "Alice".to_string()), (10, "Bob".to_string())].into_iter().collect();
        let json: serde_json::Value = serde_json::from_slice(&store.to_json().unwrap()).unwrap();
        assert_eq!(json["0"], "Alice");
        assert_eq!(json["10"], "Bob");
    }

    #[test]
    fn test_from_json_decodes_integer_keys() {
        let store = LabelStore::from_json(br#"{"0": "Alice", "2": "Carol"}"#).unwrap();
        assert_eq!(store.name(0), Some("Alice"));
        assert_eq!(store.name(2), Some("Carol"));
        assert!(!store.contains(1));
        assert_eq!(
            store.person(2),
            Some(Person {
                label: 2,
                name: "Carol".into(),
            })
        );
    }

    #[test]
    fn test_from_json_rejects_bad_key() {
        let err = LabelStore::from_json(br#"{"alice": "Alice"}"#).unwrap_err();
        assert!(matches!(err, LabelError::BadKey(k) if k == "alice"));
    }

    #[test]
    fn test_iter_ordered_by_id() {
        let store: LabelStore = [(3, "c".to_string()), (1, "a".to_string())].into_iter().collect();
        let ids: Vec<_> = store.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
