//! Generic typed sled tree wrapper.
//!
//! [`Tree<T>`] serializes values with bincode on write and
//! deserializes on read. Keys are caller-built `/`-separated paths;
//! node ids are UUIDs and point types/keys must not contain `/`, so
//! prefix scans are unambiguous.

use serde::de::DeserializeOwned;
use serde::Serialize;

use meshpoint_types::{MeshpointError, Result};

pub(crate) struct Tree<T> {
    tree: sled::Tree,
    _marker: std::marker::PhantomData<T>,
}

fn storage_err(what: &str, e: impl std::fmt::Display) -> MeshpointError {
    MeshpointError::Storage {
        reason: format!("{what}: {e}"),
    }
}

impl<T> Tree<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(tree: sled::Tree) -> Self {
        Self {
            tree,
            _marker: std::marker::PhantomData,
        }
    }

    /// Retrieves and deserializes a value; `Ok(None)` when absent.
    pub(crate) fn get(&self, key: &str) -> Result<Option<T>> {
        let raw = self
            .tree
            .get(key)
            .map_err(|e| storage_err("sled get failed", e))?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| storage_err("stored value corrupt", e))?;
                Ok(Some(value))
            }
        }
    }

    /// Serializes and inserts a value, replacing any existing one.
    pub(crate) fn insert(&self, key: &str, value: &T) -> Result<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| storage_err("serialize failed", e))?;
        self.tree
            .insert(key, bytes)
            .map_err(|e| storage_err("sled insert failed", e))?;
        Ok(())
    }

    /// True when the key exists.
    pub(crate) fn contains_key(&self, key: &str) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| storage_err("sled contains_key failed", e))
    }

    /// All `(key, value)` pairs under a key prefix, in lexicographic
    /// key order.
    pub(crate) fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, bytes) = item.map_err(|e| storage_err("sled scan failed", e))?;
            let key = String::from_utf8_lossy(&key).to_string();
            let value = bincode::deserialize(&bytes)
                .map_err(|e| storage_err("stored value corrupt", e))?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// All `(key, value)` pairs in the tree.
    pub(crate) fn iter_all(&self) -> Result<Vec<(String, T)>> {
        self.scan_prefix("")
    }
}
