// KvStore: the put/get/range contract the journal and user-template store
// need from the embedded key-value engine. The engine itself is an
// external collaborator — only this contract matters here.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("store error: {0}")]
    Backend(String),
}

pub trait KvStore: Send + Sync {
    fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    /// Inclusive range scan, in key order.
    fn range(&self, bucket: &str, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
    fn delete(&self, bucket: &str, key: &[u8]) -> Result<(), KvError>;
    fn scan_all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        (**self).put(bucket, key, value)
    }

    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        (**self).get(bucket, key)
    }

    fn range(&self, bucket: &str, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        (**self).range(bucket, from, to)
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<(), KvError> {
        (**self).delete(bucket, key)
    }

    fn scan_all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        (**self).scan_all(bucket)
    }
}

/// Embedded, on-disk default implementation.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, KvError> {
        let db = sled::open(path).map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    fn tree(&self, bucket: &str) -> Result<sled::Tree, KvError> {
        self.db
            .open_tree(bucket)
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

impl KvStore for SledStore {
    fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let tree = self.tree(bucket)?;
        tree.insert(key, value)
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let tree = self.tree(bucket)?;
        Ok(tree
            .get(key)
            .map_err(|e| KvError::Backend(e.to_string()))?
            .map(|v| v.to_vec()))
    }

    fn range(&self, bucket: &str, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let tree = self.tree(bucket)?;
        let mut out = Vec::new();
        for item in tree.range(from.to_vec()..=to.to_vec()) {
            let (k, v) = item.map_err(|e| KvError::Backend(e.to_string()))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<(), KvError> {
        let tree = self.tree(bucket)?;
        tree.remove(key).map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(())
    }

    fn scan_all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let tree = self.tree(bucket)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (k, v) = item.map_err(|e| KvError::Backend(e.to_string()))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

/// In-memory implementation used by tests: avoids touching disk while
/// preserving the ordered-key range-scan semantics the journal relies on.
#[derive(Default)]
pub struct MemStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemStore {
    fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let buckets = self.buckets.lock().unwrap();
        Ok(buckets.get(bucket).and_then(|b| b.get(key).cloned()))
    }

    fn range(&self, bucket: &str, from: &[u8], to: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let buckets = self.buckets.lock().unwrap();
        let Some(b) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(b.range(from.to_vec()..=to.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<(), KvError> {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some(b) = buckets.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    fn scan_all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let buckets = self.buckets.lock().unwrap();
        Ok(buckets
            .get(bucket)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_round_trips_and_ranges() {
        let store = MemStore::new();
        store.put("B", b"a", b"1").unwrap();
        store.put("B", b"b", b"2").unwrap();
        store.put("B", b"c", b"3").unwrap();

        assert_eq!(store.get("B", b"b").unwrap(), Some(b"2".to_vec()));
        let range = store.range("B", b"a", b"b").unwrap();
        assert_eq!(range.len(), 2);

        store.delete("B", b"a").unwrap();
        assert_eq!(store.get("B", b"a").unwrap(), None);
    }

    #[test]
    fn sled_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();
        store.put("Operations", b"k1", b"v1").unwrap();
        assert_eq!(store.get("Operations", b"k1").unwrap(), Some(b"v1".to_vec()));
    }
}
