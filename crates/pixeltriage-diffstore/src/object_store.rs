//! The object-store interface consumed by `DiffStore` (spec §6): `get`
//! streams bytes plus the object's declared MD5, `insert`/`delete` exist
//! for tests and admin tooling.

use md5::{Digest as _, Md5};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ObjectBytes {
    pub bytes: Vec<u8>,
    pub md5_base64: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },
}

pub trait ObjectStore: Send + Sync {
    fn get(&self, bucket: &str, path: &str) -> Result<ObjectBytes, ObjectStoreError>;
    fn insert(&self, bucket: &str, path: &str, body: &[u8]);
    fn delete(&self, bucket: &str, path: &str);
}

fn md5_base64(bytes: &[u8]) -> String {
    use base64::Engine;
    let digest = Md5::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// In-memory reference implementation (spec §6 "Object store (consumed)").
/// Used by tests and by a standalone/dev deployment with no real bucket
/// backend.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, bucket: &str, path: &str) -> Result<ObjectBytes, ObjectStoreError> {
        let objects = self.objects.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (bucket.to_string(), path.to_string());
        let bytes = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound { bucket: bucket.to_string(), path: path.to_string() })?;
        let md5_base64 = md5_base64(&bytes);
        Ok(ObjectBytes { bytes, md5_base64 })
    }

    fn insert(&self, bucket: &str, path: &str, body: &[u8]) {
        let mut objects = self.objects.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        objects.insert((bucket.to_string(), path.to_string()), body.to_vec());
    }

    fn delete(&self, bucket: &str, path: &str) {
        let mut objects = self.objects.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        objects.remove(&(bucket.to_string(), path.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_returns_matching_md5() {
        let store = MemoryObjectStore::new();
        store.insert("b", "p", b"hello");
        let got = store.get("b", "p").unwrap();
        assert_eq!(got.bytes, b"hello");
        assert_eq!(got.md5_base64, md5_base64(b"hello"));
    }

    #[test]
    fn missing_object_errors() {
        let store = MemoryObjectStore::new();
        assert!(matches!(store.get("b", "missing"), Err(ObjectStoreError::NotFound { .. })));
    }
}
