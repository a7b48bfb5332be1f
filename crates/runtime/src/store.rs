//! Persistence of remembered product ids.
//!
//! The manager remembers the product id of every board it has successfully
//! opened, so those boards auto-reconnect without re-approval. Where that
//! set lives is the embedder's concern; the manager only sees this trait.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// External storage for the remembered-product set.
pub trait ProductStore: Send {
    /// Loads the set. A missing store reads as empty.
    fn load(&self) -> Result<HashSet<u16>>;

    /// Rewrites the whole set.
    fn save(&self, products: &HashSet<u16>) -> Result<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct JsonProductStore {
    path: PathBuf,
}

impl JsonProductStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProductStore for JsonProductStore {
    fn load(&self) -> Result<HashSet<u16>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(HashSet::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, products: &HashSet<u16>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(products)?)?;
        Ok(())
    }
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MemoryProductStore {
    products: Arc<Mutex<HashSet<u16>>>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds the set with a product id.
    pub fn with_product(self, product_id: u16) -> Self {
        self.products.lock().insert(product_id);
        self
    }

    /// Snapshot of the current set.
    pub fn snapshot(&self) -> HashSet<u16> {
        self.products.lock().clone()
    }
}

impl ProductStore for MemoryProductStore {
    fn load(&self) -> Result<HashSet<u16>> {
        Ok(self.products.lock().clone())
    }

    fn save(&self, products: &HashSet<u16>) -> Result<()> {
        *self.products.lock() = products.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProductStore::new(dir.path().join("products.json"));

        assert!(store.load().unwrap().is_empty());

        let products: HashSet<u16> = [0x0005, 0x9800].into_iter().collect();
        store.save(&products).unwrap();
        assert_eq!(store.load().unwrap(), products);
    }

    #[test]
    fn json_store_treats_blank_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        std::fs::write(&path, "  ").unwrap();
        assert!(JsonProductStore::new(path).load().unwrap().is_empty());
    }

    #[test]
    fn memory_store_shares_state_across_clones() {
        let store = MemoryProductStore::new().with_product(7);
        let clone = store.clone();
        clone.save(&[9].into_iter().collect()).unwrap();
        assert_eq!(store.snapshot(), [9].into_iter().collect());
    }
}
