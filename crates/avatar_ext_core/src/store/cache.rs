//! Lazily-opened, reused object store handles.

use super::object_store::{ObjectStore, StoreLocation};
use super::schema::StoreDescriptor;
use super::StoreResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Caches one open handle per `(database name, version)`.
///
/// The first `open` for a pair opens (and, if needed, upgrades) the database;
/// later calls return the same handle.
#[derive(Debug)]
pub struct HandleCache {
    location: StoreLocation,
    handles: Mutex<HashMap<(String, u32), Arc<ObjectStore>>>,
}

impl HandleCache {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn open(
        &self,
        name: &str,
        stores: &[StoreDescriptor],
        version: u32,
    ) -> StoreResult<Arc<ObjectStore>> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let cache_key = (name.to_string(), version);
        if let Some(handle) = handles.get(&cache_key) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(ObjectStore::open(
            &self.location,
            name,
            stores,
            Some(version),
        )?);
        handles.insert(cache_key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
