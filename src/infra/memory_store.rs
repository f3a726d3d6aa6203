//! In-memory resource store for tests and embedding.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::resource::normalize_path;
use crate::domain::{Resource, ResourceError, ResourceStore};

const SOURCE: &str = "infra::memory_store";

#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    resources: RwLock<HashMap<String, Arc<Resource>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the resource stored at its path.
    pub fn insert(&self, resource: Resource) -> Option<Arc<Resource>> {
        let path = resource.path().to_string();
        rw_write(&self.resources, SOURCE, "insert").insert(path, Arc::new(resource))
    }

    pub fn remove(&self, path: &str) -> Option<Arc<Resource>> {
        rw_write(&self.resources, SOURCE, "remove").remove(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        rw_read(&self.resources, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceStore for MemoryResourceStore {
    fn find(&self, path: &str) -> Result<Arc<Resource>, ResourceError> {
        let path = normalize_path(path);
        rw_read(&self.resources, SOURCE, "find")
            .get(&path)
            .cloned()
            .ok_or_else(|| ResourceError::not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_normalize_paths() {
        let store = MemoryResourceStore::new();
        store.insert(Resource::new("docs/intro", "text/markdown", "# Intro"));

        let found = store.find("/docs//intro/").expect("normalized lookup");
        assert_eq!(found.path(), "docs/intro");
        assert!(store.find("docs").expect_err("missing").is_not_found());
    }

    #[test]
    fn insert_replaces_previous_revision() {
        let store = MemoryResourceStore::new();
        assert!(store.insert(Resource::new("Home", "text/plain", "v1")).is_none());
        let previous = store
            .insert(Resource::new("Home", "text/plain", "v2"))
            .expect("replaced");

        assert_eq!(previous.text(), "v1");
        assert_eq!(store.find("Home").expect("found").text(), "v2");
        assert_eq!(store.len(), 1);

        store.remove("Home");
        assert!(store.is_empty());
    }
}
