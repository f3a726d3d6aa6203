use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "context::response";

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_DISPOSITION: &str = "content-disposition";

/// Response metadata (header name → value) shared by every context of one
/// render tree.
///
/// Cloning yields another handle to the same map. Header names are stored
/// lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ResponseMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> Option<String> {
        mutex_lock(&self.inner, SOURCE, "set").insert(name.to_ascii_lowercase(), value.into())
    }

    /// Set `name` unless a value is already present. Returns whether it was set.
    pub fn set_default(&self, name: &str, value: impl Into<String>) -> bool {
        let mut map = mutex_lock(&self.inner, SOURCE, "set_default");
        let key = name.to_ascii_lowercase();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value.into());
        true
    }

    pub fn get(&self, name: &str) -> Option<String> {
        mutex_lock(&self.inner, SOURCE, "get")
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        mutex_lock(&self.inner, SOURCE, "remove").remove(&name.to_ascii_lowercase())
    }

    pub fn merge(&self, other: &BTreeMap<String, String>) {
        let mut map = mutex_lock(&self.inner, SOURCE, "merge");
        for (name, value) in other {
            map.insert(name.to_ascii_lowercase(), value.clone());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        mutex_lock(&self.inner, SOURCE, "snapshot").clone()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when both handles point at the same underlying map.
    pub fn shares_with(&self, other: &ResponseMeta) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let meta = ResponseMeta::new();
        meta.set("Content-Type", "text/html");
        assert_eq!(meta.get("content-type").as_deref(), Some("text/html"));
        assert_eq!(meta.get(CONTENT_TYPE).as_deref(), Some("text/html"));
    }

    #[test]
    fn set_default_keeps_existing_value() {
        let meta = ResponseMeta::new();
        assert!(meta.set_default(CONTENT_TYPE, "text/plain"));
        assert!(!meta.set_default(CONTENT_TYPE, "text/html"));
        assert_eq!(meta.get(CONTENT_TYPE).as_deref(), Some("text/plain"));
    }

    #[test]
    fn clones_share_the_same_map() {
        let meta = ResponseMeta::new();
        let handle = meta.clone();
        handle.set("X-Trace", "1");

        assert!(meta.shares_with(&handle));
        assert_eq!(meta.get("x-trace").as_deref(), Some("1"));
        assert!(!meta.shares_with(&ResponseMeta::new()));
    }
}
