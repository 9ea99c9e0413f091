use std::collections::BTreeMap;
use std::sync::Mutex;

use regex::Regex;

use crate::ports::Storage;

/// Process-local storage, used off-browser and in tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(g) => g.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut g) = self.entries.lock() {
            g.insert(key.to_owned(), value.to_owned());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut g) = self.entries.lock() {
            g.remove(key);
        }
    }

    fn remove_by_pattern(&self, pattern: &Regex) {
        if let Ok(mut g) = self.entries.lock() {
            g.retain(|key, _| !pattern.is_match(key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_read_as_none() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("nope"), None);
        storage.remove("nope");
    }

    #[test]
    fn pattern_removal_only_touches_matching_keys() {
        let storage = MemoryStorage::new();
        storage.set("wc@2:core:0.3//keychain", "a");
        storage.set("wc@2:client:0.3//session", "b");
        storage.set("decentraland-connect-storage-key", "c");

        storage.remove_by_pattern(&Regex::new("^wc@2:").expect("regex"));

        assert_eq!(storage.keys(), vec!["decentraland-connect-storage-key".to_owned()]);
    }
}
