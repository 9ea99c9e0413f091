//! Browser `localStorage` behind the storage contract.

use dapp_connect_core::Storage;
use gloo_storage::{LocalStorage as Browser, Storage as _};
use regex::Regex;

/// Values are stored raw (no JSON encoding) so keys written by wallet SDKs
/// stay readable by them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    fn keys() -> Vec<String> {
        let raw = Browser::raw();
        let len = raw.length().unwrap_or(0);
        (0..len)
            .filter_map(|i| raw.key(i).ok().flatten())
            .collect()
    }
}

impl Storage for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        Browser::raw().get_item(key).ok().flatten()
    }

    fn set(&self, key: &str, value: &str) {
        if Browser::raw().set_item(key, value).is_err() {
            tracing::warn!(%key, "localStorage write failed");
        }
    }

    fn remove(&self, key: &str) {
        let _ = Browser::raw().remove_item(key);
    }

    fn remove_by_pattern(&self, pattern: &Regex) {
        // Snapshot first: removal shifts the remaining indices.
        let raw = Browser::raw();
        for key in Self::keys().iter().filter(|k| pattern.is_match(k)) {
            let _ = raw.remove_item(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn values_round_trip_unencoded() {
        let storage = LocalStorage;
        storage.set("dcl-test:plain", "0x1");

        assert_eq!(storage.get("dcl-test:plain").as_deref(), Some("0x1"));
        assert_eq!(
            Browser::raw().get_item("dcl-test:plain").ok().flatten().as_deref(),
            Some("0x1")
        );

        storage.remove("dcl-test:plain");
        assert_eq!(storage.get("dcl-test:plain"), None);
    }

    #[wasm_bindgen_test]
    fn pattern_removal_clears_adjacent_matches() {
        let storage = LocalStorage;
        for key in ["wc@2:core:a", "wc@2:core:b", "wc@2:core:c", "dcl-test:keep"] {
            storage.set(key, "{}");
        }

        storage.remove_by_pattern(&Regex::new("^wc@2:").expect("pattern"));

        assert!(LocalStorage::keys().iter().all(|k| !k.starts_with("wc@2:")));
        assert_eq!(storage.get("dcl-test:keep").as_deref(), Some("{}"));
        storage.remove("dcl-test:keep");
    }
}
