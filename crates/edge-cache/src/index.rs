//! Secondary index from logical path to the cache keys written for it.
//!
//! The index is a single record updated by read-modify-write. Concurrent
//! writers can lose each other's updates; it only drives invalidation and
//! enumeration and is never consulted to decide whether an entry is valid.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Store key of the index record.
pub const INDEX_KEY: &str = "meta:cache-index";

/// Path → cache keys, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathIndex {
    paths: BTreeMap<String, Vec<String>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` under `path`, evicting the oldest keys beyond `cap`.
    ///
    /// Returns whether the index changed.
    pub fn add(&mut self, path: &str, key: &str, cap: usize) -> bool {
        let keys = self.paths.entry(path.to_string()).or_default();
        if keys.iter().any(|k| k == key) {
            return false;
        }
        keys.push(key.to_string());
        if keys.len() > cap {
            let overflow = keys.len() - cap;
            keys.drain(..overflow);
        }
        true
    }

    /// Drop `key` wherever it appears. Returns whether it was present.
    pub fn remove_key(&mut self, key: &str) -> bool {
        let mut removed = false;
        self.paths.retain(|_, keys| {
            let before = keys.len();
            keys.retain(|k| k != key);
            removed |= keys.len() != before;
            !keys.is_empty()
        });
        removed
    }

    /// Drop `key` from the bucket of `path` only.
    pub fn remove_from(&mut self, path: &str, key: &str) -> bool {
        let Some(keys) = self.paths.get_mut(path) else {
            return false;
        };
        let before = keys.len();
        keys.retain(|k| k != key);
        let removed = keys.len() != before;
        if keys.is_empty() {
            self.paths.remove(path);
        }
        removed
    }

    /// Keys recorded for `path`.
    pub fn keys_for(&self, path: &str) -> &[String] {
        self.paths.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Keys of every path matching `pattern`.
    pub fn matching<'a>(&'a self, pattern: &'a Regex) -> impl Iterator<Item = &'a String> + 'a {
        self.paths
            .iter()
            .filter(move |(path, _)| pattern.is_match(path))
            .flat_map(|(_, keys)| keys.iter())
    }

    /// Number of indexed paths.
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Indexed paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.paths.keys()
    }
}

/// Compile a `*` glob into an anchored regex; everything else is literal.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped))
}
