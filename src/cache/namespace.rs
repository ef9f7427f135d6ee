//! In-memory contents of one namespace, kept in insertion order.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::cache::entry::{CacheEntry, CachedResponse, RequestKey};

/// Entries of a single namespace.
///
/// `entries` answers lookups; `order` maps insertion sequence to key so the
/// oldest entry is always the first key of the tree.
#[derive(Debug, Default)]
pub struct Namespace {
    entries: HashMap<RequestKey, CacheEntry>,
    order: BTreeMap<u64, RequestKey>,
    next_seq: u64,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Sequence number the next insert will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Insert or replace an entry. A replaced key moves to the newest position.
    ///
    /// Returns the previous entry for the key, if any.
    pub fn insert(&mut self, key: RequestKey, response: CachedResponse) -> Option<CacheEntry> {
        let entry = CacheEntry {
            key,
            response,
            seq: self.next_seq,
            stored_at: Utc::now(),
        };
        self.restore(entry)
    }

    /// Insert an entry that already carries its sequence (e.g. loaded from disk).
    pub fn restore(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let previous = self.entries.remove(&entry.key);
        if let Some(prev) = &previous {
            self.order.remove(&prev.seq);
        }
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.order.insert(entry.seq, entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
        previous
    }

    pub fn remove(&mut self, key: &RequestKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    /// The oldest entry by insertion order.
    pub fn oldest(&self) -> Option<&CacheEntry> {
        self.order
            .values()
            .next()
            .and_then(|key| self.entries.get(key))
    }

    /// Remove and return the oldest entry.
    pub fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key)
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> Vec<RequestKey> {
        self.order.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RequestKey {
        RequestKey::from_url(&reqwest::Url::parse(&format!("https://app.example{path}")).unwrap())
    }

    fn resp(body: &str) -> CachedResponse {
        CachedResponse::new(200, vec![], body.to_string())
    }

    #[test]
    fn test_insertion_order() {
        let mut ns = Namespace::new();
        ns.insert(key("/a"), resp("a"));
        ns.insert(key("/b"), resp("b"));
        ns.insert(key("/c"), resp("c"));

        assert_eq!(ns.keys(), vec![key("/a"), key("/b"), key("/c")]);
        assert_eq!(ns.oldest().unwrap().key, key("/a"));
    }

    #[test]
    fn test_replace_moves_to_newest() {
        let mut ns = Namespace::new();
        ns.insert(key("/a"), resp("a"));
        ns.insert(key("/b"), resp("b"));
        let prev = ns.insert(key("/a"), resp("a2"));

        assert_eq!(prev.unwrap().response.body, "a");
        assert_eq!(ns.len(), 2);
        assert_eq!(ns.keys(), vec![key("/b"), key("/a")]);
        assert_eq!(ns.get(&key("/a")).unwrap().response.body, "a2");
    }

    #[test]
    fn test_pop_oldest() {
        let mut ns = Namespace::new();
        ns.insert(key("/a"), resp("a"));
        ns.insert(key("/b"), resp("b"));

        assert_eq!(ns.pop_oldest().unwrap().key, key("/a"));
        assert_eq!(ns.pop_oldest().unwrap().key, key("/b"));
        assert!(ns.pop_oldest().is_none());
        assert!(ns.is_empty());
    }

    #[test]
    fn test_restore_advances_sequence() {
        let mut ns = Namespace::new();
        ns.restore(CacheEntry {
            key: key("/old"),
            response: resp("old"),
            seq: 41,
            stored_at: Utc::now(),
        });
        assert_eq!(ns.next_seq(), 42);

        ns.insert(key("/new"), resp("new"));
        assert_eq!(ns.get(&key("/new")).unwrap().seq, 42);
        assert_eq!(ns.oldest().unwrap().key, key("/old"));
    }
}
