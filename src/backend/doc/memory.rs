//! In-memory document store used by tests and as the reference
//! implementation of [`DocStore`](super::DocStore) semantics.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::condition::Condition;
use crate::error::Error;
use crate::model::Document;

use super::DocStore;

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    sequences: Mutex<HashMap<String, i64>>,
    find_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of find calls served so far. Lets tests assert that lazy
    /// resolution batches to one query per relationship field.
    pub fn find_count(&self) -> u64 {
        self.find_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocStore for MemoryStore {
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), Error> {
        let mut collections = self.collections.lock().unwrap();
        collections.entry(collection.to_string()).or_default().push(doc);
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Condition) -> Result<Vec<Document>, Error> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Condition,
        set: Document,
        unset: &[String],
    ) -> Result<u64, Error> {
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut touched = 0u64;
        for doc in docs.iter_mut() {
            if !filter.matches(doc) {
                continue;
            }
            for (key, value) in &set {
                doc.insert(key.clone(), value.clone());
            }
            for key in unset {
                doc.remove(key);
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete(&self, collection: &str, filter: &Condition) -> Result<u64, Error> {
        let mut collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }

    async fn count(&self, collection: &str, filter: &Condition) -> Result<u64, Error> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).count() as u64)
            .unwrap_or(0))
    }

    async fn next_sequence(&self, collection: &str) -> Result<i64, Error> {
        let mut sequences = self.sequences.lock().unwrap();
        let next = sequences.entry(collection.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}
