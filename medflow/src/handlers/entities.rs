//! In-memory entity collections used by the reference handlers

use crate::common::ulid_generator::generate_monotonic_ulid_string;
use dashmap::DashMap;
use serde_json::Value;

/// Registered patients
pub const PATIENTS: &str = "patients";
/// Medical records
pub const RECORDS: &str = "records";
/// Prescriptions
pub const PRESCRIPTIONS: &str = "prescriptions";
/// Consent grants and revocations
pub const CONSENTS: &str = "consents";
/// Audio transcripts
pub const TRANSCRIPTS: &str = "transcripts";

/// Named collections of JSON documents keyed by id
#[derive(Debug, Default)]
pub struct EntityStore {
    collections: DashMap<String, DashMap<String, Value>>,
}

impl EntityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh id of the form `{prefix}_{ulid}`
    pub fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, generate_monotonic_ulid_string())
    }

    /// Insert or replace a document, returning the previous one
    pub fn insert(&self, collection: &str, id: &str, document: Value) -> Option<Value> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document)
    }

    /// Fetch a document
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id).map(|doc| doc.value().clone()))
    }

    /// Whether a document exists
    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id))
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    /// Every document in a collection, ordered by id
    pub fn list(&self, collection: &str) -> Vec<Value> {
        let Some(docs) = self.collections.get(collection) else {
            return Vec::new();
        };
        let mut entries: Vec<(String, Value)> = docs
            .iter()
            .map(|doc| (doc.key().clone(), doc.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, doc)| doc).collect()
    }

    /// First document matching `predicate`, in no particular order
    pub fn find<F>(&self, collection: &str, predicate: F) -> Option<Value>
    where
        F: Fn(&Value) -> bool,
    {
        self.collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|doc| predicate(doc.value()))
                .map(|doc| doc.value().clone())
        })
    }
}
