//! Per-chunk grouping of encoded entries by target endpoint.

use std::collections::HashMap;

/// Key/payload pairs bound for one endpoint. Later inserts of a key win.
pub type Entries = HashMap<String, Vec<u8>>;

/// Encoded entries of one chunk, grouped by endpoint address.
#[derive(Debug, Default)]
pub struct Batch {
    by_endpoint: HashMap<String, Entries>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, endpoint: &str, key: String, payload: Vec<u8>) {
        match self.by_endpoint.get_mut(endpoint) {
            Some(entries) => {
                entries.insert(key, payload);
            }
            None => {
                self.by_endpoint
                    .insert(endpoint.to_string(), HashMap::from([(key, payload)]));
            }
        }
    }

    pub fn endpoints(&self) -> usize {
        self.by_endpoint.len()
    }

    /// Total distinct entries across all endpoints.
    pub fn entries(&self) -> usize {
        self.by_endpoint.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    pub fn into_endpoints(self) -> impl Iterator<Item = (String, Entries)> {
        self.by_endpoint.into_iter()
    }
}
