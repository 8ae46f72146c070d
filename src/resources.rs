//! Per-note resource index: content hash → resource (+ uploaded URL).
//!
//! ## Why verify here
//!
//! ENML binds `<en-media hash="…">` to an attachment purely by the hash of
//! its decoded payload. A corrupt or truncated payload would otherwise be
//! uploaded and linked under a hash it does not have. Each resource's hash is
//! recomputed when the index is built; a mismatch drops that resource alone
//! and records a [`ResourceError::Integrity`], and the rest of the note
//! converts normally (the dangling reference becomes a conversion warning).

use crate::error::ResourceError;
use crate::model::{ContentHash, Resource};
use std::collections::HashMap;
use tracing::warn;

/// A verified resource and, once uploaded, its public URL.
#[derive(Debug, Clone)]
pub struct IndexedResource {
    pub resource: Resource,
    pub uploaded_url: Option<String>,
}

impl IndexedResource {
    pub fn uploaded_url(&self) -> Option<&str> {
        self.uploaded_url.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    entries: HashMap<ContentHash, IndexedResource>,
    /// Insertion order of first occurrence, for deterministic iteration.
    order: Vec<ContentHash>,
    integrity_errors: Vec<ResourceError>,
}

impl ResourceIndex {
    /// Verify and index `resources`. Duplicate hashes collapse to one entry
    /// (last write wins; the payloads are identical by definition).
    pub fn build(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut index = Self::default();
        for resource in resources {
            let computed = ContentHash::compute(&resource.data);
            if computed != resource.hash {
                warn!(
                    "Resource {} failed integrity check (payload hashes to {})",
                    resource.hash, computed
                );
                index.integrity_errors.push(ResourceError::Integrity {
                    declared: resource.hash.clone(),
                    computed,
                });
                continue;
            }
            let hash = resource.hash.clone();
            let entry = IndexedResource {
                resource,
                uploaded_url: None,
            };
            if index.entries.insert(hash.clone(), entry).is_none() {
                index.order.push(hash);
            }
        }
        index
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&IndexedResource> {
        self.entries.get(hash)
    }

    /// Look up by the hex string found in markup. Malformed hashes never match.
    pub fn lookup(&self, hex: &str) -> Option<&IndexedResource> {
        ContentHash::from_hex(hex)
            .ok()
            .and_then(|hash| self.entries.get(&hash))
    }

    pub fn url_for(&self, hash: &ContentHash) -> Option<&str> {
        self.entries.get(hash).and_then(IndexedResource::uploaded_url)
    }

    /// Attach the uploaded URL. Returns `false` if the hash is not indexed.
    pub fn set_url(&mut self, hash: &ContentHash, url: impl Into<String>) -> bool {
        match self.entries.get_mut(hash) {
            Some(entry) => {
                entry.uploaded_url = Some(url.into());
                true
            }
            None => false,
        }
    }

    /// Resources in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexedResource> {
        self.order.iter().filter_map(|h| self.entries.get(h))
    }

    /// Resources that still need an uploaded URL.
    pub fn pending(&self) -> Vec<Resource> {
        self.iter()
            .filter(|e| e.uploaded_url.is_none())
            .map(|e| e.resource.clone())
            .collect()
    }

    pub fn integrity_errors(&self) -> &[ResourceError] {
        &self.integrity_errors
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_pdf(&self) -> bool {
        self.iter().any(|e| e.resource.is_pdf())
    }

    pub fn contains_image(&self) -> bool {
        self.iter().any(|e| e.resource.is_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(bytes: &[u8]) -> Resource {
        Resource::from_bytes(bytes.to_vec(), "image/png")
    }

    #[test]
    fn indexes_by_hash() {
        let r = png(b"one");
        let hash = r.hash.clone();
        let index = ResourceIndex::build(vec![r]);
        assert_eq!(index.len(), 1);
        assert!(index.get(&hash).is_some());
        assert!(index.lookup(&hash.as_str().to_uppercase()).is_some());
        assert!(index.integrity_errors().is_empty());
    }

    #[test]
    fn duplicates_collapse() {
        let index = ResourceIndex::build(vec![png(b"same"), png(b"same")]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.iter().count(), 1);
    }

    #[test]
    fn corrupted_payload_is_isolated() {
        let good = png(b"good");
        let mut bad = png(b"original");
        bad.data = b"tampered".to_vec();
        let declared = bad.hash.clone();

        let index = ResourceIndex::build(vec![good.clone(), bad]);
        assert_eq!(index.len(), 1);
        assert!(index.get(&good.hash).is_some());
        assert!(index.get(&declared).is_none());
        assert_eq!(
            index.integrity_errors(),
            &[ResourceError::Integrity {
                declared,
                computed: ContentHash::compute(b"tampered"),
            }]
        );
    }

    #[test]
    fn set_url_and_pending() {
        let a = png(b"a");
        let b = Resource::from_bytes(b"%PDF".to_vec(), "application/pdf");
        let mut index = ResourceIndex::build(vec![a.clone(), b.clone()]);
        assert_eq!(index.pending().len(), 2);
        assert!(index.set_url(&a.hash, "https://cdn.example/a.png"));
        assert_eq!(index.url_for(&a.hash), Some("https://cdn.example/a.png"));
        assert_eq!(index.pending(), vec![b]);
        assert!(!index.set_url(&ContentHash::compute(b"zzz"), "https://x"));
        assert!(index.contains_pdf());
        assert!(index.contains_image());
    }

    #[test]
    fn malformed_lookup_is_none() {
        let index = ResourceIndex::build(vec![png(b"a")]);
        assert!(index.lookup("not-a-hash").is_none());
    }
}
