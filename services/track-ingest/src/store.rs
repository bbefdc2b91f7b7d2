//!
//! src/store.rs  Oct 18th, 2026
//!
//! Seams between the ingest orchestrator and the persistence backends:
//! a collection/document store, the dedup lookup built on top of it, and
//! the boolean write contract the rest of the system expects.
//!

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::errors::IngestError;
use crate::types::{DedupKey, TrackRecord};

/// Collection based document api (create-by-id, update-by-id, equality query)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn try_create(&self, collection: &str, id: &str, doc: &Value) ->
        Result<(), IngestError>;

    async fn try_update(&self, collection: &str, id: &str, fields: &Value) ->
        Result<(), IngestError>;

    async fn find_by_field(&self, collection: &str, field: &str, value: &str) ->
        Result<Vec<Value>, IngestError>;

    /// Writes never raise past this point; callers only learn true/false
    async fn create(&self, collection: &str, id: &str, doc: &Value) -> bool {
        match self.try_create(collection, id, doc).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, collection, id, "store.create.failed");
                false
            }
        }
    }

    async fn update(&self, collection: &str, id: &str, fields: &Value) -> bool {
        match self.try_update(collection, id, fields).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, collection, id, "store.update.failed");
                false
            }
        }
    }
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn find_by_fingerprint(&self, key: &DedupKey) ->
        Result<Vec<TrackRecord>, IngestError>;
}

/// Dedup lookups against the `fingerprint` field of the tracks collection
#[derive(Clone)]
pub struct TrackIndex {
    store: Arc<dyn DocumentStore>,
    collection: String
}

impl TrackIndex {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self { store, collection: collection.into() }
    }
}

#[async_trait]
impl DedupStore for TrackIndex {
    async fn find_by_fingerprint(&self, key: &DedupKey) ->
        Result<Vec<TrackRecord>, IngestError> {
        let docs = self.store
            .find_by_field(&self.collection, "fingerprint", key.as_str())
            .await
            .map_err(|e| match e {
                IngestError::StoreUnavailable(_) | IngestError::Validation(_) => e,
                other => IngestError::StoreUnavailable(other.to_string())
            })?;

        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<TrackRecord>(doc) {
                Ok(r) => records.push(r),
                Err(e) => {
                    // still a match; keep the key so the gate holds
                    warn!(error = %e, fingerprint = %key, "store.decode.partial");
                    records.push(TrackRecord {
                        fingerprint: key.0.clone(),
                        ..TrackRecord::default()
                    });
                }
            }
        }
        Ok(records)
    }
}

/// Checks a field name before it is spliced into a query path
pub fn validate_field(field: &str) -> Result<(), IngestError> {
    let ok = !field.is_empty()
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(IngestError::Validation(format!("invalid field name {field:?}")))
    }
}
