//! Hash-mode persistence: one hash field per document field.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::Document;
use crate::error::Error;
use crate::location::{self, Location};
use crate::retry::RetryPolicy;
use crate::store::KvStore;

/// Stores each document as a hash under `schemaId:location`, so single
/// fields can be read without fetching the whole document.
#[derive(Clone)]
pub struct HashDocumentStore {
    store: Arc<dyn KvStore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HashDocumentStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Writes the fields of `document` into the hash at `location`.
    ///
    /// Fields already stored but absent from `document` are kept. A `ttl`
    /// resets the expiry of the whole hash.
    pub async fn put(
        &self,
        schema_id: &str,
        location: &Location,
        document: &Document,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(Error::invalid("ttl must be positive"));
        }
        let key = location::document_key(schema_id, location)?;
        let fields = document.to_field_table()?;
        if fields.is_empty() {
            return Ok(());
        }
        debug!(%key, fields = fields.len(), ?ttl, "HSET");

        self.retry
            .execute_cancellable(&self.cancel, || {
                self.store.hash_set(&key, fields.clone(), ttl)
            })
            .await
    }

    /// Reads every field of the document at `location`.
    pub async fn get(&self, schema_id: &str, location: &Location) -> Result<Document, Error> {
        let key = location::document_key(schema_id, location)?;
        debug!(%key, "HGETALL");

        let entries = self
            .retry
            .execute_cancellable(&self.cancel, || self.store.hash_get_all(&key))
            .await?;
        Ok(Document::from_field_table(entries))
    }

    /// Reads only `fields`. Fields that are not stored are left out of the
    /// result.
    pub async fn get_fields(
        &self,
        schema_id: &str,
        location: &Location,
        fields: &[&str],
    ) -> Result<Document, Error> {
        let key = location::document_key(schema_id, location)?;
        let names: Vec<String> = fields.iter().map(|f| (*f).to_owned()).collect();
        debug!(%key, fields = ?names, "HMGET");

        let values = self
            .retry
            .execute_cancellable(&self.cancel, || self.store.hash_get_many(&key, &names))
            .await?;
        Ok(Document::from_field_table(
            names
                .into_iter()
                .zip(values)
                .filter_map(|(name, value)| value.map(|v| (name, v))),
        ))
    }

    /// Reads one field's stored string without decoding it.
    pub async fn get_field(
        &self,
        schema_id: &str,
        location: &Location,
        field: &str,
    ) -> Result<Option<String>, Error> {
        let key = location::document_key(schema_id, location)?;
        debug!(%key, field, "HGET");

        self.retry
            .execute_cancellable(&self.cancel, || self.store.hash_get(&key, field))
            .await
    }

    /// Removes the whole hash. Returns whether it existed.
    pub async fn delete(&self, schema_id: &str, location: &Location) -> Result<bool, Error> {
        let key = location::document_key(schema_id, location)?;
        debug!(%key, "UNLINK");

        self.retry
            .execute_cancellable(&self.cancel, || self.store.delete(&key))
            .await
    }
}
