//! Synchronous wrappers around the async persistence layers.
//!
//! Each wrapper owns a tokio runtime and drives the async layer with
//! `block_on`. They must not be called from inside another runtime.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::runtime::Runtime;

use crate::blob_store::{DocumentStore, LocationStream};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::Error;
use crate::hash_store::HashDocumentStore;
use crate::location::Location;
use crate::redis_store::RedisStore;
use crate::store::KvStore;

/// Opens the Redis connection inside `runtime`, so the connection's
/// background tasks live as long as the runtime does.
fn connect_in(runtime: &Runtime, config: &StoreConfig) -> Result<Arc<dyn KvStore>, Error> {
    let store = runtime.block_on(RedisStore::connect(config))?;
    Ok(Arc::new(store))
}

/// Blocking counterpart of [`DocumentStore`].
pub struct BlockingDocumentStore {
    inner: DocumentStore,
    runtime: Runtime,
}

impl BlockingDocumentStore {
    pub fn new(store: Arc<dyn KvStore>) -> Result<Self, Error> {
        Self::from_async(DocumentStore::new(store))
    }

    /// Wraps an already configured async layer.
    pub fn from_async(inner: DocumentStore) -> Result<Self, Error> {
        Ok(Self {
            inner,
            runtime: Runtime::new()?,
        })
    }

    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        let runtime = Runtime::new()?;
        let store = connect_in(&runtime, config)?;
        let inner = DocumentStore::new(store).with_retry_policy(config.retry_policy()?);
        Ok(Self { inner, runtime })
    }

    pub fn put(
        &self,
        schema_id: &str,
        location: &Location,
        document: &Document,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        self.runtime
            .block_on(self.inner.put(schema_id, location, document, ttl))
    }

    pub fn put_many(
        &self,
        schema_id: &str,
        documents: &[(Location, Document)],
    ) -> Result<(), Error> {
        self.runtime
            .block_on(self.inner.put_many(schema_id, documents))
    }

    pub fn get(&self, schema_id: &str, location: &Location) -> Result<Document, Error> {
        self.runtime.block_on(self.inner.get(schema_id, location))
    }

    /// Iterates the matching locations, fetching from the store as the
    /// iterator advances.
    pub fn find(&self, schema_id: &str, pattern: &Location) -> Result<BlockingLocations<'_>, Error> {
        let stream = {
            let _guard = self.runtime.enter();
            self.inner.find(schema_id, pattern)?
        };
        Ok(BlockingLocations {
            runtime: &self.runtime,
            stream,
        })
    }

    pub fn delete(&self, schema_id: &str, location: &Location) -> Result<bool, Error> {
        self.runtime
            .block_on(self.inner.delete(schema_id, location))
    }

    pub fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        self.runtime
            .block_on(self.inner.acquire_lock(key, token, ttl))
    }

    pub fn extend_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        self.runtime
            .block_on(self.inner.extend_lock(key, token, ttl))
    }

    pub fn release_lock(&self, key: &str, token: &str) -> Result<bool, Error> {
        self.runtime.block_on(self.inner.release_lock(key, token))
    }
}

/// Iterator returned by [`BlockingDocumentStore::find`].
pub struct BlockingLocations<'a> {
    runtime: &'a Runtime,
    stream: LocationStream,
}

impl Iterator for BlockingLocations<'_> {
    type Item = Result<Location, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

/// Blocking counterpart of [`HashDocumentStore`].
pub struct BlockingHashDocumentStore {
    inner: HashDocumentStore,
    runtime: Runtime,
}

impl BlockingHashDocumentStore {
    pub fn new(store: Arc<dyn KvStore>) -> Result<Self, Error> {
        Self::from_async(HashDocumentStore::new(store))
    }

    pub fn from_async(inner: HashDocumentStore) -> Result<Self, Error> {
        Ok(Self {
            inner,
            runtime: Runtime::new()?,
        })
    }

    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        let runtime = Runtime::new()?;
        let store = connect_in(&runtime, config)?;
        let inner = HashDocumentStore::new(store).with_retry_policy(config.retry_policy()?);
        Ok(Self { inner, runtime })
    }

    pub fn put(
        &self,
        schema_id: &str,
        location: &Location,
        document: &Document,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        self.runtime
            .block_on(self.inner.put(schema_id, location, document, ttl))
    }

    pub fn get(&self, schema_id: &str, location: &Location) -> Result<Document, Error> {
        self.runtime.block_on(self.inner.get(schema_id, location))
    }

    pub fn get_fields(
        &self,
        schema_id: &str,
        location: &Location,
        fields: &[&str],
    ) -> Result<Document, Error> {
        self.runtime
            .block_on(self.inner.get_fields(schema_id, location, fields))
    }

    pub fn get_field(
        &self,
        schema_id: &str,
        location: &Location,
        field: &str,
    ) -> Result<Option<String>, Error> {
        self.runtime
            .block_on(self.inner.get_field(schema_id, location, field))
    }

    pub fn delete(&self, schema_id: &str, location: &Location) -> Result<bool, Error> {
        self.runtime
            .block_on(self.inner.delete(schema_id, location))
    }
}
