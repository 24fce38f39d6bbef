//! String-mode persistence: one JSON blob per document.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::Document;
use crate::error::Error;
use crate::location::{self, DELIMITER, Location, LocationPattern};
use crate::retry::RetryPolicy;
use crate::store::KvStore;

/// Locations produced lazily by [`DocumentStore::find`].
pub type LocationStream = Pin<Box<dyn Stream<Item = Result<Location, Error>> + Send>>;

/// Stores each document as a single serialized value under
/// `schemaId:location`, and hands out token-guarded locks.
///
/// Every operation that touches a document goes through the configured
/// [`RetryPolicy`]. Find and the lock operations do not.
#[derive(Clone)]
pub struct DocumentStore {
    store: Arc<dyn KvStore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DocumentStore {
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

    /// Retries stop with [`Error::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Writes `document`, replacing whatever was stored at `location`.
    ///
    /// With `ttl` the key expires after that long; without it the key
    /// persists.
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
        let blob = document.to_blob()?;
        debug!(%key, bytes = blob.len(), ?ttl, "SET");

        self.retry
            .execute_cancellable(&self.cancel, || {
                self.store.set(&key, blob.clone(), ttl)
            })
            .await
    }

    /// Writes several documents of one schema in a single round trip.
    ///
    /// Keys written this way never expire. An empty batch does nothing.
    pub async fn put_many(
        &self,
        schema_id: &str,
        documents: &[(Location, Document)],
    ) -> Result<(), Error> {
        location::validate_schema(schema_id)?;
        if documents.is_empty() {
            return Ok(());
        }
        let entries = documents
            .iter()
            .map(|(location, document)| {
                Ok((
                    location::document_key(schema_id, location)?,
                    document.to_blob()?,
                ))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        debug!(schema_id, count = entries.len(), "MSET");

        self.retry
            .execute_cancellable(&self.cancel, || self.store.set_many(entries.clone()))
            .await
    }

    /// Reads the document at `location`. A missing key reads as an empty
    /// document.
    pub async fn get(&self, schema_id: &str, location: &Location) -> Result<Document, Error> {
        let key = location::document_key(schema_id, location)?;
        debug!(%key, "GET");

        let blob = self
            .retry
            .execute_cancellable(&self.cancel, || self.store.get(&key))
            .await?;
        match blob {
            Some(bytes) => Document::from_blob(&bytes),
            None => Ok(Document::new()),
        }
    }

    /// Streams every stored location of `schema_id` matching `pattern`.
    ///
    /// Each `*` in a pattern segment matches within that segment only, so
    /// `["0", "*"]` finds `0:1` but never `0:1:2`. Each location is yielded
    /// once. Results are not ordered; call `find` again to restart.
    pub fn find(&self, schema_id: &str, pattern: &Location) -> Result<LocationStream, Error> {
        let glob = location::scan_pattern(schema_id, pattern)?;
        let prefix = format!("{schema_id}{DELIMITER}");
        let pattern = LocationPattern::new(pattern)?;
        let mut keys = self.store.scan(&glob);
        debug!(%glob, "SCAN");

        Ok(Box::pin(async_stream::try_stream! {
            let mut seen = HashSet::new();
            while let Some(key) = keys.next().await {
                let key = key?;
                let Some(rest) = key.strip_prefix(&prefix) else {
                    continue;
                };
                let Ok(found) = Location::from_string(rest) else {
                    continue;
                };
                if pattern.matches(&found) && seen.insert(found.clone()) {
                    yield found;
                }
            }
        }))
    }

    /// Removes the document at `location`. Returns whether one existed;
    /// removing an absent document is not an error.
    pub async fn delete(&self, schema_id: &str, location: &Location) -> Result<bool, Error> {
        let key = location::document_key(schema_id, location)?;
        debug!(%key, "UNLINK");

        self.retry
            .execute_cancellable(&self.cancel, || self.store.delete(&key))
            .await
    }

    /// Takes the lock `key` for `token` if nobody holds it.
    pub async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        check_lock(key, Some(ttl))?;
        let taken = self.store.set_if_absent(key, token, ttl).await?;
        debug!(key, taken, "SET NX");
        Ok(taken)
    }

    /// Resets the lock's TTL if `token` still holds it.
    pub async fn extend_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        check_lock(key, Some(ttl))?;
        let extended = self.store.expire_if_equal(key, token, ttl).await?;
        debug!(key, extended, "lock extend");
        Ok(extended)
    }

    /// Releases the lock if `token` holds it.
    pub async fn release_lock(&self, key: &str, token: &str) -> Result<bool, Error> {
        check_lock(key, None)?;
        let released = self.store.delete_if_equal(key, token).await?;
        debug!(key, released, "lock release");
        Ok(released)
    }
}

fn check_lock(key: &str, ttl: Option<Duration>) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::invalid("lock key is empty"));
    }
    if ttl.is_some_and(|ttl| ttl.is_zero()) {
        return Err(Error::invalid("lock ttl must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn layer() -> (Arc<MemoryStore>, DocumentStore) {
        let memory = Arc::new(MemoryStore::new());
        let docs = DocumentStore::new(memory.clone());
        (memory, docs)
    }

    fn loc(s: &str) -> Location {
        Location::from_string(s).unwrap()
    }

    async fn found(docs: &DocumentStore, schema: &str, pattern: &str) -> Vec<String> {
        let mut out: Vec<String> = docs
            .find(schema, &loc(pattern))
            .unwrap()
            .map(|l| l.unwrap().render())
            .collect()
            .await;
        out.sort();
        out
    }

    #[tokio::test]
    async fn put_then_get() {
        let (memory, docs) = layer();
        let mut doc = Document::new();
        doc.set("name", "Bob");
        doc.add_all("items", [1, 2, 3]);

        docs.put("person", &loc("1"), &doc, None).await.unwrap();
        assert_eq!(docs.get("person", &loc("1")).await.unwrap(), doc);
        assert!(memory.get("person:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_document_is_empty() {
        let (_, docs) = layer();
        assert!(docs.get("person", &loc("404")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let (memory, docs) = layer();
        let err = docs
            .put("person", &loc("1"), &Document::new(), Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn put_many_writes_every_entry() {
        let (memory, docs) = layer();
        let mut doc = Document::new();
        doc.set("v", 1);
        docs.put_many(
            "grid",
            &[(loc("0:0"), doc.clone()), (loc("0:1"), doc.clone())],
        )
        .await
        .unwrap();
        assert_eq!(memory.len(), 2);
        assert_eq!(docs.get("grid", &loc("0:1")).await.unwrap(), doc);

        docs.put_many("grid", &[]).await.unwrap();
        assert_eq!(memory.len(), 2);
    }

    #[tokio::test]
    async fn find_respects_segment_boundaries() {
        let (_, docs) = layer();
        for key in ["0:1", "0:2", "0:1:5", "1:1"] {
            docs.put("grid", &loc(key), &Document::new(), None)
                .await
                .unwrap();
        }
        docs.put("other", &loc("0:9"), &Document::new(), None)
            .await
            .unwrap();

        assert_eq!(found(&docs, "grid", "0:*").await, ["0:1", "0:2"]);
        assert_eq!(found(&docs, "grid", "*:1").await, ["0:1", "1:1"]);
        assert_eq!(found(&docs, "grid", "*:*:*").await, ["0:1:5"]);
        assert!(found(&docs, "grid", "2:*").await.is_empty());
    }

    #[tokio::test]
    async fn find_treats_glob_metacharacters_literally() {
        let (_, docs) = layer();
        docs.put("s", &loc("a?"), &Document::new(), None)
            .await
            .unwrap();
        docs.put("s", &loc("ab"), &Document::new(), None)
            .await
            .unwrap();
        assert_eq!(found(&docs, "s", "a?").await, ["a?"]);
    }

    #[tokio::test]
    async fn find_with_many_wildcards_stays_fast() {
        let (_, docs) = layer();
        let deep = format!("{}:b", ["a"; 27].join(":"));
        docs.put("s", &loc(&deep), &Document::new(), None)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let pattern = format!("{}:c", ["*"; 11].join(":"));
        assert!(found(&docs, "s", &pattern).await.is_empty());
        assert_eq!(found(&docs, "s", &format!("{}:b", ["*"; 27].join(":"))).await, [deep]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let (_, docs) = layer();
        docs.put("person", &loc("1"), &Document::new(), None)
            .await
            .unwrap();
        assert!(docs.delete("person", &loc("1")).await.unwrap());
        assert!(!docs.delete("person", &loc("1")).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_schema_is_rejected() {
        let (_, docs) = layer();
        assert!(matches!(
            docs.get("", &loc("1")).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            docs.find("a:b", &loc("*")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            docs.put_many("", &[]).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn lock_arguments_are_checked() {
        let (_, docs) = layer();
        assert!(matches!(
            docs.acquire_lock("", "t", Duration::from_secs(1)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            docs.extend_lock("l", "t", Duration::ZERO).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            docs.release_lock("", "t").await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
