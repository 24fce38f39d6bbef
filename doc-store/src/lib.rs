//! Schema-oriented document persistence over Redis.
//!
//! `doc-store` stores flexible, multi-valued [`Document`]s under
//! hierarchical keys of the form `schemaId:segment:segment`. Two layers share
//! that key scheme:
//!
//! - [`DocumentStore`] keeps each document as one serialized value and adds
//!   wildcard enumeration ([`DocumentStore::find`]) and token-guarded locks.
//! - [`HashDocumentStore`] keeps each document as a hash, so single fields
//!   can be read on their own.
//!
//! Both run every document operation through a [`RetryPolicy`] that retries
//! transient store failures with a fixed delay schedule. The store itself is
//! reached through the [`KvStore`] trait: [`RedisStore`] for a real server,
//! [`MemoryStore`] for tests and local runs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use doc_store::{Document, DocumentStore, Location, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), doc_store::Error> {
//!     let docs = DocumentStore::new(Arc::new(MemoryStore::new()));
//!
//!     let mut person = Document::new();
//!     person.set("name", "Bob");
//!     person.add_all("items", [1, 2, 3]);
//!
//!     let at = Location::from_segments(["United States", "NY", "Rochester"])?;
//!     docs.put("person", &at, &person, None).await?;
//!     assert_eq!(docs.get("person", &at).await?, person);
//!     Ok(())
//! }
//! ```

mod blob_store;
mod blocking;
mod config;
mod document;
mod error;
mod hash_store;
mod location;
mod memory;
mod redis_store;
mod retry;
mod store;

pub use blob_store::{DocumentStore, LocationStream};
pub use blocking::{BlockingDocumentStore, BlockingHashDocumentStore, BlockingLocations};
pub use config::{CONNECTION_STRING_VAR, StoreConfig};
pub use document::{Document, MAX_NESTING, Value};
pub use error::Error;
pub use hash_store::HashDocumentStore;
pub use location::Location;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use retry::{DEFAULT_ATTEMPTS, DEFAULT_DELAYS, RetryPolicy};
pub use store::{KeyPattern, KeyStream, KvStore};
pub use tokio_util::sync::CancellationToken;
