//! In-process [`KvStore`] with Redis-compatible semantics.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream;

use crate::error::Error;
use crate::store::{KeyPattern, KeyStream, KvStore};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

enum Stored {
    Bytes(Vec<u8>),
    Hash(BTreeMap<String, String>),
}

struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A thread-safe map standing in for a Redis server.
///
/// Expired keys are dropped lazily, the first time they are touched after
/// their deadline. Scans see a snapshot taken when [`KvStore::scan`] is
/// called.
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .map(|g| g.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>, Error> {
        self.inner
            .read()
            .map_err(|_| Error::NonTransient("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>, Error> {
        self.inner
            .write()
            .map_err(|_| Error::NonTransient("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn live<'a>(map: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    map.get(key).filter(|e| e.is_live(Instant::now()))
}

/// Removes `key` if it has expired so writers can treat it as absent.
fn purge_expired(map: &mut HashMap<String, Entry>, key: &str) {
    if map.get(key).is_some_and(|e| !e.is_live(Instant::now())) {
        map.remove(key);
    }
}

fn holds_token(entry: Option<&Entry>, token: &str) -> bool {
    matches!(entry, Some(Entry { value: Stored::Bytes(v), .. }) if v == token.as_bytes())
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let map = self.read()?;
        match live(&map, key) {
            None => Ok(None),
            Some(Entry {
                value: Stored::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(Error::NonTransient(WRONG_TYPE.into())),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), Error> {
        let entry = Entry {
            value: Stored::Bytes(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.write()?.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error> {
        let mut map = self.write()?;
        for (key, value) in entries {
            map.insert(
                key,
                Entry {
                    value: Stored::Bytes(value),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let mut map = self.write()?;
        purge_expired(&mut map, key);

        let entry = map.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Stored::Hash(BTreeMap::new()),
            expires_at: None,
        });
        let Stored::Hash(hash) = &mut entry.value else {
            return Err(Error::NonTransient(WRONG_TYPE.into()));
        };
        hash.extend(fields);
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, Error> {
        let map = self.read()?;
        match live(&map, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Stored::Hash(hash),
                ..
            }) => Ok(hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Some(_) => Err(Error::NonTransient(WRONG_TYPE.into())),
        }
    }

    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, Error> {
        let map = self.read()?;
        match live(&map, key) {
            None => Ok(vec![None; fields.len()]),
            Some(Entry {
                value: Stored::Hash(hash),
                ..
            }) => Ok(fields.iter().map(|f| hash.get(f).cloned()).collect()),
            Some(_) => Err(Error::NonTransient(WRONG_TYPE.into())),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, Error> {
        let map = self.read()?;
        match live(&map, key) {
            None => Ok(None),
            Some(Entry {
                value: Stored::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(Error::NonTransient(WRONG_TYPE.into())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let mut map = self.write()?;
        purge_expired(&mut map, key);
        Ok(map.remove(key).is_some())
    }

    fn scan(&self, pattern: &str) -> KeyStream {
        let now = Instant::now();
        let snapshot = KeyPattern::new(pattern).and_then(|pattern| {
            Ok(self
                .read()?
                .iter()
                .filter(|(key, entry)| entry.is_live(now) && pattern.is_match(key))
                .map(|(key, _)| Ok(key.clone()))
                .collect::<Vec<_>>())
        });
        let keys = snapshot.unwrap_or_else(|err| vec![Err(err)]);
        Box::pin(stream::iter(keys))
    }

    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        let mut map = self.write()?;
        purge_expired(&mut map, key);
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_owned(),
            Entry {
                value: Stored::Bytes(token.as_bytes().to_vec()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn expire_if_equal(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        let mut map = self.write()?;
        purge_expired(&mut map, key);
        if !holds_token(map.get(key), token) {
            return Ok(false);
        }
        if let Some(entry) = map.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(true)
    }

    async fn delete_if_equal(&self, key: &str, token: &str) -> Result<bool, Error> {
        let mut map = self.write()?;
        purge_expired(&mut map, key);
        if !holds_token(map.get(key), token) {
            return Ok(false);
        }
        map.remove(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn set_and_get() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_keys() {
        let store = MemoryStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn wrong_type_is_reported() {
        let store = MemoryStore::new();
        store
            .hash_set("h", vec![("f".into(), "v".into())], None)
            .await
            .unwrap();
        assert!(matches!(store.get("h").await, Err(Error::NonTransient(_))));
        store.set("s", b"v".to_vec(), None).await.unwrap();
        assert!(matches!(
            store.hash_get("s", "f").await,
            Err(Error::NonTransient(_))
        ));
    }

    #[tokio::test]
    async fn hash_set_merges_fields() {
        let store = MemoryStore::new();
        store
            .hash_set("h", vec![("a".into(), "1".into())], None)
            .await
            .unwrap();
        store
            .hash_set("h", vec![("b".into(), "2".into())], None)
            .await
            .unwrap();
        assert_eq!(
            store.hash_get_all("h").await.unwrap(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert_eq!(
            store
                .hash_get_many("h", &["b".into(), "c".into()])
                .await
                .unwrap(),
            vec![Some("2".to_string()), None]
        );
    }

    #[tokio::test]
    async fn scan_filters_by_glob() {
        let store = MemoryStore::new();
        store
            .set_many(vec![
                ("s:0:0".into(), b"a".to_vec()),
                ("s:0:1".into(), b"b".to_vec()),
                ("s:1:0".into(), b"c".to_vec()),
            ])
            .await
            .unwrap();
        let mut keys: Vec<String> = store
            .scan("s:0:*")
            .map(|k| k.unwrap())
            .collect()
            .await;
        keys.sort();
        assert_eq!(keys, vec!["s:0:0", "s:0:1"]);
    }

    #[tokio::test]
    async fn token_guards_lock_key() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("l", "abc", ttl).await.unwrap());
        assert!(!store.set_if_absent("l", "xyz", ttl).await.unwrap());
        assert!(!store.expire_if_equal("l", "xyz", ttl).await.unwrap());
        assert!(!store.delete_if_equal("l", "xyz").await.unwrap());
        assert!(store.delete_if_equal("l", "abc").await.unwrap());
        assert!(!store.delete_if_equal("l", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_retaken() {
        let store = MemoryStore::new();
        assert!(
            store
                .set_if_absent("l", "abc", Duration::from_millis(10))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.expire_if_equal("l", "abc", Duration::from_secs(1)).await.unwrap());
        assert!(
            store
                .set_if_absent("l", "xyz", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }
}
