//! [`KvStore`] backed by a Redis server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Error;
use crate::store::{KeyStream, KvStore};

const EXTEND_IF_EQUAL: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

const DELETE_IF_EQUAL: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// A shared Redis connection.
///
/// The underlying [`ConnectionManager`] multiplexes every command over one
/// connection and reconnects on its own after failures, so a single
/// `RedisStore` is meant to be created at startup and shared by every
/// persistence layer.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    scan_count: usize,
    extend_if_equal: Script,
    delete_if_equal: Script,
}

impl RedisStore {
    /// Opens the connection described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, Error> {
        if config.scan_count == 0 {
            return Err(Error::invalid("scan_count must be at least 1"));
        }
        let url = config.redis_url()?;
        let client = redis::Client::open(url.as_str())?;
        let addr = client.get_connection_info().addr.to_string();
        let conn = ConnectionManager::new(client).await?;
        info!(%addr, "connected to redis");

        Ok(Self {
            conn,
            scan_count: config.scan_count,
            extend_if_equal: Script::new(EXTEND_IF_EQUAL),
            delete_if_equal: Script::new(DELETE_IF_EQUAL),
        })
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MSET");
        for (key, value) in &entries {
            cmd.arg(key).arg(value.as_slice());
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key);
        for (field, value) in &fields {
            pipe.arg(field).arg(value);
        }
        pipe.ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, Error> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        let mut entries: Vec<(String, String)> = map.into_iter().collect();
        entries.sort();
        Ok(entries)
    }

    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, Error> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("UNLINK").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    fn scan(&self, pattern: &str) -> KeyStream {
        let mut conn = self.conn.clone();
        let pattern = pattern.to_owned();
        let count = self.scan_count;

        Box::pin(async_stream::try_stream! {
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await
                    .map_err(Error::from)?;
                for key in keys {
                    yield key;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        })
    }

    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn expire_if_equal(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend_if_equal
            .key(key)
            .arg(token)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn delete_if_equal(&self, key: &str, token: &str) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .delete_if_equal
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
