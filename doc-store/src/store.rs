//! The key-value store seam.
//!
//! Persistence layers talk to the store only through [`KvStore`]. The trait
//! mirrors the Redis commands the layers need; [`RedisStore`] forwards them
//! to a server and [`MemoryStore`] emulates them in process.
//!
//! [`RedisStore`]: crate::RedisStore
//! [`MemoryStore`]: crate::MemoryStore

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;
use globset::{GlobBuilder, GlobMatcher};

use crate::error::Error;

/// Lazily produced keys from a cursor-based scan.
pub type KeyStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// `SET key value [PX ttl]`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), Error>;

    /// `MSET key value ...`. Keys written this way carry no TTL.
    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error>;

    /// `HSET key field value ...` followed by `PEXPIRE` when `ttl` is given,
    /// applied atomically.
    async fn hash_set(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), Error>;

    /// `HGETALL key`. Empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, Error>;

    /// `HMGET key field ...`, one slot per requested field.
    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, Error>;

    /// `HGET key field`.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, Error>;

    /// `UNLINK key`. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// `SCAN 0 MATCH pattern` driven to completion as a stream.
    ///
    /// The pattern uses Redis glob syntax. A key may be yielded more than
    /// once.
    fn scan(&self, pattern: &str) -> KeyStream;

    /// `SET key token NX PX ttl`. Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error>;

    /// Resets the TTL of `key` only if it currently holds `token`.
    async fn expire_if_equal(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error>;

    /// Deletes `key` only if it currently holds `token`.
    async fn delete_if_equal(&self, key: &str, token: &str) -> Result<bool, Error>;
}

/// A compiled Redis glob: `*`, `?`, `[...]` classes (with `^` or `!`
/// negation and ranges) and backslash escapes. Braces match literally.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    matcher: GlobMatcher,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<Self, Error> {
        let glob = GlobBuilder::new(&to_globset_syntax(pattern))
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| Error::invalid(format!("invalid key pattern {pattern:?}: {e}")))?;
        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }
}

/// Rewrites Redis glob syntax into the globset dialect: `[^` becomes `[!`,
/// braces are escaped and runs of `*` collapse so `**` never turns into a
/// recursive wildcard.
fn to_globset_syntax(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    let mut after_star = false;

    while let Some(c) = chars.next() {
        let star = c == '*' && !in_class;
        match c {
            '\\' => match chars.next() {
                Some(escaped) if in_class => out.push(escaped),
                Some(escaped) => {
                    out.push('\\');
                    out.push(escaped);
                }
                None => out.push_str(r"\\"),
            },
            '*' if in_class => out.push(c),
            '*' if after_star => {}
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('!');
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            '{' | '}' if !in_class => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        after_star = star;
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn glob_match(pattern: &str, key: &str) -> bool {
        KeyPattern::new(pattern).unwrap().is_match(key)
    }

    #[test]
    fn star_spans_any_characters() {
        assert!(glob_match("grid:0:*", "grid:0:1"));
        assert!(glob_match("grid:0:*", "grid:0:1:5"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a/**/b", "a/x/y/b"));
        assert!(!glob_match("a/**/b", "a/b"));
        assert!(!glob_match("grid:1:*", "grid:0:1"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[!e]llo", "hello"));
        assert!(glob_match("h[a-b]llo", "hbllo"));
        assert!(!glob_match("h[a-b]llo", "hcllo"));
    }

    #[test]
    fn escapes_and_braces_match_literally() {
        assert!(glob_match(r"what\?", "what?"));
        assert!(!glob_match(r"what\?", "whats"));
        assert!(glob_match(r"\[x\]", "[x]"));
        assert!(glob_match(r"a\\b", r"a\b"));
        assert!(glob_match("{a,b}", "{a,b}"));
        assert!(!glob_match("{a,b}", "a"));
    }

    #[test]
    fn unterminated_class_is_rejected() {
        assert!(matches!(KeyPattern::new("a[b"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn many_stars_match_in_linear_time() {
        let pattern = format!("s{}:c", ":*".repeat(11));
        let key = format!("s{}:b", ":a".repeat(27));
        let started = Instant::now();
        assert!(!glob_match(&pattern, &key));
        assert!(glob_match(&pattern, &format!("s{}:c", ":a".repeat(11))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
