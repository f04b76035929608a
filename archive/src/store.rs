use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::ArchiveResult;

/// Ordered key-to-member-set store, the shape the index lives in. Members
/// under one key enumerate in lexicographic order, which is what makes
/// urlkey prefix ranges work. `start`/`end` for the lex range carry the
/// redis-style inclusivity prefixes `[` and `(`.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    async fn append(&self, key: &str, member: &str) -> ArchiveResult<()>;
    async fn range_by_lex(&self, key: &str, start: &str, end: &str)
        -> ArchiveResult<Vec<String>>;
    async fn range_all(&self, key: &str) -> ArchiveResult<Vec<String>>;
}

/// Process-local store. The index it holds dies with the process; useful
/// for tests and single-shot runs without external infrastructure.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

fn lex_bound(spec: &str) -> Option<(bool, &str)> {
    match spec.as_bytes().first() {
        Some(b'[') => Some((true, &spec[1..])),
        Some(b'(') => Some((false, &spec[1..])),
        _ => None,
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn append(&self, key: &str, member: &str) -> ArchiveResult<()> {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        sets.entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn range_by_lex(
        &self,
        key: &str,
        start: &str,
        end: &str,
    ) -> ArchiveResult<Vec<String>> {
        let sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };

        let lower = match lex_bound(start) {
            Some((true, value)) => Bound::Included(value.to_owned()),
            Some((false, value)) => Bound::Excluded(value.to_owned()),
            None => Bound::Unbounded,
        };
        let upper = match lex_bound(end) {
            Some((true, value)) => Bound::Included(value.to_owned()),
            Some((false, value)) => Bound::Excluded(value.to_owned()),
            None => Bound::Unbounded,
        };

        Ok(set.range((lower, upper)).cloned().collect())
    }

    async fn range_all(&self, key: &str) -> ArchiveResult<Vec<String>> {
        let sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Redis-backed store: members are sorted-set entries at score 0, so redis
/// itself keeps them in lexicographic order.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> ArchiveResult<RedisStore> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisStore { conn })
    }
}

#[async_trait]
impl OrderedStore for RedisStore {
    async fn append(&self, key: &str, member: &str) -> ArchiveResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, 0i64).await?;
        Ok(())
    }

    async fn range_by_lex(
        &self,
        key: &str,
        start: &str,
        end: &str,
    ) -> ArchiveResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.zrangebylex(key, start, end).await?)
    }

    async fn range_all(&self, key: &str) -> ArchiveResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.zrange(key, 0, -1).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn members_enumerate_in_lexicographic_order() {
        let store = MemoryStore::new();
        store.append("idx", "b line").await.unwrap();
        store.append("idx", "a line").await.unwrap();
        store.append("idx", "c line").await.unwrap();

        assert_eq!(
            store.range_all("idx").await.unwrap(),
            vec!["a line", "b line", "c line"]
        );
    }

    #[tokio::test]
    async fn lex_range_is_inclusive_exclusive() {
        let store = MemoryStore::new();
        for member in ["com,example)/ 1", "com,example)/ 2", "com,example)/x 1"] {
            store.append("idx", member).await.unwrap();
        }

        let hits = store
            .range_by_lex("idx", "[com,example)/ ", "(com,example)/!")
            .await
            .unwrap();
        assert_eq!(hits, vec!["com,example)/ 1", "com,example)/ 2"]);
    }

    #[tokio::test]
    async fn missing_key_is_empty() {
        let store = MemoryStore::new();
        assert!(store.range_all("nope").await.unwrap().is_empty());
        assert!(store
            .range_by_lex("nope", "[a", "(b")
            .await
            .unwrap()
            .is_empty());
    }
}
