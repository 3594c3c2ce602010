//! Shared State Store
//!
//! The key-value contract the rule engine depends on: plain values with TTL
//! (suppression fences), sorted sets scored by timestamp (swap windows), and
//! plain sets (transfer fan-out). Backed by Redis in production; an
//! in-process implementation is provided for tests and Redis-less runs.
//!
//! Every operation is self-contained so an abandoned in-flight call cannot
//! leave the store in a corrupt state. Keys follow last-writer-wins; TTLs
//! bound staleness.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value operations the rule engine needs
///
/// Mirrors the Redis subset in use: GET/SETEX, ZADD/ZRANGEBYSCORE,
/// SADD/SCARD, EXPIRE. Any backend honoring these semantics is
/// substitutable.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a plain value, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a plain value with a TTL in seconds
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Add a member to a sorted set with the given score
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Members with score in `[min, max]`, ordered by score
    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError>;

    /// Add a member to a set
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Set cardinality, 0 if the key is absent or expired
    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    /// Reset the TTL on a whole key (global reset, not per member)
    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), StoreError>;
}

/// Redis-backed store over a multiplexed connection
///
/// The connection is cloned per call; `MultiplexedConnection` pipelines
/// commands over one socket, so clones are cheap handles.
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Create a store with an established Redis connection
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    /// Connect to Redis at the given URL
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection))
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn.zrangebyscore(key, min, max).await?;
        Ok(members)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let count: u64 = conn.scard(key).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.expire(key, ttl_seconds).await?;
        Ok(())
    }
}

enum Value {
    Plain(String),
    Zset(Vec<(String, i64)>),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process store with TTL bookkeeping
///
/// Used by the integration tests and for running the monitor without a Redis
/// instance. Tracks operation and write counts so tests can assert on store
/// traffic, and supports fault injection (`fail_next`) to exercise the
/// processor's per-transaction error isolation.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    ops: AtomicU64,
    writes: AtomicU64,
    fail_next: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total operations issued, reads included
    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::SeqCst)
    }

    /// Mutating operations issued (set_ex, zadd, sadd, expire)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail the next `count` operations with `StoreError::Unavailable`
    pub fn fail_next(&self, count: u64) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Remaining TTL in whole seconds (rounded up), `None` if the key is
    /// absent, expired, or has no TTL
    pub fn ttl_secs(&self, key: &str) -> Option<u64> {
        let mut entries = self.lock_entries();
        let now = Instant::now();
        purge_expired(&mut entries, key, now);
        let deadline = entries.get(key)?.expires_at?;
        Some((deadline - now).as_secs_f64().ceil() as u64)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_op(&self, write: bool) -> Result<(), StoreError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.ops.fetch_add(1, Ordering::SeqCst);
        if write {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Drop the key if its TTL has passed; lazy eviction on access
fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.record_op(false)?;
        let mut entries = self.lock_entries();
        purge_expired(&mut entries, key, Instant::now());
        match entries.get(key) {
            Some(Entry {
                value: Value::Plain(s),
                ..
            }) => Ok(Some(s.clone())),
            _ => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.record_op(true)?;
        let mut entries = self.lock_entries();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Plain(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.record_op(true)?;
        let mut entries = self.lock_entries();
        purge_expired(&mut entries, key, Instant::now());
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Zset(Vec::new()),
            expires_at: None,
        });
        if let Value::Zset(members) = &mut entry.value {
            // ZADD updates the score of an existing member
            if let Some(existing) = members.iter_mut().find(|(m, _)| m == member) {
                existing.1 = score;
            } else {
                members.push((member.to_string(), score));
            }
        }
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError> {
        self.record_op(false)?;
        let mut entries = self.lock_entries();
        purge_expired(&mut entries, key, Instant::now());
        match entries.get(key) {
            Some(Entry {
                value: Value::Zset(members),
                ..
            }) => {
                let mut in_range: Vec<(String, i64)> = members
                    .iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .cloned()
                    .collect();
                in_range.sort_by_key(|(_, score)| *score);
                Ok(in_range.into_iter().map(|(m, _)| m).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.record_op(true)?;
        let mut entries = self.lock_entries();
        purge_expired(&mut entries, key, Instant::now());
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        if let Value::Set(members) = &mut entry.value {
            members.insert(member.to_string());
        }
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.record_op(false)?;
        let mut entries = self.lock_entries();
        purge_expired(&mut entries, key, Instant::now());
        match entries.get(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.len() as u64),
            _ => Ok(0),
        }
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<(), StoreError> {
        self.record_op(true)?;
        let mut entries = self.lock_entries();
        let now = Instant::now();
        purge_expired(&mut entries, key, now);
        if ttl_seconds <= 0 {
            entries.remove(key);
        } else if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + Duration::from_secs(ttl_seconds as u64));
        }
        Ok(())
    }
}
