//! Auxiliary shared state: key/value, counters, leases, pub/sub.
//!
//! Handlers use this for cross-connection bookkeeping. Nothing in the
//! connection lifecycle depends on it.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Buffered messages per pub/sub channel before slow subscribers lag.
const CHANNEL_CAPACITY: usize = 256;

/// Writes between sweeps of expired values, lapsed leases and channels
/// nobody listens to.
const SWEEP_EVERY: u32 = 128;

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `incr`/`decr` on a value that is not an integer.
    #[error("value at {key:?} is not an integer")]
    NotAnInteger {
        /// Offending key.
        key: String,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Synchronous request/response API of the shared store.
pub trait SharedStore: Send + Sync {
    /// Value at `key`, if present and not expired.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Set `key`, optionally expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;
    /// Add one, treating a missing key as zero.
    fn incr(&self, key: &str) -> StoreResult<i64>;
    /// Subtract one, treating a missing key as zero.
    fn decr(&self, key: &str) -> StoreResult<i64>;
    /// Take a lease on `key` for `ttl`. `false` if someone else holds it.
    fn lock(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
    /// Release a lease. Releasing a free key is a no-op.
    fn unlock(&self, key: &str) -> StoreResult<()>;
    /// Publish to `channel`; returns how many subscribers got it.
    fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;
    /// Subscribe to `channel`.
    fn subscribe(&self, channel: &str) -> StoreResult<broadcast::Receiver<String>>;
}

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct State {
    values: HashMap<String, Slot>,
    leases: HashMap<String, Instant>,
    channels: HashMap<String, broadcast::Sender<String>>,
    writes: u32,
}

impl State {
    fn note_write(&mut self, now: Instant) {
        self.writes += 1;
        if self.writes >= SWEEP_EVERY {
            self.writes = 0;
            self.sweep(now);
        }
    }

    fn sweep(&mut self, now: Instant) {
        self.values.retain(|_, slot| slot.live(now));
        self.leases.retain(|_, until| *until > now);
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

/// In-process [`SharedStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let (current, expires_at) = match state.values.get(key) {
            Some(slot) if slot.live(now) => {
                let n = slot.value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                    key: key.to_owned(),
                })?;
                (n, slot.expires_at)
            }
            _ => (0, None),
        };
        let next = current.saturating_add(delta);
        state.note_write(now);
        let _ = state.values.insert(
            key.to_owned(),
            Slot {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.values.get(key) {
            Some(slot) if slot.live(now) => Ok(Some(slot.value.clone())),
            Some(_) => {
                let _ = state.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut state = self.state.lock();
        state.note_write(now);
        let _ = state.values.insert(
            key.to_owned(),
            Slot {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.add(key, 1)
    }

    fn decr(&self, key: &str) -> StoreResult<i64> {
        self.add(key, -1)
    }

    fn lock(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.leases.get(key).is_some_and(|until| *until > now) {
            return Ok(false);
        }
        state.note_write(now);
        let _ = state.leases.insert(key.to_owned(), now + ttl);
        Ok(true)
    }

    fn unlock(&self, key: &str) -> StoreResult<()> {
        let _ = self.state.lock().leases.remove(key);
        Ok(())
    }

    fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let Some(tx) = state.channels.get(channel) else {
            return Ok(0);
        };
        match tx.send(message.to_owned()) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // Every subscriber went away.
                let _ = state.channels.remove(channel);
                Ok(0)
            }
        }
    }

    fn subscribe(&self, channel: &str) -> StoreResult<broadcast::Receiver<String>> {
        let mut state = self.state.lock();
        state.note_write(Instant::now());
        let tx = state
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }
}
