//! Keyed completion registry
//!
//! Maps a correlation key (device or attribute id) to the live stream of the
//! operation in flight for it. Entries are created lazily, reused while
//! live, and evicted in the same step that emits a terminal signal so a
//! stale completion can never reach a later request reusing the key.
//!
//! The registry does no locking of its own: a session keeps all of its
//! registries behind one mutex.

use crate::error::GattError;
use crate::stream::EventStream;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::debug;

/// Result of a hardware completion, as routed to one key
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Non-terminal value; the entry stays live
    Value(T),
    /// One-shot success: value, eviction, then `finished`
    ValueThenFinish(T),
    /// Clean terminal signal without a value
    Finish,
    /// Terminal error
    Fail(GattError),
}

impl<T> Outcome<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Value(_))
    }
}

/// Registry of live streams for one operation family
pub struct KeyedRegistry<K, T> {
    /// Operation family, for logs
    name: &'static str,
    entries: HashMap<K, EventStream<T>>,
}

impl<K, T> KeyedRegistry<K, T>
where
    K: Eq + Hash + Copy + Debug,
    T: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: HashMap::new(),
        }
    }

    /// Existing stream for `key`, or a freshly stored one.
    ///
    /// The flag is true when the entry was created by this call, which is
    /// the caller's cue to issue the hardware request.
    pub fn stream_for(&mut self, key: K) -> (EventStream<T>, bool) {
        if let Some(stream) = self.entries.get(&key) {
            return (stream.clone(), false);
        }
        let stream = EventStream::new();
        self.entries.insert(key, stream.clone());
        debug!("{}: opened stream {} for {:?}", self.name, stream.id(), key);
        (stream, true)
    }

    /// Deliver `outcome` to the stream for `key`.
    ///
    /// Returns false when no entry matched (stale or duplicate completion).
    /// A terminal outcome evicts the entry after any value is delivered and
    /// before the terminal signal goes out.
    pub fn route(&mut self, key: K, outcome: Outcome<T>) -> bool {
        let Some(stream) = self.entries.get(&key).cloned() else {
            debug!("{}: dropping completion for {:?}, nothing in flight", self.name, key);
            return false;
        };

        match outcome {
            Outcome::Value(value) => {
                stream.send(value);
            }
            Outcome::ValueThenFinish(value) => {
                stream.send(value);
                self.entries.remove(&key);
                stream.finish();
            }
            Outcome::Finish => {
                self.entries.remove(&key);
                stream.finish();
            }
            Outcome::Fail(err) => {
                self.entries.remove(&key);
                debug!("{}: {:?} failed: {}", self.name, key, err);
                stream.fail(err);
            }
        }
        true
    }

    /// Evict an entry without signalling it
    pub fn remove(&mut self, key: &K) -> Option<EventStream<T>> {
        self.entries.remove(key)
    }

    /// Evict every entry, handing the streams back for termination
    pub fn drain(&mut self) -> Vec<(K, EventStream<T>)> {
        self.entries.drain().collect()
    }

    pub fn get(&self, key: &K) -> Option<&EventStream<T>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}
