//! Neutral Value Map
//!
//! A concurrent map that can hold three states per key: absent, present
//! with null, and present with a value. The backing [`DashMap`] cannot tell a
//! missing key from a stored "nothing", so null is stored as a private
//! neutral marker that no caller value can ever be confused with.
//!
//! # Thread Safety
//!
//! Every operation is atomic for its key. The map is sharded, so readers of
//! different keys rarely contend and a reader never observes a half-written
//! entry.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::value::Slot;

/// Stored form of a slot. `Null` is the neutral marker.
#[derive(Clone)]
enum Neutral<V> {
    Null,
    Value(V),
}

impl<V> Neutral<V> {
    fn wrap(value: Option<V>) -> Self {
        match value {
            Some(value) => Neutral::Value(value),
            None => Neutral::Null,
        }
    }

    fn into_slot(self) -> Slot<V> {
        match self {
            Neutral::Null => Slot::Null,
            Neutral::Value(value) => Slot::Present(value),
        }
    }

    fn as_option(&self) -> Option<&V> {
        match self {
            Neutral::Null => None,
            Neutral::Value(value) => Some(value),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Neutral<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Neutral::Null => f.write_str("<null>"),
            Neutral::Value(value) => value.fmt(f),
        }
    }
}

/// Concurrent map distinguishing "absent" from "present but null".
pub struct NeutralValueMap<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Neutral<V>>,
}

impl<K, V> NeutralValueMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store a value; `None` stores null.
    pub fn put(&self, key: K, value: Option<V>) {
        self.entries.insert(key, Neutral::wrap(value));
    }

    /// Store a value and return what was there before.
    pub fn put_and_get_old(&self, key: K, value: Option<V>) -> Slot<V> {
        match self.entries.insert(key, Neutral::wrap(value)) {
            Some(previous) => previous.into_slot(),
            None => Slot::Absent,
        }
    }

    /// Store a value only if the key is absent.
    ///
    /// Returns the existing slot, or `Slot::Absent` if the value was stored.
    pub fn put_if_absent(&self, key: K, value: Option<V>) -> Slot<V> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => entry.get().clone().into_slot(),
            Entry::Vacant(entry) => {
                entry.insert(Neutral::wrap(value));
                Slot::Absent
            }
        }
    }

    /// The stored value; `None` for both absent and null.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .and_then(|entry| entry.value().as_option().cloned())
    }

    /// The full tri-state slot for a key.
    pub fn get_slot<Q>(&self, key: &Q) -> Slot<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.get(key) {
            Some(entry) => entry.value().clone().into_slot(),
            None => Slot::Absent,
        }
    }

    /// True for both null and non-null entries.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Remove a key, returning its previous slot.
    pub fn remove<Q>(&self, key: &Q) -> Slot<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.remove(key) {
            Some((_, previous)) => previous.into_slot(),
            None => Slot::Absent,
        }
    }

    /// Visit every entry. Null entries are passed as `None`.
    ///
    /// The consumer must not write to this map.
    pub fn for_each(&self, mut consumer: impl FnMut(&K, Option<&V>)) {
        for entry in self.entries.iter() {
            consumer(entry.key(), entry.value().as_option());
        }
    }

    /// Snapshot of the keys.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Default for NeutralValueMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for NeutralValueMap<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.entries.iter() {
            map.entry(entry.key(), entry.value());
        }
        map.finish()
    }
}
