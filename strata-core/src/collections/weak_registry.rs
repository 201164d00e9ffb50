//! Weak Registry
//!
//! A registry of weakly held entries that can be walked safely while it is
//! being modified. Contexts use it to remember their children and the
//! computations listening to them without keeping either alive.
//!
//! # Iteration
//!
//! [`WeakRegistry::iter`] yields strong references to live entries only, in
//! insertion order. Entries whose target has been dropped are removed from
//! the registry as the iterator walks past them; there is no separate sweep.
//!
//! The backing lock is held for a single step of the iteration, never across
//! the loop body. The body may therefore insert into or remove from the same
//! registry, from this or another thread. Entries added meanwhile may or may
//! not be seen; an entry that was already yielded is never yielded again,
//! because every entry carries a sequence number and the iterator only moves
//! forward.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

struct Entry<T: ?Sized> {
    seq: u64,
    item: Weak<T>,
}

struct Entries<T: ?Sized> {
    next_seq: u64,
    /// Sorted by `seq`.
    list: Vec<Entry<T>>,
}

/// An ordered collection of weak references with self-cleaning iteration.
pub struct WeakRegistry<T: ?Sized> {
    entries: Mutex<Entries<T>>,
}

fn same_target<T: ?Sized, U: ?Sized>(weak: &Weak<T>, target: *const U) -> bool {
    std::ptr::addr_eq(weak.as_ptr(), target)
}

impl<T: ?Sized> WeakRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                next_seq: 0,
                list: Vec::new(),
            }),
        }
    }

    /// Register a weak reference to `item`.
    pub fn insert(&self, item: &Arc<T>) {
        self.insert_weak(Arc::downgrade(item));
    }

    /// Register an existing weak reference.
    pub fn insert_weak(&self, item: Weak<T>) {
        let mut entries = self.entries.lock();
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.list.push(Entry { seq, item });
    }

    /// Register `item` unless it is already present.
    ///
    /// Returns `true` if the item was added.
    pub fn insert_unique(&self, item: Weak<T>) -> bool {
        let mut entries = self.entries.lock();
        if entries
            .list
            .iter()
            .any(|entry| same_target(&entry.item, item.as_ptr()))
        {
            return false;
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.list.push(Entry { seq, item });
        true
    }

    /// Remove every entry pointing at `item`.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        self.remove_target(Arc::as_ptr(item))
    }

    /// Remove every entry pointing at the target of `item`.
    ///
    /// Works even if the target has already been dropped.
    pub fn remove_weak(&self, item: &Weak<T>) -> bool {
        self.remove_target(item.as_ptr())
    }

    fn remove_target<U: ?Sized>(&self, target: *const U) -> bool {
        let mut entries = self.entries.lock();
        let mut removed = false;
        entries.list.retain(|entry| {
            if same_target(&entry.item, target) {
                removed = true;
                return false;
            }
            entry.item.strong_count() > 0
        });
        removed
    }

    /// Check whether `item` is registered.
    pub fn contains(&self, item: &Arc<T>) -> bool {
        let target = Arc::as_ptr(item);
        self.entries
            .lock()
            .list
            .iter()
            .any(|entry| same_target(&entry.item, target))
    }

    /// Number of live entries. Dead entries are evicted as a side effect.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.list.retain(|entry| entry.item.strong_count() > 0);
        entries.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().list.clear();
    }

    /// Iterate over the live entries.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            registry: self,
            cursor: None,
            current: None,
        }
    }

    /// Collect the live entries.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.iter().collect()
    }
}

impl<T: ?Sized> Default for WeakRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        let live = entries
            .list
            .iter()
            .filter(|entry| entry.item.strong_count() > 0)
            .count();
        f.debug_struct("WeakRegistry")
            .field("entries", &entries.list.len())
            .field("live", &live)
            .finish()
    }
}

/// Forward-only iterator over a [`WeakRegistry`].
///
/// Each call to `next` takes the registry lock briefly, skips and evicts dead
/// entries, and returns the next live one.
pub struct Iter<'a, T: ?Sized> {
    registry: &'a WeakRegistry<T>,
    /// Sequence number of the last yielded entry.
    cursor: Option<u64>,
    /// Entry that `remove` applies to.
    current: Option<u64>,
}

impl<T: ?Sized> Iter<'_, T> {
    /// Remove the entry last returned by `next` from the registry.
    ///
    /// Returns `false` if there is no current entry or it is already gone.
    pub fn remove(&mut self) -> bool {
        let Some(seq) = self.current.take() else {
            return false;
        };
        let mut entries = self.registry.entries.lock();
        match entries.list.binary_search_by_key(&seq, |entry| entry.seq) {
            Ok(index) => {
                entries.list.remove(index);
                true
            }
            Err(_) => false,
        }
    }
}

impl<T: ?Sized> Iterator for Iter<'_, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Arc<T>> {
        self.current = None;
        let mut entries = self.registry.entries.lock();
        let index = match self.cursor {
            Some(cursor) => entries.list.partition_point(|entry| entry.seq <= cursor),
            None => 0,
        };

        while index < entries.list.len() {
            let entry = &entries.list[index];
            match entry.item.upgrade() {
                Some(item) => {
                    self.cursor = Some(entry.seq);
                    self.current = Some(entry.seq);
                    return Some(item);
                }
                None => {
                    entries.list.remove(index);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_live_entries_in_order() {
        let a = Arc::new(1);
        let b = Arc::new(2);
        let c = Arc::new(3);
        let registry = WeakRegistry::new();
        registry.insert(&a);
        registry.insert(&b);
        registry.insert(&c);

        drop(b);

        let seen: Vec<i32> = registry.iter().map(|item| *item).collect();
        assert_eq!(seen, vec![1, 3]);
    }

    #[test]
    fn iteration_evicts_dead_entries() {
        let a = Arc::new(1);
        let registry = WeakRegistry::new();
        registry.insert(&a);
        registry.insert(&Arc::new(2));
        registry.insert(&Arc::new(3));

        assert_eq!(registry.entries.lock().list.len(), 3);
        assert_eq!(registry.iter().count(), 1);
        assert_eq!(registry.entries.lock().list.len(), 1);
    }

    #[test]
    fn entry_cleared_mid_iteration_is_skipped() {
        let a = Arc::new(1);
        let b = Arc::new(2);
        let c = Arc::new(3);
        let registry = WeakRegistry::new();
        registry.insert(&a);
        registry.insert(&b);
        registry.insert(&c);

        let mut b = Some(b);
        let mut seen = Vec::new();
        for item in registry.iter() {
            seen.push(*item);
            // Clearing the next referent while the iterator is live.
            b.take();
        }

        assert_eq!(seen, vec![1, 3]);
    }

    #[test]
    fn iterator_remove_updates_backing_collection() {
        let a = Arc::new(1);
        let b = Arc::new(2);
        let registry = WeakRegistry::new();
        registry.insert(&a);
        registry.insert(&b);

        let mut iter = registry.iter();
        assert_eq!(iter.next().map(|item| *item), Some(1));
        assert!(iter.remove());
        assert!(!iter.remove());
        assert_eq!(iter.next().map(|item| *item), Some(2));
        assert_eq!(iter.next(), None);

        assert!(!registry.contains(&a));
        assert!(registry.contains(&b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_during_iteration_does_not_revisit() {
        let items: Vec<Arc<i32>> = (0..3).map(Arc::new).collect();
        let late = Arc::new(99);
        let registry = WeakRegistry::new();
        for item in &items {
            registry.insert(item);
        }

        let mut seen = Vec::new();
        for item in registry.iter() {
            seen.push(*item);
            if *item == 0 {
                registry.insert(&late);
            }
        }

        assert_eq!(seen, vec![0, 1, 2, 99]);
    }

    #[test]
    fn iteration_is_restartable() {
        let a = Arc::new(1);
        let registry = WeakRegistry::new();
        registry.insert(&a);

        assert_eq!(registry.iter().count(), 1);
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn insert_unique_skips_duplicates() {
        let a = Arc::new(1);
        let registry = WeakRegistry::new();
        assert!(registry.insert_unique(Arc::downgrade(&a)));
        assert!(!registry.insert_unique(Arc::downgrade(&a)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn supports_trait_objects() {
        trait Named: Send + Sync {
            fn name(&self) -> &'static str;
        }
        struct Fixed;
        impl Named for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
        }

        let item: Arc<dyn Named> = Arc::new(Fixed);
        let registry: WeakRegistry<dyn Named> = WeakRegistry::new();
        registry.insert(&item);

        let names: Vec<_> = registry.iter().map(|item| item.name()).collect();
        assert_eq!(names, vec!["fixed"]);
        assert!(registry.remove(&item));
        assert!(registry.is_empty());
    }
}
