//! Cost-bounded LRU engine.
//!
//! Objects are kept in a slab-backed doubly-linked list ordered from most to least
//! recently used, with a key index pointing into the slab. Admission, touch and removal
//! are all O(1); eviction walks from the tail until the total cost fits again.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::error::CacheError;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::lru";

/// An object that can live in an [`LruCache`].
pub trait Cacheable: Send + Sync {
    /// Approximate size in bytes used for capacity accounting.
    fn cost(&self) -> usize;

    fn on_added(&self) {}

    /// Called once the object has left the cache. May be called more than once.
    fn on_removed(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlabIdx(usize);

struct SlabNode<K, V> {
    key: K,
    value: Arc<V>,
    cost: usize,
    prev: Option<SlabIdx>,
    next: Option<SlabIdx>,
}

struct LruState<K, V> {
    slots: Vec<Option<SlabNode<K, V>>>,
    free_indices: Vec<usize>,
    /// Most recently used.
    head: Option<SlabIdx>,
    /// Least recently used.
    tail: Option<SlabIdx>,
    index: HashMap<K, SlabIdx>,
    total_cost: usize,
}

impl<K: Eq + Hash + Clone, V> LruState<K, V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
            total_cost: 0,
        }
    }

    fn node(&self, idx: SlabIdx) -> Option<&SlabNode<K, V>> {
        self.slots.get(idx.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: SlabIdx) -> Option<&mut SlabNode<K, V>> {
        self.slots.get_mut(idx.0).and_then(Option::as_mut)
    }

    fn alloc(&mut self, node: SlabNode<K, V>) -> SlabIdx {
        match self.free_indices.pop() {
            Some(free) => {
                self.slots[free] = Some(node);
                SlabIdx(free)
            }
            None => {
                self.slots.push(Some(node));
                SlabIdx(self.slots.len() - 1)
            }
        }
    }

    fn unlink(&mut self, idx: SlabIdx) {
        let Some((prev, next)) = self.node(idx).map(|node| (node.prev, node.next)) else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = self.node_mut(prev_idx) {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next_idx) => {
                if let Some(next_node) = self.node_mut(next_idx) {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = None;
        }
    }

    fn link_front(&mut self, idx: SlabIdx) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(head_idx) => {
                if let Some(head_node) = self.node_mut(head_idx) {
                    head_node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn push_front(&mut self, key: K, value: Arc<V>, cost: usize) {
        let idx = self.alloc(SlabNode {
            key: key.clone(),
            value,
            cost,
            prev: None,
            next: None,
        });
        self.link_front(idx);
        self.index.insert(key, idx);
        self.total_cost += cost;
    }

    fn move_to_front(&mut self, idx: SlabIdx) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    /// Unlinks and frees a slot, clearing its links and dropping it from the index.
    fn release(&mut self, idx: SlabIdx) -> Option<(K, Arc<V>)> {
        self.unlink(idx);
        let node = self.slots.get_mut(idx.0)?.take()?;
        self.free_indices.push(idx.0);
        self.index.remove(&node.key);
        self.total_cost = self.total_cost.saturating_sub(node.cost);
        Some((node.key, node.value))
    }

    fn pop_back(&mut self) -> Option<(K, Arc<V>)> {
        let tail = self.tail?;
        self.release(tail)
    }

    fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.node(idx) else {
                break;
            };
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}

/// LRU cache bounded by the summed [`Cacheable::cost`] of its objects.
///
/// All structural changes happen under a single mutex. `on_added`/`on_removed` hooks run
/// after that mutex is released, so a hook may safely call back into the cache.
pub struct LruCache<K, V> {
    state: Mutex<LruState<K, V>>,
    capacity: usize,
    low_water: usize,
    len: AtomicUsize,
    cost: AtomicUsize,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Cacheable,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_low_water(capacity, capacity)
    }

    /// Once `capacity` is exceeded, evicts until the total cost is at most `low_water`.
    pub fn with_low_water(capacity: usize, low_water: usize) -> Self {
        Self {
            state: Mutex::new(LruState::new()),
            capacity,
            low_water: low_water.min(capacity),
            len: AtomicUsize::new(0),
            cost: AtomicUsize::new(0),
        }
    }

    /// Admits `value` under `key` as the most recently used object.
    ///
    /// Returns the number of objects evicted to make room. An object costing more than
    /// the capacity is rejected and leaves the cache untouched.
    pub fn add(&self, key: K, value: Arc<V>) -> Result<usize, CacheError> {
        let cost = value.cost();
        if cost > self.capacity {
            return Err(CacheError::rejected(cost, self.capacity));
        }

        let (replaced, evicted) = {
            let mut state = mutex_lock(&self.state, SOURCE, "add");

            if let Some(&idx) = state.index.get(&key)
                && state
                    .node(idx)
                    .is_some_and(|node| Arc::ptr_eq(&node.value, &value))
            {
                state.move_to_front(idx);
                return Ok(0);
            }

            let replaced = match state.index.get(&key).copied() {
                Some(idx) => state.release(idx),
                None => None,
            };
            state.push_front(key, Arc::clone(&value), cost);

            let mut evicted = Vec::new();
            if state.total_cost > self.capacity {
                while state.total_cost > self.low_water && state.head != state.tail {
                    match state.pop_back() {
                        Some(entry) => evicted.push(entry),
                        None => break,
                    }
                }
            }
            self.publish_counts(&state);
            (replaced, evicted)
        };

        if let Some((_, old)) = replaced {
            old.on_removed();
        }
        value.on_added();
        for (_, object) in &evicted {
            object.on_removed();
        }
        Ok(evicted.len())
    }

    /// Marks `key` as most recently used. Unknown keys are ignored.
    pub fn touch(&self, key: &K) {
        let mut state = mutex_lock(&self.state, SOURCE, "touch");
        if let Some(&idx) = state.index.get(key) {
            state.move_to_front(idx);
        }
    }

    /// Looks up `key` and marks it as most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = mutex_lock(&self.state, SOURCE, "get");
        let idx = *state.index.get(key)?;
        state.move_to_front(idx);
        state.node(idx).map(|node| Arc::clone(&node.value))
    }

    /// Looks up `key` without changing its position.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let state = mutex_lock(&self.state, SOURCE, "peek");
        let idx = *state.index.get(key)?;
        state.node(idx).map(|node| Arc::clone(&node.value))
    }

    pub fn contains(&self, key: &K) -> bool {
        mutex_lock(&self.state, SOURCE, "contains")
            .index
            .contains_key(key)
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "remove");
            let removed = match state.index.get(key).copied() {
                Some(idx) => state.release(idx),
                None => None,
            };
            self.publish_counts(&state);
            removed
        };

        let (_, value) = removed?;
        value.on_removed();
        Some(value)
    }

    /// Removes `key` only while it still maps to `expected`. Returns whether it did.
    pub fn remove_exact(&self, key: &K, expected: &Arc<V>) -> bool {
        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "remove_exact");
            let current = state.index.get(key).copied().filter(|idx| {
                state
                    .node(*idx)
                    .is_some_and(|node| Arc::ptr_eq(&node.value, expected))
            });
            let removed = current.and_then(|idx| state.release(idx));
            self.publish_counts(&state);
            removed
        };

        match removed {
            Some((_, value)) => {
                value.on_removed();
                true
            }
            None => false,
        }
    }

    /// Removes every object matching `predicate`, returning how many were removed.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let removed = {
            let mut state = mutex_lock(&self.state, SOURCE, "remove_where");
            let mut matching = Vec::new();
            let mut cursor = state.head;
            while let Some(idx) = cursor {
                let Some(node) = state.node(idx) else {
                    break;
                };
                if predicate(&node.key, &node.value) {
                    matching.push(idx);
                }
                cursor = node.next;
            }

            let removed: Vec<_> = matching
                .into_iter()
                .filter_map(|idx| state.release(idx))
                .collect();
            self.publish_counts(&state);
            removed
        };

        for (_, value) in &removed {
            value.on_removed();
        }
        removed.len()
    }

    pub fn clear(&self) {
        let drained = {
            let mut state = mutex_lock(&self.state, SOURCE, "clear");
            let mut drained = Vec::with_capacity(state.index.len());
            while let Some(entry) = state.pop_back() {
                drained.push(entry);
            }
            *state = LruState::new();
            self.publish_counts(&state);
            drained
        };

        for (_, value) in &drained {
            value.on_removed();
        }
    }

    /// Snapshot of keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        mutex_lock(&self.state, SOURCE, "keys").keys()
    }

    /// Approximate number of cached objects.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate total cost of cached objects.
    pub fn cost(&self) -> usize {
        self.cost.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn publish_counts(&self, state: &LruState<K, V>) {
        self.len.store(state.index.len(), Ordering::Relaxed);
        self.cost.store(state.total_cost, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Blob {
        size: usize,
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    impl Blob {
        fn new(size: usize) -> Arc<Self> {
            Arc::new(Self {
                size,
                added: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            })
        }

        fn removed(&self) -> usize {
            self.removed.load(Ordering::SeqCst)
        }
    }

    impl Cacheable for Blob {
        fn cost(&self) -> usize {
            self.size
        }

        fn on_added(&self) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn on_removed(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn cost_never_exceeds_capacity() {
        let cache = LruCache::new(100);
        for (i, size) in [30, 50, 40, 10, 90, 20, 60].into_iter().enumerate() {
            cache.add(i, Blob::new(size)).expect("object fits");
            assert!(cache.cost() <= cache.capacity(), "after add {i}");
        }
        cache.remove(&6);
        assert!(cache.cost() <= cache.capacity());
    }

    #[test]
    fn touched_object_survives_eviction() {
        let cache = LruCache::new(30);
        let a = Blob::new(10);
        let b = Blob::new(10);
        cache.add("a", Arc::clone(&a)).expect("add a");
        cache.add("b", Arc::clone(&b)).expect("add b");
        cache.add("c", Blob::new(10)).expect("add c");

        cache.touch(&"a");
        let evicted = cache.add("d", Blob::new(10)).expect("add d");

        assert_eq!(evicted, 1);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert_eq!(b.removed(), 1);
        assert_eq!(a.removed(), 0);
        assert_eq!(cache.keys(), vec!["d", "a", "c"]);
    }

    #[test]
    fn get_refreshes_but_peek_does_not() {
        let cache = LruCache::new(20);
        cache.add(1, Blob::new(10)).expect("add 1");
        cache.add(2, Blob::new(10)).expect("add 2");

        assert!(cache.peek(&1).is_some());
        assert_eq!(cache.keys(), vec![2, 1]);

        assert!(cache.get(&1).is_some());
        assert_eq!(cache.keys(), vec![1, 2]);

        cache.add(3, Blob::new(10)).expect("add 3");
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn remove_is_idempotent() {
        let cache = LruCache::new(100);
        let blob = Blob::new(40);
        cache.add("k", Arc::clone(&blob)).expect("add");
        cache.add("other", Blob::new(10)).expect("add other");

        assert!(cache.remove(&"k").is_some());
        assert!(cache.remove(&"k").is_none());

        assert_eq!(cache.cost(), 10);
        assert_eq!(cache.len(), 1);
        assert_eq!(blob.removed(), 1);
    }

    #[test]
    fn remove_exact_spares_a_replacement() {
        let cache = LruCache::new(100);
        let stale = Blob::new(10);
        let fresh = Blob::new(20);
        cache.add("k", Arc::clone(&stale)).expect("add stale");
        cache.add("k", Arc::clone(&fresh)).expect("add fresh");

        assert!(!cache.remove_exact(&"k", &stale));
        assert_eq!(cache.cost(), 20);
        assert_eq!(fresh.removed(), 0);

        assert!(cache.remove_exact(&"k", &fresh));
        assert!(cache.is_empty());
        assert_eq!(fresh.removed(), 1);
    }

    #[test]
    fn oversized_object_is_rejected_without_side_effects() {
        let cache = LruCache::new(50);
        cache.add("small", Blob::new(20)).expect("add small");

        let huge = Blob::new(51);
        let err = cache
            .add("huge", Arc::clone(&huge))
            .expect_err("object larger than capacity");
        assert!(matches!(err, CacheError::Rejected { cost: 51, limit: 50 }));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cost(), 20);
        assert_eq!(huge.added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replacing_a_key_notifies_the_previous_object() {
        let cache = LruCache::new(100);
        let first = Blob::new(30);
        let second = Blob::new(50);
        cache.add("k", Arc::clone(&first)).expect("add first");
        cache.add("k", Arc::clone(&second)).expect("replace");

        assert_eq!(first.removed(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cost(), 50);
        assert!(Arc::ptr_eq(&cache.peek(&"k").expect("present"), &second));
    }

    #[test]
    fn readding_the_same_object_only_touches_it() {
        let cache = LruCache::new(100);
        let blob = Blob::new(30);
        cache.add("k", Arc::clone(&blob)).expect("add");
        cache.add("other", Blob::new(30)).expect("add other");
        cache.add("k", Arc::clone(&blob)).expect("re-add");

        assert_eq!(blob.removed(), 0);
        assert_eq!(blob.added.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cost(), 60);
        assert_eq!(cache.keys(), vec!["k", "other"]);
    }

    #[test]
    fn low_water_mark_evicts_past_capacity() {
        let cache = LruCache::with_low_water(100, 50);
        for i in 0..5 {
            cache.add(i, Blob::new(20)).expect("add");
        }
        assert_eq!(cache.cost(), 100);

        let evicted = cache.add(5, Blob::new(20)).expect("add over capacity");
        assert_eq!(evicted, 4);
        assert_eq!(cache.cost(), 40);
        assert_eq!(cache.keys(), vec![5, 4]);
    }

    #[test]
    fn newest_object_is_never_evicted_by_its_own_admission() {
        let cache = LruCache::with_low_water(100, 10);
        cache.add("a", Blob::new(50)).expect("add a");
        cache.add("b", Blob::new(60)).expect("add b");

        assert_eq!(cache.keys(), vec!["b"]);
        assert_eq!(cache.cost(), 60);
    }

    #[test]
    fn remove_where_drops_matching_objects() {
        let cache = LruCache::new(1_000);
        for i in 0..10 {
            cache.add(i, Blob::new(10)).expect("add");
        }
        let removed = cache.remove_where(|key, _| key % 2 == 0);

        assert_eq!(removed, 5);
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.cost(), 50);
        assert_eq!(cache.keys(), vec![9, 7, 5, 3, 1]);
    }

    #[test]
    fn clear_notifies_every_object() {
        let cache = LruCache::new(100);
        let blobs: Vec<_> = (0..3).map(|_| Blob::new(10)).collect();
        for (i, blob) in blobs.iter().enumerate() {
            cache.add(i, Arc::clone(blob)).expect("add");
        }
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.cost(), 0);
        assert!(blobs.iter().all(|blob| blob.removed() == 1));

        cache.add(7, Blob::new(10)).expect("cache is reusable");
        assert_eq!(cache.keys(), vec![7]);
    }

    #[test]
    fn freed_slots_are_reused() {
        let cache = LruCache::new(30);
        for i in 0..100 {
            cache.add(i, Blob::new(10)).expect("add");
        }
        let state = mutex_lock(&cache.state, SOURCE, "test");
        assert!(state.slots.len() <= 4);
        assert_eq!(state.index.len(), 3);
    }
}
