use std::{
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    hash::Hash,
};

struct Entry<V> {
    value: V,
    /// Recency stamp; larger means more recently used.
    stamp: u64,
}

type EvictedFn<K, V> = Box<dyn Fn(K, V) + Send>;

/// Fixed capacity least-recently-used cache.
///
/// Inserting a new key into a full cache evicts the least recently used
/// entry and hands it to the eviction callback, if any. Explicit `remove`
/// and `drain` do not invoke the callback.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    capacity: usize,
    entries: HashMap<K, Entry<V>>,
    /// Recency order: oldest stamp first.
    order: BTreeMap<u64, K>,
    next_stamp: u64,
    evicted_fn: Option<EvictedFn<K, V>>,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(capacity: usize, evicted_fn: Option<EvictedFn<K, V>>) -> Self {
        Cache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_stamp: 0,
            evicted_fn,
            stats: Stats::default(),
        }
    }

    fn stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    /// Returns the value for `key`, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let stamp = self.stamp();
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.order.remove(&entry.stamp);
                entry.stamp = stamp;
                self.order.insert(stamp, key.clone());
                self.stats.hits += 1;
                Some(&entry.value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Looks at a value without touching recency or stats.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts at the most recently used position, evicting the least
    /// recently used entry when a new key would exceed capacity. Returns the
    /// previous value when `key` was already cached.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let stamp = self.stamp();
        if let Some(entry) = self.entries.get_mut(&key) {
            self.order.remove(&entry.stamp);
            entry.stamp = stamp;
            self.order.insert(stamp, key);
            return Some(std::mem::replace(&mut entry.value, value));
        }

        while self.entries.len() >= self.capacity {
            self.evict();
        }
        self.order.insert(stamp, key.clone());
        self.entries.insert(key, Entry { value, stamp });
        None
    }

    fn evict(&mut self) {
        let Some((_, key)) = self.order.pop_first() else {
            return;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.stats.evictions += 1;
            if let Some(evicted_fn) = &self.evicted_fn {
                evicted_fn(key, entry.value);
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.stamp);
        Some(entry.value)
    }

    /// Removes every entry, least recently used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let order = std::mem::take(&mut self.order);
        order
            .into_values()
            .filter_map(|key| self.entries.remove(&key).map(|entry| (key, entry.value)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        (self.stats.hits, self.stats.misses)
    }

    pub fn evictions(&self) -> usize {
        self.stats.evictions
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.values()
    }
}

#[derive(Default)]
struct Stats {
    hits: usize,
    misses: usize,
    evictions: usize,
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;
    use std::sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc, Mutex,
    };

    use super::*;

    fn assert_opt_eq<V: PartialEq + Debug>(opt: Option<&V>, v: V) {
        assert!(opt.is_some());
        assert_eq!(opt.unwrap(), &v);
    }

    #[test]
    fn test_push_and_read() {
        let mut cache = Cache::new(2, None);

        cache.insert("apple", "red");
        cache.insert("banana", "yellow");

        assert_opt_eq(cache.get(&"apple"), "red");
        assert_opt_eq(cache.get(&"banana"), "yellow");
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let mut cache = Cache::new(2, None);

        cache.insert("apple", "red");
        cache.insert("banana", "yellow");
        // Touch apple so banana becomes the oldest.
        cache.get(&"apple");
        cache.insert("pear", "green");

        assert!(cache.get(&"banana").is_none());
        assert_opt_eq(cache.get(&"apple"), "red");
        assert_opt_eq(cache.get(&"pear"), "green");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_reinsert_replaces_without_eviction() {
        let mut cache = Cache::new(2, None);
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert_eq!(cache.insert(1, "c"), Some("a"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 0);
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_no_memory_leaks() {
        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct DropCounter;

        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, SeqCst);
            }
        }

        let n = 100;
        for _ in 0..n {
            let mut cache = Cache::new(20, None);
            for i in 0..n {
                cache.insert(i, DropCounter {});
            }
        }
        assert_eq!(DROP_COUNT.load(SeqCst), n * n);
    }

    #[test]
    fn test_eviction_fn() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let evicted_fn = {
            let evicted = evicted.clone();
            Box::new(move |k: i32, v: i32| {
                evicted.lock().unwrap().push((k, v));
            })
        };

        let mut cache = Cache::new(2, Some(evicted_fn));

        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.insert(3, 3); // expect eviction

        assert_eq!(*evicted.lock().unwrap(), vec![(1, 1)]);

        // Explicit removal bypasses the callback.
        cache.remove(&2);
        assert_eq!(cache.drain(), vec![(3, 3)]);
        assert_eq!(evicted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_hit_ratio() {
        let cap = 10;
        let mut cache = Cache::new(cap, None);

        for i in 0..cap {
            cache.insert(i, i);
        }

        for i in 0..cap {
            assert_eq!(cache.get(&i), Some(&i));
        }
        assert!(cache.get(&cap).is_none());

        assert_eq!(cache.stats(), (cap, 1));
    }
}
