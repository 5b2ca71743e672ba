//! # Bounded LRU + TTL Store
//!
//! In-memory key-value store with a hard entry cap, least-recently-used
//! eviction, and lazy per-entry expiration. One mutex guards the whole
//! store; every operation is O(1) expected and holds the lock only for the
//! duration of that operation.
//!
//! ## Structure
//!
//! ```text
//! Store
//!   └── inner: Mutex<StoreInner>
//!         ├── map: HashMap<Arc<str>, usize>      key -> node index
//!         ├── nodes: Vec<Option<Node>>           dense node arena
//!         ├── free: Vec<usize>                   recycled slots
//!         └── head/tail                          recency list endpoints
//!               └── Node { key, value, expires_at, prev, next }
//! ```
//!
//! The recency list is index-based and intrusive: `head` is the least
//! recently used entry (the eviction victim), `tail` the most recent.
//! Every map key appears exactly once in the list and vice versa.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Default entry capacity.
pub const DEFAULT_MAX_KEYS: usize = 10_000;

/// Default sweeper tick.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of entries the sweeper examines per tick.
pub const DEFAULT_SWEEP_SAMPLE: usize = 20;

/// One stored entry plus its recency links.
#[derive(Debug)]
struct Node {
    // Shared with the map key to avoid a second allocation.
    key: Arc<str>,
    value: String,
    // Absolute deadline; None means no expiration.
    expires_at: Option<Instant>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    map: HashMap<Arc<str>, usize, RandomState>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    /// Least recently used entry.
    head: Option<usize>,
    /// Most recently used entry.
    tail: Option<usize>,
}

impl StoreInner {
    fn new() -> Self {
        StoreInner {
            map: HashMap::with_hasher(RandomState::new()),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Detaches `idx` from the recency list.
    fn lru_remove(&mut self, idx: usize) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        if let Some(prev_idx) = prev {
            if let Some(prev_node) = self.nodes[prev_idx].as_mut() {
                prev_node.next = next;
            }
        } else {
            self.head = next;
        }

        if let Some(next_idx) = next {
            if let Some(next_node) = self.nodes[next_idx].as_mut() {
                next_node.prev = prev;
            }
        } else {
            self.tail = prev;
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    /// Appends `idx` at the most-recently-used end.
    fn lru_push_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }

        if let Some(tail_idx) = tail {
            if let Some(tail_node) = self.nodes[tail_idx].as_mut() {
                tail_node.next = Some(idx);
            }
        } else {
            self.head = Some(idx);
        }

        self.tail = Some(idx);
    }

    /// Marks `idx` as most recently used.
    fn touch(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.lru_remove(idx);
        self.lru_push_back(idx);
    }

    /// Inserts a new entry at the most-recently-used position.
    fn insert_new(&mut self, key: Arc<str>, value: String, expires_at: Option<Instant>) {
        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });

        self.nodes[idx] = Some(Node {
            key: Arc::clone(&key),
            value,
            expires_at,
            prev: None,
            next: None,
        });
        self.lru_push_back(idx);
        self.map.insert(key, idx);
    }

    /// Removes a node by index, keeping map and list in step.
    fn remove_idx(&mut self, idx: usize) {
        let key = match self.nodes[idx].as_ref() {
            Some(node) => Arc::clone(&node.key),
            None => return,
        };

        // Detach before clearing the slot so the links stay valid.
        self.lru_remove(idx);
        self.nodes[idx] = None;
        self.map.remove(key.as_ref());
        self.free.push(idx);
    }

    /// Removes the least recently used entry.
    fn pop_lru(&mut self) {
        if let Some(idx) = self.head {
            self.remove_idx(idx);
        }
    }
}

/// Thread-safe bounded store.
///
/// Cloning strings on `get` keeps the lock hold time to a map lookup and a
/// list splice; values are short tokens by protocol contract.
#[derive(Debug)]
pub struct Store {
    inner: Mutex<StoreInner>,
    max_keys: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_KEYS)
    }

    /// Creates a store holding at most `max_keys` entries.
    pub fn with_capacity(max_keys: usize) -> Self {
        Store {
            inner: Mutex::new(StoreInner::new()),
            max_keys: max_keys.max(1),
        }
    }

    /// Inserts or replaces an entry.
    ///
    /// An existing key is updated in place: new value, recomputed deadline
    /// (including back to "never" for `ttl = None`), moved to the
    /// most-recently-used position. The capacity check is bypassed for
    /// in-place updates. A new key at capacity evicts the least recently
    /// used entry first.
    pub fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.map.get(key) {
            if let Some(node) = inner.nodes[idx].as_mut() {
                node.value = value.to_string();
                node.expires_at = expires_at;
            }
            inner.touch(idx);
            return;
        }

        if inner.map.len() >= self.max_keys {
            inner.pop_lru();
        }
        inner.insert_new(Arc::from(key), value.to_string(), expires_at);
    }

    /// Looks up a key, refreshing its recency on a hit.
    ///
    /// An expired entry is removed on observation and reported as a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let idx = *inner.map.get(key)?;
        let expired = inner.nodes[idx].as_ref().map(|node| node.is_expired(now))?;
        if expired {
            inner.remove_idx(idx);
            return None;
        }

        let value = inner.nodes[idx].as_ref().map(|node| node.value.clone());
        inner.touch(idx);
        value
    }

    /// Removes a key. Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let idx = match inner.map.get(key) {
            Some(&idx) => idx,
            None => return false,
        };

        let expired = inner.nodes[idx]
            .as_ref()
            .map(|node| node.is_expired(now))
            .unwrap_or(false);
        inner.remove_idx(idx);
        !expired
    }

    /// Reports whether a key holds a live entry. Does not touch recency.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let idx = match inner.map.get(key) {
            Some(&idx) => idx,
            None => return false,
        };

        let expired = inner.nodes[idx]
            .as_ref()
            .map(|node| node.is_expired(now))
            .unwrap_or(false);
        if expired {
            inner.remove_idx(idx);
            return false;
        }
        true
    }

    /// Current number of entries, expired-but-unobserved included.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries among up to `limit` scanned from the LRU end.
    ///
    /// Bounded so the sweeper never holds the store mutex for more than one
    /// small batch. Returns the number removed.
    pub fn purge_expired(&self, now: Instant, limit: usize) -> usize {
        let mut inner = self.inner.lock();

        let mut expired = Vec::new();
        let mut cursor = inner.head;
        let mut scanned = 0;
        while let Some(idx) = cursor {
            if scanned >= limit {
                break;
            }
            let node = match inner.nodes[idx].as_ref() {
                Some(node) => node,
                None => break,
            };
            cursor = node.next;
            if node.is_expired(now) {
                expired.push(idx);
            }
            scanned += 1;
        }

        let removed = expired.len();
        for idx in expired {
            inner.remove_idx(idx);
        }
        removed
    }

    /// Starts a background thread that periodically drops expired entries.
    ///
    /// Purely an optimization over lazy expiry on access. The returned
    /// handle stops the thread when dropped or via [`SweeperHandle::stop`].
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration, sample: usize) -> SweeperHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let store = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                store.purge_expired(Instant::now(), sample);
            }
        });

        SweeperHandle {
            stop,
            join: Some(join),
        }
    }

    /// Checks the map/list bijection. Test support.
    #[cfg(test)]
    fn check_invariants(&self) {
        let inner = self.inner.lock();

        let live = inner.nodes.iter().filter(|slot| slot.is_some()).count();
        assert_eq!(inner.map.len(), live, "map and arena disagree on size");
        assert!(inner.map.len() <= self.max_keys, "capacity exceeded");

        for (key, &idx) in inner.map.iter() {
            let node = inner.nodes[idx].as_ref().expect("map points at empty slot");
            assert_eq!(node.key.as_ref(), key.as_ref(), "map key mismatch");
        }

        let mut seen = 0;
        let mut prev = None;
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let node = inner.nodes[idx].as_ref().expect("list points at empty slot");
            assert_eq!(node.prev, prev, "broken back link");
            prev = Some(idx);
            cursor = node.next;
            seen += 1;
            assert!(seen <= live, "recency list cycles");
        }
        assert_eq!(seen, live, "recency list misses entries");
        assert_eq!(inner.tail, prev, "tail does not end the list");
    }
}

/// Handle for the background expiration sweeper.
pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
