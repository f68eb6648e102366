//! Byte-bounded LRU (Least Recently Used) map
//!
//! Uses an index-linked list over a slab for O(1) promotion and eviction.
//! Capacity is a byte budget: each value reports its own weight.

use std::collections::HashMap;
use std::hash::Hash;
use ahash::RandomState;

/// Values that know how many bytes they account for
pub trait Weighted {
    /// Approximate heap footprint in bytes
    fn weight(&self) -> usize;
}

/// Node in the LRU doubly-linked list
struct Node<K, V> {
    key: K,
    value: V,
    weight: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU map with a byte capacity
pub struct LruCache<K, V> {
    map: HashMap<K, usize, RandomState>,
    nodes: Vec<Option<Node<K, V>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: usize,
    size: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Weighted,
{
    /// Create a new LRU map holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");

        Self {
            map: HashMap::with_hasher(RandomState::new()),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
            size: 0,
        }
    }

    /// Get a value and mark it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(&idx) = self.map.get(key) {
            self.move_to_front(idx);
            self.nodes[idx].as_ref().map(|node| &node.value)
        } else {
            None
        }
    }

    /// Get a value without touching recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .and_then(|&idx| self.nodes[idx].as_ref())
            .map(|node| &node.value)
    }

    /// Insert or replace a value
    ///
    /// A value heavier than the whole capacity is not stored, and any older
    /// value under the same key is dropped.
    ///
    /// # Returns
    /// * `usize` - Number of other entries evicted to make room
    pub fn put(&mut self, key: K, value: V) -> usize {
        let weight = value.weight();
        if weight > self.capacity {
            self.remove(&key);
            return 0;
        }

        if let Some(&idx) = self.map.get(&key) {
            // Update existing
            if let Some(node) = &mut self.nodes[idx] {
                self.size = self.size - node.weight + weight;
                node.value = value;
                node.weight = weight;
            }
            self.move_to_front(idx);
        } else {
            // Insert new
            let idx = self.alloc_node();
            self.nodes[idx] = Some(Node {
                key: key.clone(),
                value,
                weight,
                prev: None,
                next: self.head,
            });

            if let Some(head_idx) = self.head {
                if let Some(head) = &mut self.nodes[head_idx] {
                    head.prev = Some(idx);
                }
            }

            self.head = Some(idx);
            if self.tail.is_none() {
                self.tail = Some(idx);
            }

            self.map.insert(key, idx);
            self.size += weight;
        }

        // The new head fits on its own, so eviction stops before reaching it
        let mut evicted = 0;
        while self.size > self.capacity && self.evict() {
            evicted += 1;
        }
        evicted
    }

    /// Remove a key
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if let Some(idx) = self.map.remove(key) {
            self.unlink(idx);
            self.free_node(idx);
            self.nodes[idx].take().map(|node| {
                self.size -= node.weight;
                node.value
            })
        } else {
            None
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Bytes currently accounted
    pub fn size(&self) -> usize {
        self.size
    }

    /// Byte capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.size = 0;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return; // Already at front
        }

        self.unlink(idx);

        if let Some(node) = &mut self.nodes[idx] {
            node.prev = None;
            node.next = self.head;
        }

        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(node) = &self.nodes[idx] {
            (node.prev, node.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    /// Drop the least recently used entry; false when empty
    fn evict(&mut self) -> bool {
        let Some(tail_idx) = self.tail else {
            return false;
        };
        self.unlink(tail_idx);
        match self.nodes[tail_idx].take() {
            Some(node) => {
                self.map.remove(&node.key);
                self.size -= node.weight;
                self.free_node(tail_idx);
                true
            }
            None => false,
        }
    }

    fn alloc_node(&mut self) -> usize {
        if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(None);
            idx
        }
    }

    fn free_node(&mut self, idx: usize) {
        self.free_list.push(idx);
    }
}
