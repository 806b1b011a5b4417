//! Fixed-capacity least-recently-used cache

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A slot in the recency list
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded map evicting the least recently used key on overflow
///
/// Entries live in a slot arena linked into a doubly linked list: head is the
/// most recently used entry, tail the least. An evicted tail slot is reused
/// for the incoming entry, so the arena never grows past `capacity`.
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries
    ///
    /// A capacity of zero disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Look up a key, marking it most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.map.get(key)?;
        self.move_to_head(slot);
        Some(&self.entries[slot].value)
    }

    /// Look up a key without touching its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).map(|&slot| &self.entries[slot].value)
    }

    /// Insert or update a key, marking it most recently used
    pub fn set(&mut self, key: K, value: V) {
        if let Some(&slot) = self.map.get(&key) {
            self.entries[slot].value = value;
            self.move_to_head(slot);
            return;
        }

        if self.capacity == 0 {
            return;
        }

        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };

        let slot = match self.tail {
            Some(tail) if self.entries.len() >= self.capacity => {
                self.detach(tail);
                let evicted = std::mem::replace(&mut self.entries[tail], entry);
                self.map.remove(&evicted.key);
                tail
            }
            _ => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };

        self.map.insert(key, slot);
        self.attach_head(slot);
    }

    /// Drop every entry
    pub fn reset(&mut self) {
        self.map.clear();
        self.entries.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            entries: &self.entries,
            cursor: self.head,
        }
    }

    fn move_to_head(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.detach(slot);
        self.attach_head(slot);
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = &self.entries[slot];
            (entry.prev, entry.next)
        };

        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }

        let entry = &mut self.entries[slot];
        entry.prev = None;
        entry.next = None;
    }

    fn attach_head(&mut self, slot: usize) {
        self.entries[slot].prev = None;
        self.entries[slot].next = self.head;
        if let Some(head) = self.head {
            self.entries[head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.map.len())
            .finish()
    }
}

/// Iterator over cache keys in recency order
pub struct Keys<'a, K, V> {
    entries: &'a [Entry<K, V>],
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = &self.entries[self.cursor?];
        self.cursor = entry.next;
        Some(&entry.key)
    }
}
