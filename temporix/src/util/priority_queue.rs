//! Associative priority queue with O(log N) cancellation.

#![allow(unused)]

use slab::Slab;

/// An associative container optimized for extraction of the value with the
/// lowest key and for deletion of arbitrary key-value pairs.
///
/// This is a conventional array-based binary min-heap, except that each heap
/// item is cross-indexed with a slab-allocated node holding the value and a
/// back-pointer to the item's current heap slot. The cross-index is what makes
/// *O*(log(*N*)) deletion of an arbitrary pair possible: a unique index
/// returned at insertion time resolves directly to the pair's current heap
/// position, with no linear scan.
///
/// Heap items additionally carry a unique, monotonically increasing epoch so
/// that same-key pairs are pulled in insertion (FIFO) order. The epoch also
/// disambiguates insertion indices whose slab slot has been recycled, which
/// makes deletion with a stale [`InsertKey`] a harmless no-op.
pub(crate) struct PriorityQueue<K, V>
where
    K: Copy + Ord,
{
    heap: Vec<Item<K>>,
    slab: Slab<Node<V>>,
    next_epoch: u64,
}

impl<K: Copy + Ord, V> PriorityQueue<K, V> {
    /// Creates an empty `PriorityQueue`.
    pub(crate) fn new() -> Self {
        Self {
            heap: Vec::new(),
            slab: Slab::new(),
            next_epoch: 0,
        }
    }

    /// Returns the number of key-value pairs in the queue.
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue contains no pair at all.
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts a new key-value pair and returns a unique insertion key.
    pub(crate) fn insert(&mut self, key: K, value: V) -> InsertKey {
        let epoch = self.next_epoch;
        assert_ne!(epoch, u64::MAX);
        self.next_epoch += 1;

        let slab_idx = self.slab.insert(Node {
            value,
            heap_idx: 0, // placeholder, set by `sift_up`
        });

        let heap_idx = self.heap.len();
        let item = Item {
            key: UniqueKey { key, epoch },
            slab_idx,
        };
        self.heap.push(item);
        self.sift_up(item, heap_idx);

        InsertKey { slab_idx, epoch }
    }

    /// Removes and returns the pair with the lowest key.
    ///
    /// If several pairs share the lowest key, the one inserted first is
    /// returned.
    pub(crate) fn pull(&mut self) -> Option<(K, V)> {
        let item = *self.heap.first()?;

        let node = self.slab.remove(item.slab_idx);

        // Sift the last heap item down from the vacated root.
        let last_item = self.heap.pop().unwrap();
        if last_item.slab_idx != item.slab_idx {
            self.sift_down(last_item, 0);
        }

        Some((item.key.key, node.value))
    }

    /// Returns a reference to the pair with the lowest key, leaving it in the
    /// queue.
    pub(crate) fn peek(&self) -> Option<(&K, &V)> {
        let item = self.heap.first()?;

        Some((&item.key.key, &self.slab[item.slab_idx].value))
    }

    /// Returns a reference to the lowest key, leaving the pair in the queue.
    pub(crate) fn peek_key(&self) -> Option<&K> {
        self.heap.first().map(|item| &item.key.key)
    }

    /// Deletes the pair associated with the provided insertion key if it is
    /// still in the queue, reporting whether it was.
    ///
    /// An insertion key obtained from another `PriorityQueue` instance is a
    /// logic error and may delete an arbitrary pair.
    pub(crate) fn delete(&mut self, insert_key: InsertKey) -> bool {
        // The pair is still queued iff (i) a node exists at this slab index
        // and (ii) the node's heap item carries the same epoch.
        let heap_idx = match self.slab.get(insert_key.slab_idx) {
            Some(node) if self.heap[node.heap_idx].key.epoch == insert_key.epoch => node.heap_idx,
            _ => return false,
        };

        // Unless the deleted item is the last one, sift the last item up or
        // down from the vacated slot, whichever restores the heap invariant.
        let last_item = self.heap.pop().unwrap();
        if let Some(item) = self.heap.get(heap_idx) {
            if last_item.key < item.key {
                self.sift_up(last_item, heap_idx);
            } else {
                self.sift_down(last_item, heap_idx);
            }
        }

        self.slab.remove(insert_key.slab_idx);

        true
    }

    /// Removes and returns all pairs, lowest key first.
    pub(crate) fn drain(&mut self) -> Vec<(K, V)> {
        let mut pairs = Vec::with_capacity(self.heap.len());
        while let Some(pair) = self.pull() {
            pairs.push(pair);
        }

        pairs
    }

    /// Takes a heap item and, starting at `heap_idx`, moves it up the heap
    /// while a parent has a larger key.
    fn sift_up(&mut self, item: Item<K>, heap_idx: usize) {
        let mut child_heap_idx = heap_idx;

        while child_heap_idx != 0 {
            let parent_heap_idx = (child_heap_idx - 1) / 2;
            if item.key >= self.heap[parent_heap_idx].key {
                break;
            }

            // Move the parent down one level.
            self.heap[child_heap_idx] = self.heap[parent_heap_idx];
            let parent_slab_idx = self.heap[child_heap_idx].slab_idx;
            self.slab[parent_slab_idx].heap_idx = child_heap_idx;

            child_heap_idx = parent_heap_idx;
        }

        self.heap[child_heap_idx] = item;
        self.slab[item.slab_idx].heap_idx = child_heap_idx;
    }

    /// Takes a heap item and, starting at `heap_idx`, moves it down the heap
    /// while a child has a smaller key.
    fn sift_down(&mut self, item: Item<K>, heap_idx: usize) {
        let mut parent_heap_idx = heap_idx;
        let mut child_heap_idx = 2 * parent_heap_idx + 1;

        while child_heap_idx < self.heap.len() {
            // If the sibling exists and has a smaller key, swap with it
            // instead.
            if let Some(sibling) = self.heap.get(child_heap_idx + 1) {
                if sibling.key < self.heap[child_heap_idx].key {
                    child_heap_idx += 1;
                }
            }

            if item.key <= self.heap[child_heap_idx].key {
                break;
            }

            // Move the child up one level.
            self.heap[parent_heap_idx] = self.heap[child_heap_idx];
            let child_slab_idx = self.heap[parent_heap_idx].slab_idx;
            self.slab[child_slab_idx].heap_idx = parent_heap_idx;

            parent_heap_idx = child_heap_idx;
            child_heap_idx = 2 * parent_heap_idx + 1;
        }

        self.heap[parent_heap_idx] = item;
        self.slab[item.slab_idx].heap_idx = parent_heap_idx;
    }
}

/// Data related to a single key-value pair stored in the heap.
#[derive(Copy, Clone)]
struct Item<K: Copy> {
    // A unique key by which the heap is sorted.
    key: UniqueKey<K>,
    // An index pointing to the associated node in the slab.
    slab_idx: usize,
}

/// Data related to a single key-value pair stored in the slab.
struct Node<V> {
    // The value associated with this node.
    value: V,
    // Current index of the node's item in the heap.
    heap_idx: usize,
}

/// A unique insertion key that can be used to delete a key-value pair.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct InsertKey {
    // An index pointing to a node in the slab.
    slab_idx: usize,
    // The epoch when the node was inserted.
    epoch: u64,
}

/// A unique key made of the user-provided key complemented by a unique epoch.
///
/// Implementation note: `UniqueKey` automatically derives `PartialOrd`, which
/// implies that lexicographic order between `key` and `epoch` must be
/// preserved to make sure that `key` has a higher sorting priority than
/// `epoch`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct UniqueKey<K: Copy> {
    /// The user-provided key.
    key: K,
    /// A unique epoch that indicates the insertion date.
    epoch: u64,
}
