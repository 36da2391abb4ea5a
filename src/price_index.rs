//! Price Index - a crit-bit tree of price levels inside a fixed arena.
//!
//! Inner nodes split on the first differing bit of the price, so the tree
//! depth is bounded by the 64 key bits regardless of how many levels are
//! live. Leaves own the `PriceLevel` for their price. Leaf indices move
//! when the tree is reshaped, so callers address levels by price only.

use arrayvec::ArrayVec;

use crate::arena::{Arena, ArenaIndex, NULL_INDEX};
use crate::price_level::PriceLevel;

/// Upper bound on nodes pending in an iterator stack (64 inner levels + leaf + slack).
const MAX_STACK: usize = 66;

/// A node of the crit-bit tree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexNode {
    /// Every key below shares the top `prefix_len` bits of `key`
    Inner {
        prefix_len: u32,
        key: u64,
        children: [ArenaIndex; 2],
    },
    /// One live price level
    Leaf { price: u64, level: PriceLevel },
}

impl Default for IndexNode {
    fn default() -> Self {
        IndexNode::Leaf {
            price: 0,
            level: PriceLevel::new(),
        }
    }
}

#[inline]
fn shared_prefix(a: u64, b: u64) -> u32 {
    (a ^ b).leading_zeros()
}

#[inline]
fn bit_at(key: u64, depth: u32) -> usize {
    ((key >> (63 - depth)) & 1) as usize
}

/// Ordered map from price to `PriceLevel` with no heap growth.
pub struct PriceIndex {
    nodes: Arena<IndexNode>,
    root: ArenaIndex,
    leaf_count: u32,
}

impl PriceIndex {
    /// Room for `max_levels` distinct prices (a tree of n leaves uses 2n-1 nodes).
    pub fn new(max_levels: u32) -> Self {
        let capacity = max_levels.saturating_mul(2).saturating_sub(1);
        Self {
            nodes: Arena::new(capacity),
            root: NULL_INDEX,
            leaf_count: 0,
        }
    }

    /// Number of live price levels
    #[inline]
    pub fn len(&self) -> usize {
        self.leaf_count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root == NULL_INDEX
    }

    fn find(&self, price: u64) -> Option<ArenaIndex> {
        let mut idx = self.root;
        if idx == NULL_INDEX {
            return None;
        }
        loop {
            match *self.nodes.get(idx) {
                IndexNode::Leaf { price: p, .. } => return (p == price).then_some(idx),
                IndexNode::Inner { prefix_len, key, children } => {
                    if shared_prefix(key, price) < prefix_len {
                        return None;
                    }
                    idx = children[bit_at(price, prefix_len)];
                }
            }
        }
    }

    /// Level at `price`, if live
    pub fn level(&self, price: u64) -> Option<&PriceLevel> {
        let idx = self.find(price)?;
        match self.nodes.get(idx) {
            IndexNode::Leaf { level, .. } => Some(level),
            IndexNode::Inner { .. } => None,
        }
    }

    /// Mutable level at `price`, if live
    pub fn level_mut(&mut self, price: u64) -> Option<&mut PriceLevel> {
        let idx = self.find(price)?;
        match self.nodes.get_mut(idx) {
            IndexNode::Leaf { level, .. } => Some(level),
            IndexNode::Inner { .. } => None,
        }
    }

    /// Whether `insert(price)` would succeed
    pub fn can_insert(&self, price: u64) -> bool {
        if self.find(price).is_some() {
            return true;
        }
        let needed = if self.root == NULL_INDEX { 1 } else { 2 };
        self.nodes.available() >= needed
    }

    /// Find or create the level at `price`. Returns `None` when the index is full.
    pub fn insert(&mut self, price: u64) -> Option<&mut PriceLevel> {
        let leaf = self.insert_leaf(price)?;
        match self.nodes.get_mut(leaf) {
            IndexNode::Leaf { level, .. } => Some(level),
            IndexNode::Inner { .. } => None,
        }
    }

    fn insert_leaf(&mut self, price: u64) -> Option<ArenaIndex> {
        let new_leaf = IndexNode::Leaf {
            price,
            level: PriceLevel::new(),
        };

        if self.root == NULL_INDEX {
            let leaf = self.nodes.alloc(new_leaf)?;
            self.root = leaf;
            self.leaf_count += 1;
            return Some(leaf);
        }
        if let Some(existing) = self.find(price) {
            return Some(existing);
        }
        if self.nodes.available() < 2 {
            return None;
        }

        let mut idx = self.root;
        loop {
            let node = *self.nodes.get(idx);
            let (node_key, node_prefix) = match node {
                IndexNode::Leaf { price: p, .. } => (p, 64),
                IndexNode::Inner { prefix_len, key, .. } => (key, prefix_len),
            };
            let shared = shared_prefix(node_key, price);

            if shared >= node_prefix {
                if let IndexNode::Inner { prefix_len, children, .. } = node {
                    idx = children[bit_at(price, prefix_len)];
                    continue;
                }
                // Equal leaf keys were handled by `find`
                return None;
            }

            // Split: the old node moves to a fresh slot, an inner node takes its place
            let moved = self.nodes.alloc(node)?;
            let leaf = self.nodes.alloc(new_leaf)?;
            let new_bit = bit_at(price, shared);
            let mut children = [moved; 2];
            children[new_bit] = leaf;
            *self.nodes.get_mut(idx) = IndexNode::Inner {
                prefix_len: shared,
                key: price,
                children,
            };
            self.leaf_count += 1;
            return Some(leaf);
        }
    }

    /// Remove the level at `price`, returning it.
    pub fn remove(&mut self, price: u64) -> Option<PriceLevel> {
        if self.root == NULL_INDEX {
            return None;
        }

        let mut parent = NULL_INDEX;
        let mut parent_children = [NULL_INDEX; 2];
        let mut branch = 0usize;
        let mut idx = self.root;

        let level = loop {
            match *self.nodes.get(idx) {
                IndexNode::Leaf { price: p, level } => {
                    if p != price {
                        return None;
                    }
                    break level;
                }
                IndexNode::Inner { prefix_len, key, children } => {
                    if shared_prefix(key, price) < prefix_len {
                        return None;
                    }
                    parent = idx;
                    parent_children = children;
                    branch = bit_at(price, prefix_len);
                    idx = children[branch];
                }
            }
        };

        if parent == NULL_INDEX {
            self.root = NULL_INDEX;
            self.nodes.free(idx);
        } else {
            // The sibling collapses into the parent's slot
            let sibling = self.nodes.free(parent_children[1 - branch]);
            self.nodes.free(idx);
            *self.nodes.get_mut(parent) = sibling;
        }
        self.leaf_count -= 1;
        Some(level)
    }

    fn edge_leaf(&self, branch: usize) -> Option<(u64, &PriceLevel)> {
        let mut idx = self.root;
        if idx == NULL_INDEX {
            return None;
        }
        loop {
            match self.nodes.get(idx) {
                IndexNode::Leaf { price, level } => return Some((*price, level)),
                IndexNode::Inner { children, .. } => idx = children[branch],
            }
        }
    }

    /// Lowest price level
    pub fn min(&self) -> Option<(u64, &PriceLevel)> {
        self.edge_leaf(0)
    }

    /// Highest price level
    pub fn max(&self) -> Option<(u64, &PriceLevel)> {
        self.edge_leaf(1)
    }

    /// Walk levels in ascending (or descending) price order.
    pub fn iter(&self, descending: bool) -> PriceIter<'_> {
        let mut stack = ArrayVec::new();
        if self.root != NULL_INDEX {
            stack.push(self.root);
        }
        PriceIter {
            nodes: &self.nodes,
            stack,
            descending,
        }
    }

    pub fn warm_up(&mut self) {
        self.nodes.warm_up();
    }
}

impl std::fmt::Debug for PriceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceIndex")
            .field("levels", &self.leaf_count)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// In-order walk over the tree using a fixed stack
pub struct PriceIter<'a> {
    nodes: &'a Arena<IndexNode>,
    stack: ArrayVec<ArenaIndex, MAX_STACK>,
    descending: bool,
}

impl<'a> Iterator for PriceIter<'a> {
    type Item = (u64, &'a PriceLevel);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(idx) = self.stack.pop() {
            match self.nodes.get(idx) {
                IndexNode::Leaf { price, level } => return Some((*price, level)),
                IndexNode::Inner { children, .. } => {
                    // Push the later branch first so the earlier one pops next
                    let (first, second) = if self.descending {
                        (children[1], children[0])
                    } else {
                        (children[0], children[1])
                    };
                    self.stack.push(second);
                    self.stack.push(first);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeSet;

    fn prices(index: &PriceIndex, descending: bool) -> Vec<u64> {
        index.iter(descending).map(|(p, _)| p).collect()
    }

    #[test]
    fn test_empty_index() {
        let index = PriceIndex::new(8);
        assert!(index.is_empty());
        assert_eq!(index.min(), None);
        assert_eq!(index.max(), None);
        assert!(index.level(100).is_none());
        assert_eq!(prices(&index, false), Vec::<u64>::new());
    }

    #[test]
    fn test_insert_and_order() {
        let mut index = PriceIndex::new(16);
        for p in [55, 50, 53, 52, 1, u64::MAX, 54] {
            assert!(index.insert(p).is_some());
        }
        assert_eq!(index.len(), 7);
        assert_eq!(prices(&index, false), vec![1, 50, 52, 53, 54, 55, u64::MAX]);
        assert_eq!(prices(&index, true), vec![u64::MAX, 55, 54, 53, 52, 50, 1]);
        assert_eq!(index.min().map(|(p, _)| p), Some(1));
        assert_eq!(index.max().map(|(p, _)| p), Some(u64::MAX));
    }

    #[test]
    fn test_insert_existing_is_idempotent() {
        let mut index = PriceIndex::new(4);
        index.insert(10).unwrap().base_lots = 7;
        assert_eq!(index.insert(10).unwrap().base_lots, 7);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let mut index = PriceIndex::new(2);
        assert!(index.insert(10).is_some());
        assert!(index.insert(20).is_some());
        assert!(!index.can_insert(30));
        assert!(index.insert(30).is_none());
        assert!(index.can_insert(20));

        index.remove(10).unwrap();
        assert!(index.can_insert(30));
        assert!(index.insert(30).is_some());
    }

    #[test]
    fn test_remove() {
        let mut index = PriceIndex::new(8);
        for p in [5, 9, 7, 3] {
            index.insert(p);
        }
        assert!(index.remove(8).is_none());
        assert!(index.remove(7).is_some());
        assert_eq!(prices(&index, false), vec![3, 5, 9]);
        assert!(index.remove(3).is_some());
        assert!(index.remove(9).is_some());
        assert!(index.remove(5).is_some());
        assert!(index.is_empty());
        assert!(index.remove(5).is_none());
    }

    #[test]
    fn test_matches_btreeset_under_churn() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut index = PriceIndex::new(512);
        let mut reference = BTreeSet::new();

        for _ in 0..5_000 {
            let price = rng.gen_range(1..400u64) * 25;
            if rng.gen_bool(0.6) {
                if index.insert(price).is_some() {
                    reference.insert(price);
                }
            } else {
                assert_eq!(index.remove(price).is_some(), reference.remove(&price));
            }
            assert_eq!(index.len(), reference.len());
        }

        let expected: Vec<u64> = reference.iter().copied().collect();
        assert_eq!(prices(&index, false), expected);
        assert_eq!(index.min().map(|(p, _)| p), reference.first().copied());
        assert_eq!(index.max().map(|(p, _)| p), reference.last().copied());
    }
}
