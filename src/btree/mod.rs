//! Multiway search tree mapping record keys to data blocks
//!
//! Every node holds up to [`NODE_SIZE`] entries. Leaves store the block id of
//! each key; internal nodes store one routing entry per child, keyed by the
//! smallest key of that child. Nodes live in an arena and are addressed by
//! position; each node also carries a creation-order id from a per-tree
//! counter, which is what the serialized form records.

mod error;
mod node;
mod serialization;

pub use error::{BTreeError, BTreeResult};
pub use node::{Entry, Node, NodeId};
pub use serialization::{deserialize_tree, serialize_tree};

use std::fmt::Write;

use crate::file::BlockId;

/// Key type (record ids are 32-bit integers)
pub type IndexKey = i32;

/// Maximum entries per node
pub const NODE_SIZE: usize = 5;

/// A node is split as soon as it reaches this many entries
pub const BRANCHING: usize = NODE_SIZE + 1;

/// Value stored in routing entries
pub const UNUSED_VALUE: BlockId = u32::MAX;

#[derive(Debug, Clone)]
pub struct BTreeIndex {
    /// Node storage
    nodes: Vec<Node>,
    root: NodeId,
    /// Levels below the root (0 when the root is a leaf)
    height: u32,
    /// Number of keys
    len: usize,
    /// Next creation-order id
    next_id: u32,
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BTreeIndex {
    /// Create an empty tree with a single empty leaf as root
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(0, Vec::new())],
            root: 0,
            height: 0,
            len: 0,
            next_id: 1,
        }
    }

    /// Assemble a tree from decoded parts
    pub(crate) fn from_parts(nodes: Vec<Node>, root: NodeId, height: u32, len: usize) -> Self {
        let next_id = nodes.iter().map(|n| n.id + 1).max().unwrap_or(0);
        Self {
            nodes,
            root,
            height,
            len,
            next_id,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root
    }

    pub(crate) fn root(&self) -> &Node {
        &self.nodes[self.root]
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    // ========== Search Operations ==========

    /// Block holding `key`, if present
    pub fn search(&self, key: IndexKey) -> Option<BlockId> {
        let mut node = self.root();
        let mut level = self.height;

        while level > 0 {
            let j = node.child_index(key)?;
            node = self.node(node.entries[j].child?);
            level -= 1;
        }

        node.find(key).map(|e| e.value)
    }

    pub fn contains(&self, key: IndexKey) -> bool {
        self.search(key).is_some()
    }

    // ========== Insert Operations ==========

    /// Insert `key -> block`, rejecting keys that are already present
    pub fn insert(&mut self, key: IndexKey, block: BlockId) -> BTreeResult<()> {
        if self.contains(key) {
            return Err(BTreeError::DuplicateKey(key));
        }

        let sibling = self.insert_into(self.root, key, block, self.height)?;
        self.len += 1;

        if let Some(sibling) = sibling {
            // Split the root - create a new root over both halves
            let old_root = self.root;
            let entries = vec![
                Entry::routing(self.min_key(old_root)?, old_root),
                Entry::routing(self.min_key(sibling)?, sibling),
            ];
            self.root = self.allocate_node(entries);
            self.height += 1;
        }

        Ok(())
    }

    /// Insert below `node_id`, returning the new right sibling if the node split
    fn insert_into(
        &mut self,
        node_id: NodeId,
        key: IndexKey,
        block: BlockId,
        level: u32,
    ) -> BTreeResult<Option<NodeId>> {
        let (position, entry) = if level == 0 {
            let position = self.nodes[node_id].leaf_position(key);
            (position, Entry::leaf(key, block))
        } else {
            let node = &self.nodes[node_id];
            let j = node.child_index(key).ok_or_else(|| {
                BTreeError::InvalidState(format!("internal node {} is empty", node.id))
            })?;
            let child = node.entries[j].child.ok_or_else(|| {
                BTreeError::InvalidState(format!("internal node {} has no child at {}", node.id, j))
            })?;

            // Routing keys stay equal to their subtree minimum
            let first = &mut self.nodes[node_id].entries[0];
            if j == 0 && key < first.key {
                first.key = key;
            }

            match self.insert_into(child, key, block, level - 1)? {
                None => return Ok(None),
                Some(sibling) => (j + 1, Entry::routing(self.min_key(sibling)?, sibling)),
            }
        };

        let node = &mut self.nodes[node_id];
        node.entries.insert(position, entry);

        if node.len() < BRANCHING {
            Ok(None)
        } else {
            Ok(Some(self.split(node_id)))
        }
    }

    /// Split a full node; the new node takes the upper half
    fn split(&mut self, node_id: NodeId) -> NodeId {
        let upper = self.nodes[node_id].split_off_upper(BRANCHING.div_ceil(2));
        self.allocate_node(upper)
    }

    fn allocate_node(&mut self, entries: Vec<Entry>) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.push(Node::new(id, entries));
        self.nodes.len() - 1
    }

    fn min_key(&self, node_id: NodeId) -> BTreeResult<IndexKey> {
        let node = &self.nodes[node_id];
        node.min_key()
            .ok_or_else(|| BTreeError::InvalidState(format!("node {} is empty", node.id)))
    }

    // ========== Inspection ==========

    /// In-order iterator over `(key, block)` pairs
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            tree: self,
            stack: vec![(self.root, self.height, 0)],
        }
    }

    /// Indented dump of every node, root first
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(&mut out, self.root, self.height, 0);
        out
    }

    fn render_node(&self, out: &mut String, node_id: NodeId, level: u32, depth: usize) {
        let node = self.node(node_id);
        let indent = "  ".repeat(depth);

        if level == 0 {
            let pairs: Vec<String> = node
                .entries
                .iter()
                .map(|e| format!("{}->{}", e.key, e.value))
                .collect();
            let _ = writeln!(out, "{}Node ID: {} Leaf: [{}]", indent, node.id, pairs.join(", "));
            return;
        }

        let keys: Vec<String> = node.keys().map(|k| k.to_string()).collect();
        let _ = writeln!(out, "{}Node ID: {} Index: [{}]", indent, node.id, keys.join(", "));
        for entry in &node.entries {
            if let Some(child) = entry.child {
                self.render_node(out, child, level - 1, depth + 1);
            }
        }
    }

    /// Locate a node by its creation-order id and describe its level and entries
    pub fn describe_node(&self, id: u32) -> Option<String> {
        let (node, level) = self.find_node(self.root, id, 0)?;

        let keys: Vec<String> = node.keys().map(|k| k.to_string()).collect();
        let values: Vec<String> = node
            .entries
            .iter()
            .map(|e| match e.value {
                UNUSED_VALUE => "-".to_string(),
                value => value.to_string(),
            })
            .collect();

        Some(format!(
            "Node ID: {}, Level: {}, Keys: [{}], Values: [{}]",
            id,
            level,
            keys.join(", "),
            values.join(", ")
        ))
    }

    fn find_node(&self, node_id: NodeId, id: u32, level: u32) -> Option<(&Node, u32)> {
        let node = self.node(node_id);
        if node.id == id {
            return Some((node, level));
        }
        node.entries
            .iter()
            .filter_map(|e| e.child)
            .find_map(|child| self.find_node(child, id, level + 1))
    }
}

/// Iterator returned by [`BTreeIndex::entries`]
pub struct Entries<'a> {
    tree: &'a BTreeIndex,
    /// (node, levels below it, next entry index)
    stack: Vec<(NodeId, u32, usize)>,
}

impl Iterator for Entries<'_> {
    type Item = (IndexKey, BlockId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node_id, level, index) = self.stack.last_mut()?;
            let node = self.tree.node(*node_id);

            let Some(entry) = node.entries.get(*index).copied() else {
                self.stack.pop();
                continue;
            };
            *index += 1;

            if *level == 0 {
                return Some((entry.key, entry.value));
            }
            let child_level = *level - 1;
            if let Some(child) = entry.child {
                self.stack.push((child, child_level, 0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(keys: impl IntoIterator<Item = IndexKey>) -> BTreeIndex {
        let mut tree = BTreeIndex::new();
        for key in keys {
            tree.insert(key, key as u32 * 10).unwrap();
        }
        tree
    }

    /// Every non-root node holds at least half of BRANCHING and at most
    /// NODE_SIZE entries, which bounds the height from both sides
    fn assert_height_bounds(tree: &BTreeIndex) {
        let n = tree.len() as u64;
        let h = tree.height();
        assert!((NODE_SIZE as u64).pow(h + 1) >= n, "height {} too small for {}", h, n);
        if h > 0 {
            let min_fill = BRANCHING.div_ceil(2) as u64;
            assert!(2 * min_fill.pow(h) <= n, "height {} too large for {}", h, n);
        }
    }

    /// Keys ascend strictly in every node and each routing key equals the
    /// minimum key of its subtree
    fn assert_routing_keys(tree: &BTreeIndex) {
        fn check(tree: &BTreeIndex, id: NodeId, level: u32) -> IndexKey {
            let node = tree.node(id);
            for pair in node.entries.windows(2) {
                assert!(pair[0].key < pair[1].key, "node {} out of order", node.id);
            }
            if level > 0 {
                for entry in &node.entries {
                    let child_min = check(tree, entry.child.unwrap(), level - 1);
                    assert_eq!(entry.key, child_min, "stale routing key in node {}", node.id);
                }
            }
            node.entries[0].key
        }

        if !tree.is_empty() {
            check(tree, tree.root_id(), tree.height());
        }
    }

    #[test]
    fn test_new_tree() {
        let tree = BTreeIndex::new();

        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.search(1), None);
        assert_eq!(tree.entries().count(), 0);
    }

    #[test]
    fn test_single_insert_and_search() {
        let tree = tree_with([42]);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.search(42), Some(420));
        assert_eq!(tree.search(41), None);
    }

    #[test]
    fn test_insert_without_split() {
        let tree = tree_with([5, 1, 4, 2, 3]);

        assert_eq!(tree.height(), 0);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.root().keys().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_root_split() {
        let tree = tree_with(1..=6);

        assert_eq!(tree.height(), 1);
        assert_eq!(tree.node_count(), 3);

        // Old root keeps the lower half, the new node takes the upper half
        let root = tree.root();
        assert_eq!(root.keys().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(root.entries[0].value, UNUSED_VALUE);

        let left = tree.node(root.entries[0].child.unwrap());
        let right = tree.node(root.entries[1].child.unwrap());
        assert_eq!(left.keys().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(right.keys().collect::<Vec<_>>(), vec![4, 5, 6]);

        // Creation-order ids: first leaf 0, split sibling 1, new root 2
        assert_eq!(left.id, 0);
        assert_eq!(right.id, 1);
        assert_eq!(root.id, 2);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut tree = tree_with(1..=20);

        assert_eq!(tree.insert(7, 0), Err(BTreeError::DuplicateKey(7)));
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.search(7), Some(70));
    }

    #[test]
    fn test_key_below_minimum() {
        let mut tree = tree_with(10..40);
        tree.insert(-3, 1).unwrap();
        tree.insert(0, 2).unwrap();

        assert_eq!(tree.search(-3), Some(1));
        assert_eq!(tree.search(0), Some(2));
        assert_eq!(tree.search(10), Some(100));
        assert_eq!(tree.entries().next(), Some((-3, 1)));
        assert_routing_keys(&tree);
    }

    #[test]
    fn test_smaller_keys_lower_the_leftmost_route() {
        let mut tree = tree_with(10..=15);
        for (i, key) in [-5, -4, -3].into_iter().enumerate() {
            tree.insert(key, i as u32).unwrap();
        }

        // The leftmost leaf [-5, -4, -3, 10, 11, 12] split into two halves
        assert_eq!(tree.root().keys().collect::<Vec<_>>(), vec![-5, 10, 13]);
        assert_routing_keys(&tree);
        for key in 10..=15 {
            assert_eq!(tree.search(key), Some(key as u32 * 10));
        }
        assert_eq!(tree.search(-4), Some(1));
    }

    #[test]
    fn test_sequential_inserts() {
        let tree = tree_with(1..=1000);

        assert_eq!(tree.len(), 1000);
        for key in 1..=1000 {
            assert_eq!(tree.search(key), Some(key as u32 * 10));
        }
        assert_eq!(tree.search(0), None);
        assert_eq!(tree.search(1001), None);
        assert_height_bounds(&tree);
    }

    #[test]
    fn test_reverse_and_interleaved_inserts() {
        let reverse = tree_with((1..=300).rev());
        let interleaved = tree_with((0..300).map(|i| if i % 2 == 0 { i } else { 600 - i }));

        for tree in [&reverse, &interleaved] {
            assert_eq!(tree.len(), 300);
            let keys: Vec<IndexKey> = tree.entries().map(|(k, _)| k).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
            assert_height_bounds(tree);
            assert_routing_keys(tree);
        }
    }

    #[test]
    fn test_entries_in_order() {
        let tree = tree_with([9, 3, 7, 1, 5, 8, 2, 6, 4]);

        let entries: Vec<_> = tree.entries().collect();
        assert_eq!(
            entries,
            (1..=9).map(|k| (k, k as u32 * 10)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_render() {
        let tree = tree_with(1..=6);
        let rendered = tree.render();

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Node ID: 2 Index: [1, 4]");
        assert_eq!(lines[1], "  Node ID: 0 Leaf: [1->10, 2->20, 3->30]");
        assert_eq!(lines[2], "  Node ID: 1 Leaf: [4->40, 5->50, 6->60]");
    }

    #[test]
    fn test_describe_node() {
        let tree = tree_with(1..=6);

        assert_eq!(
            tree.describe_node(2).unwrap(),
            "Node ID: 2, Level: 0, Keys: [1, 4], Values: [-, -]"
        );
        assert_eq!(
            tree.describe_node(1).unwrap(),
            "Node ID: 1, Level: 1, Keys: [4, 5, 6], Values: [40, 50, 60]"
        );
        assert!(tree.describe_node(99).is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        proptest! {
            #[test]
            fn prop_every_inserted_key_is_found(
                keys in proptest::collection::btree_set(any::<i32>(), 0..400)
                    .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                    .prop_shuffle()
            ) {
                let mut tree = BTreeIndex::new();
                for (i, &key) in keys.iter().enumerate() {
                    tree.insert(key, i as u32).unwrap();
                }

                prop_assert_eq!(tree.len(), keys.len());
                for (i, &key) in keys.iter().enumerate() {
                    prop_assert_eq!(tree.search(key), Some(i as u32));
                }

                let expected: BTreeSet<i32> = keys.iter().copied().collect();
                let found: Vec<i32> = tree.entries().map(|(k, _)| k).collect();
                prop_assert_eq!(found, expected.into_iter().collect::<Vec<_>>());
                assert_routing_keys(&tree);
            }
        }
    }
}
