use crate::file::BlockId;

use super::{IndexKey, UNUSED_VALUE};

/// Node identifier (index into node storage)
pub type NodeId = usize;

/// One slot of a node
///
/// In a leaf `value` is the data block holding the record and `child` is
/// `None`. In an internal node `value` is unused and `child` points to the
/// subtree whose smallest key is `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub key: IndexKey,
    pub value: BlockId,
    pub child: Option<NodeId>,
}

impl Entry {
    pub fn leaf(key: IndexKey, value: BlockId) -> Self {
        Self {
            key,
            value,
            child: None,
        }
    }

    pub fn routing(key: IndexKey, child: NodeId) -> Self {
        Self {
            key,
            value: UNUSED_VALUE,
            child: Some(child),
        }
    }
}

/// Tree node: entries sorted by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Creation-order id, unique within one tree
    pub id: u32,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn new(id: u32, entries: Vec<Entry>) -> Self {
        Self { id, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_key(&self) -> Option<IndexKey> {
        self.entries.first().map(|e| e.key)
    }

    pub fn keys(&self) -> impl Iterator<Item = IndexKey> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    /// Routing slot for `key` in an internal node: the last entry, or the
    /// first one whose successor has a larger key
    pub fn child_index(&self, key: IndexKey) -> Option<usize> {
        let len = self.entries.len();
        (0..len).find(|&j| j + 1 == len || key < self.entries[j + 1].key)
    }

    /// Insert position for `key` in a leaf: before the first larger key
    pub fn leaf_position(&self, key: IndexKey) -> usize {
        self.entries
            .iter()
            .position(|e| key < e.key)
            .unwrap_or(self.entries.len())
    }

    /// Exact match lookup in a leaf
    pub fn find(&self, key: IndexKey) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Move the upper `count` entries out of this node
    pub fn split_off_upper(&mut self, count: usize) -> Vec<Entry> {
        let at = self.entries.len().saturating_sub(count);
        self.entries.split_off(at)
    }
}
