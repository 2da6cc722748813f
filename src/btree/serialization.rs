//! Serialization and deserialization of the tree index
//!
//! Layout (big-endian):
//! - key count (4 bytes), height (4 bytes)
//! - nodes in pre-order: id (4), entry count (4), then per entry key (4) and
//!   value (4), each internal entry followed directly by its child subtree

use super::error::{BTreeError, BTreeResult};
use super::node::{Entry, Node, NodeId};
use super::{BTreeIndex, IndexKey, NODE_SIZE};

/// Size of the key count + height header
pub const HEADER_SIZE: usize = 8;

/// Bytes per serialized entry (key + value)
const ENTRY_SIZE: usize = 8;

/// Deepest tree accepted when decoding
const MAX_HEIGHT: u32 = 32;

/// Serialize a tree into its binary form
pub fn serialize_tree(tree: &BTreeIndex) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        HEADER_SIZE + tree.node_count() * 8 + (tree.len() + tree.node_count()) * ENTRY_SIZE,
    );

    buf.extend_from_slice(&(tree.len() as u32).to_be_bytes());
    buf.extend_from_slice(&tree.height().to_be_bytes());
    write_node(tree, &mut buf, tree.root_id(), tree.height());

    buf
}

fn write_node(tree: &BTreeIndex, buf: &mut Vec<u8>, node_id: NodeId, level: u32) {
    let node = tree.node(node_id);

    buf.extend_from_slice(&node.id.to_be_bytes());
    buf.extend_from_slice(&(node.len() as u32).to_be_bytes());

    for entry in &node.entries {
        buf.extend_from_slice(&entry.key.to_be_bytes());
        buf.extend_from_slice(&entry.value.to_be_bytes());
        if level > 0
            && let Some(child) = entry.child
        {
            write_node(tree, buf, child, level - 1);
        }
    }
}

/// Rebuild a tree from its binary form, keeping the stored node ids
pub fn deserialize_tree(bytes: &[u8]) -> BTreeResult<BTreeIndex> {
    let mut reader = Reader::new(bytes);

    let len = reader.read_u32()? as usize;
    let height = reader.read_u32()?;
    if height > MAX_HEIGHT {
        return Err(BTreeError::Corrupt(format!(
            "height {} exceeds maximum {}",
            height, MAX_HEIGHT
        )));
    }

    let mut nodes = Vec::new();
    let mut leaf_keys = 0;
    let root = read_node(&mut reader, &mut nodes, height, true, &mut leaf_keys)?;

    if reader.remaining() > 0 {
        return Err(BTreeError::Corrupt(format!(
            "{} trailing bytes after the last node",
            reader.remaining()
        )));
    }
    if leaf_keys != len {
        return Err(BTreeError::Corrupt(format!(
            "header records {} keys but the leaves hold {}",
            len, leaf_keys
        )));
    }

    Ok(BTreeIndex::from_parts(nodes, root, height, len))
}

fn read_node(
    reader: &mut Reader<'_>,
    nodes: &mut Vec<Node>,
    level: u32,
    is_root: bool,
    leaf_keys: &mut usize,
) -> BTreeResult<NodeId> {
    let id = reader.read_u32()?;
    let count = reader.read_u32()? as usize;

    if count > NODE_SIZE {
        return Err(BTreeError::Corrupt(format!(
            "node {} has {} entries (max {})",
            id, count, NODE_SIZE
        )));
    }
    // Only an empty tree has an empty node
    if count == 0 && !(is_root && level == 0) {
        return Err(BTreeError::Corrupt(format!("node {} is empty", id)));
    }

    // Reserve the slot first so the arena is in pre-order
    let index = nodes.len();
    nodes.push(Node::new(id, Vec::new()));

    let mut entries: Vec<Entry> = Vec::with_capacity(count);
    for _ in 0..count {
        let key = reader.read_i32()?;
        let value = reader.read_u32()?;
        let child = if level > 0 {
            Some(read_node(reader, nodes, level - 1, false, leaf_keys)?)
        } else {
            None
        };

        if let Some(previous) = entries.last()
            && previous.key >= key
        {
            return Err(BTreeError::Corrupt(format!(
                "node {} keys out of order ({} then {})",
                id, previous.key, key
            )));
        }
        entries.push(Entry { key, value, child });
    }

    if level == 0 {
        *leaf_keys += count;
    }
    nodes[index].entries = entries;

    Ok(index)
}

/// Bounds-checked big-endian cursor
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> BTreeResult<[u8; N]> {
        let slice = self.buf.get(self.pos..self.pos + N).ok_or_else(|| {
            BTreeError::Corrupt(format!(
                "truncated: needed {} bytes at offset {} of {}",
                N,
                self.pos,
                self.buf.len()
            ))
        })?;

        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        self.pos += N;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> BTreeResult<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn read_i32(&mut self) -> BTreeResult<IndexKey> {
        Ok(i32::from_be_bytes(self.take()?))
    }
}
