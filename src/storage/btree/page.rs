use std::fmt;

use crate::primitives::pager::{PageCursor, PageWrite};
use crate::types::page::{PageKind, PAGE_KIND_OFFSET};
use crate::types::{Generation, Result, TreeError};

use super::gspp::GSPP_SIZE;

const KIND_OFFSET: usize = 1;
const KEY_COUNT_OFFSET: usize = 4;
const GENERATION_OFFSET: usize = 8;
/// Right sibling pointer pair.
pub const RIGHT_SIBLING_OFFSET: usize = 16;
/// Left sibling pointer pair.
pub const LEFT_SIBLING_OFFSET: usize = RIGHT_SIBLING_OFFSET + GSPP_SIZE;
/// Heir pointer pair.
pub const HEIR_OFFSET: usize = LEFT_SIBLING_OFFSET + GSPP_SIZE;
/// Bytes before the first key.
pub const HEADER_LEN: usize = HEIR_OFFSET + GSPP_SIZE;

/// Logical kind for a tree node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// Keys and values.
    Leaf = 1,
    /// Separator keys and child pointers.
    Internal = 2,
}

impl NodeKind {
    /// Decodes the kind byte; `None` for anything else.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Leaf),
            2 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Lower-case name used in messages.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Leaf => "leaf",
            NodeKind::Internal => "internal",
        }
    }
}

/// A named pointer field inside a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PointerField {
    /// Previous node on the same level.
    LeftSibling,
    /// Next node on the same level.
    RightSibling,
    /// Page that superseded this one.
    Heir,
    /// Child pointer at a position.
    Child(usize),
}

impl PointerField {
    /// Byte offset of the field for nodes of `shape`.
    pub fn offset(self, shape: &NodeShape) -> usize {
        match self {
            PointerField::LeftSibling => LEFT_SIBLING_OFFSET,
            PointerField::RightSibling => RIGHT_SIBLING_OFFSET,
            PointerField::Heir => HEIR_OFFSET,
            PointerField::Child(pos) => shape.child_offset(pos),
        }
    }
}

impl fmt::Display for PointerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerField::LeftSibling => f.write_str("LeftSibling"),
            PointerField::RightSibling => f.write_str("RightSibling"),
            PointerField::Heir => f.write_str("Heir"),
            PointerField::Child(pos) => write!(f, "Child[{pos}]"),
        }
    }
}

/// Slot geometry shared by every node of one tree.
///
/// Leaves store `leaf_max_keys` keys followed by as many values. Internal
/// nodes store `internal_max_keys` keys followed by one more child pointer
/// pair than keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeShape {
    key_size: usize,
    value_size: usize,
    leaf_max_keys: usize,
    internal_max_keys: usize,
}

impl NodeShape {
    /// Computes the geometry for `page_size` byte pages.
    pub fn new(page_size: usize, key_size: usize, value_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(TreeError::Invalid("key size must be non-zero"));
        }
        let body = page_size
            .checked_sub(HEADER_LEN)
            .ok_or(TreeError::Invalid("page too small for node header"))?;
        let leaf_max_keys = body / (key_size + value_size);
        let internal_max_keys = body.saturating_sub(GSPP_SIZE) / (key_size + GSPP_SIZE);
        if leaf_max_keys < 1 || internal_max_keys < 1 {
            return Err(TreeError::Invalid("page too small for key and value sizes"));
        }
        Ok(Self {
            key_size,
            value_size,
            leaf_max_keys,
            internal_max_keys,
        })
    }

    /// Bytes per key.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Bytes per leaf value.
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Most keys a leaf can hold.
    pub fn leaf_max_keys(&self) -> usize {
        self.leaf_max_keys
    }

    /// Most separators an internal node can hold.
    pub fn internal_max_keys(&self) -> usize {
        self.internal_max_keys
    }

    /// Key capacity for `kind`.
    pub fn max_keys(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => self.leaf_max_keys,
            NodeKind::Internal => self.internal_max_keys,
        }
    }

    /// Offset of key `pos`.
    pub fn key_offset(&self, pos: usize) -> usize {
        HEADER_LEN + pos * self.key_size
    }

    /// Offset of leaf value `pos`.
    pub fn value_offset(&self, pos: usize) -> usize {
        HEADER_LEN + self.leaf_max_keys * self.key_size + pos * self.value_size
    }

    /// Offset of child pointer `pos`.
    pub fn child_offset(&self, pos: usize) -> usize {
        HEADER_LEN + self.internal_max_keys * self.key_size + pos * GSPP_SIZE
    }
}

/// Page type tag; [`PageKind::TreeNode`] for tree nodes.
pub fn node_type(cursor: &mut PageCursor<'_>) -> u8 {
    cursor.get_u8(PAGE_KIND_OFFSET)
}

/// True when the page carries the tree node tag.
pub fn is_tree_node(cursor: &mut PageCursor<'_>) -> bool {
    node_type(cursor) == PageKind::TreeNode.as_u8()
}

/// Leaf or internal, if the kind byte is recognised.
pub fn kind(cursor: &mut PageCursor<'_>) -> Option<NodeKind> {
    NodeKind::from_u8(cursor.get_u8(KIND_OFFSET))
}

/// Number of keys stored.
pub fn key_count(cursor: &mut PageCursor<'_>) -> usize {
    cursor.get_u32(KEY_COUNT_OFFSET) as usize
}

/// Generation the node was written at.
pub fn generation(cursor: &mut PageCursor<'_>) -> Generation {
    Generation(cursor.get_u64(GENERATION_OFFSET))
}

/// Clears the page and writes an empty node header.
pub fn init_node(page: &mut PageWrite, kind: NodeKind, generation: Generation) -> Result<()> {
    page.clear()?;
    page.put_u8(PAGE_KIND_OFFSET, PageKind::TreeNode.as_u8())?;
    page.put_u8(KIND_OFFSET, kind as u8)?;
    page.put_u32(KEY_COUNT_OFFSET, 0)?;
    page.put_u64(GENERATION_OFFSET, generation.0)
}

/// Overwrites the raw kind byte.
pub fn set_kind_byte(page: &mut PageWrite, value: u8) -> Result<()> {
    page.put_u8(KIND_OFFSET, value)
}

/// Overwrites the key count.
pub fn set_key_count(page: &mut PageWrite, count: usize) -> Result<()> {
    let count = u32::try_from(count).map_err(|_| TreeError::Invalid("key count exceeds u32"))?;
    page.put_u32(KEY_COUNT_OFFSET, count)
}

/// Overwrites the node generation.
pub fn set_generation(page: &mut PageWrite, generation: Generation) -> Result<()> {
    page.put_u64(GENERATION_OFFSET, generation.0)
}

/// Writes encoded key bytes at position `pos`.
pub fn put_key(page: &mut PageWrite, shape: &NodeShape, pos: usize, key: &[u8]) -> Result<()> {
    if key.len() != shape.key_size {
        return Err(TreeError::Invalid("encoded key has the wrong width"));
    }
    page.put_bytes(shape.key_offset(pos), key)
}

/// Writes leaf value bytes at position `pos`.
pub fn put_value(page: &mut PageWrite, shape: &NodeShape, pos: usize, value: &[u8]) -> Result<()> {
    if value.len() != shape.value_size {
        return Err(TreeError::Invalid("value has the wrong width"));
    }
    page.put_bytes(shape.value_offset(pos), value)
}
