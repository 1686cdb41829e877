use std::cmp::Ordering;
use std::fmt::Debug;

use smallvec::SmallVec;

use crate::primitives::bytes::ord;
use crate::primitives::pager::{KeyFormat, KeyFormatKind};
use crate::types::{Result, TreeError};

/// Fixed-width key encoding used by a tree.
///
/// Keys are decoded from and encoded into exactly [`Layout::key_size`] bytes.
pub trait Layout {
    /// Decoded key.
    type Key: Clone + Debug;

    /// Bytes per encoded key.
    fn key_size(&self) -> usize;

    /// Bytes per leaf value.
    fn value_size(&self) -> usize;

    /// Decodes a key from `src[..key_size]`.
    fn read_key(&self, src: &[u8]) -> Self::Key;

    /// Encodes `key` into `dst[..key_size]`.
    fn write_key(&self, key: &Self::Key, dst: &mut [u8]);

    /// Total order over keys.
    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;

    /// Human-readable rendering for messages.
    fn render(&self, key: &Self::Key) -> String;

    /// Descriptor stored in page images.
    fn key_format(&self) -> KeyFormat;
}

/// Unsigned 64-bit keys stored big-endian.
#[derive(Clone, Copy, Debug)]
pub struct U64Layout {
    value_size: usize,
}

impl U64Layout {
    /// Layout with `value_size` byte values.
    pub fn new(value_size: usize) -> Self {
        Self { value_size }
    }
}

impl Default for U64Layout {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Layout for U64Layout {
    type Key = u64;

    fn key_size(&self) -> usize {
        8
    }

    fn value_size(&self) -> usize {
        self.value_size
    }

    fn read_key(&self, src: &[u8]) -> u64 {
        ord::get_u64_be(src)
    }

    fn write_key(&self, key: &u64, dst: &mut [u8]) {
        ord::put_u64_be(dst, *key);
    }

    fn compare(&self, a: &u64, b: &u64) -> Ordering {
        a.cmp(b)
    }

    fn render(&self, key: &u64) -> String {
        key.to_string()
    }

    fn key_format(&self) -> KeyFormat {
        KeyFormat {
            kind: KeyFormatKind::U64,
            key_size: 8,
            value_size: self.value_size as u32,
        }
    }
}

/// Fixed-width byte-string keys in lexicographic order.
#[derive(Clone, Copy, Debug)]
pub struct BytesLayout {
    key_size: usize,
    value_size: usize,
}

impl BytesLayout {
    /// Layout with `key_size` byte keys and `value_size` byte values.
    pub fn new(key_size: usize, value_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(TreeError::Invalid("byte keys need a non-zero width"));
        }
        Ok(Self {
            key_size,
            value_size,
        })
    }
}

impl Layout for BytesLayout {
    type Key = SmallVec<[u8; 16]>;

    fn key_size(&self) -> usize {
        self.key_size
    }

    fn value_size(&self) -> usize {
        self.value_size
    }

    fn read_key(&self, src: &[u8]) -> Self::Key {
        SmallVec::from_slice(&src[..self.key_size])
    }

    fn write_key(&self, key: &Self::Key, dst: &mut [u8]) {
        let width = self.key_size.min(key.len());
        dst[..width].copy_from_slice(&key[..width]);
        dst[width..self.key_size].fill(0);
    }

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering {
        a.as_slice().cmp(b.as_slice())
    }

    fn render(&self, key: &Self::Key) -> String {
        format!("0x{}", hex::encode(key))
    }

    fn key_format(&self) -> KeyFormat {
        KeyFormat {
            kind: KeyFormatKind::Bytes,
            key_size: self.key_size as u32,
            value_size: self.value_size as u32,
        }
    }
}
