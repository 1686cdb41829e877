#![forbid(unsafe_code)]

//! Identifiers, generations and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Page checksums and the GSPP slot checksum.
pub mod checksum;

pub use checksum::{page_crc32, pointer_checksum};

/// Identifier of a page in the store.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PageId(pub u64);

/// Version stamp assigned to a page when it is written.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// Lowest generation a written slot may carry; zero is reserved for empty slots.
    pub const MIN: Generation = Generation(1);
    /// Highest generation representable in a pointer slot.
    pub const MAX: Generation = Generation(u32::MAX as u64);

    /// Returns the following generation.
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

/// Errors that stop a traversal or a storage operation outright.
///
/// Structural defects found by the consistency checker are not errors; they are
/// collected as [`crate::storage::btree::consistency::Defect`] values and the
/// check keeps going.
#[derive(thiserror::Error, Debug)]
pub enum TreeError {
    /// Underlying I/O failure while loading or saving a page image.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persistent data does not decode.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller passed an argument the store cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A cursor read or write went past the end of the page.
    #[error("cursor out of bounds on page {page} at offset {offset}")]
    CursorOutOfBounds {
        /// Page the cursor was pinned to.
        page: PageId,
        /// First offending byte offset.
        offset: usize,
    },
    /// The cursor landed on a page that is not a tree node of any kind.
    #[error("page {page} at level {level} isn't a tree node, parent expected range {range}")]
    NotATreeNode {
        /// Offending page.
        page: PageId,
        /// Depth the page was reached at.
        level: usize,
        /// Rendered key range inherited from the parent.
        range: String,
    },
    /// A page id outside the allocated store was dereferenced.
    #[error("page {page} is outside the store (last page {last})")]
    PageOutOfRange {
        /// Requested page.
        page: PageId,
        /// Highest page currently allocated.
        last: PageId,
    },
    /// The cursor is not where the traversal left it.
    #[error("cursor on page {actual} after walking the subtree of {expected}")]
    CursorMisnavigation {
        /// Page the traversal expected to be on.
        expected: PageId,
        /// Page the cursor reports.
        actual: PageId,
    },
    /// The page id space cannot be represented in the seen-page bitmap.
    #[error("page id space up to {last_id} exceeds the accountable range")]
    IdSpaceTooLarge {
        /// Highest allocated id the caller asked to account for.
        last_id: u64,
    },
}

/// Result alias for fallible storage and traversal operations.
pub type Result<T> = std::result::Result<T, TreeError>;

pub mod page {
    //! Page type tags shared by the tree and the free list.

    use core::convert::TryFrom;

    use super::{Result, TreeError};

    /// Byte offset of the page type tag; every page starts with it.
    pub const PAGE_KIND_OFFSET: usize = 0;

    /// What a page holds, decided by its first byte.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        /// A B+tree node, leaf or internal.
        TreeNode = 1,
        /// A free-list page holding released page ids.
        FreeList = 2,
    }

    impl PageKind {
        /// Raw tag value.
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = TreeError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::TreeNode),
                2 => Ok(PageKind::FreeList),
                _ => Err(TreeError::Corruption("unknown page kind")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_bounds() {
        assert!(Generation::MIN > Generation(0));
        assert_eq!(Generation(4).next(), Generation(5));
        assert_eq!(Generation::MAX.0, 0xFFFF_FFFF);
    }

    #[test]
    fn fatal_errors_render_context() {
        let err = TreeError::NotATreeNode {
            page: PageId(9),
            level: 2,
            range: "None ≤ key < 40".into(),
        };
        let text = err.to_string();
        assert!(text.contains("page 9"));
        assert!(text.contains("level 2"));
        assert!(text.contains("None ≤ key < 40"));
    }
}
