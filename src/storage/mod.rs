//! Tree storage: node pages, pointer pairs, the free list and the checker.

/// B+ tree pages and structural checks.
pub mod btree;

/// Chain of pages recording released page ids.
pub mod freelist;

pub use btree::{CheckOptions, ConsistencyChecker, Defect, DefectKind};
pub use freelist::FreeList;
