//! Structural consistency checking for a copy-on-write B+ tree.
//!
//! Tree nodes live in fixed-size pages and reference each other through
//! generation-safe pointer pairs. The checker walks a tree while writers may
//! be active, validating key order and ranges, pointer state, generations and
//! sibling chains, and proves that every allocated page is either live or on
//! the free list.

#![warn(missing_docs)]

pub mod admin;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;
