//! Low-level primitives for the paged store.
//!
//! Includes byte encoders and the in-memory paging layer with its
//! optimistic read cursor.

/// Byte-level encoders.
pub mod bytes;

/// Paging subsystem: seqlock frames, read cursors and page images.
pub mod pager;
