#![forbid(unsafe_code)]

//! Copy-on-write B+ tree pages and the structural checker that validates them.

/// Bulk loader used to lay out trees for checking and tooling.
pub mod builder;
/// Structural consistency and page-space checks.
pub mod consistency;
/// Generation-safe pointer pairs.
pub mod gspp;
/// Key and value encodings.
pub mod layout;
/// Node page format.
pub mod page;

pub use builder::{BuiltTree, TreeBuilder};
pub use consistency::{CheckOptions, CheckStats, ConsistencyChecker, Defect, DefectKind, KeyRange};
pub use gspp::{Pointer, PointerPair, Slot, SlotState};
pub use layout::{BytesLayout, Layout, U64Layout};
pub use page::{NodeKind, NodeShape, PointerField};
