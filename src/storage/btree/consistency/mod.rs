//! Structural consistency checking for the copy-on-write tree.
//!
//! [`ConsistencyChecker::check`] walks every node reachable from a root,
//! re-reading each page until the read is not torn, and validates key order,
//! inherited key ranges, pointer pairs, generations and sibling chains.
//! [`ConsistencyChecker::check_space`] walks the levels through their sibling
//! chains and proves that every page id is either live or free exactly once.
//!
//! Structural problems are collected as [`Defect`]s and the walk carries on.
//! Only conditions that stop the traversal itself come back as errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::gspp::{PairFault, Pointer, PointerPair};
use super::layout::Layout;
use super::page::{self, NodeKind, NodeShape, PointerField};
use crate::primitives::pager::{PageCursor, Pager};
use crate::types::{Generation, PageId, Result, TreeError};

mod key_range;
mod rightmost;
mod space;

pub use key_range::KeyRange;
use rightmost::RightmostInChain;

/// Settings for one checker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckOptions {
    /// Newest generation every writer has completed.
    pub stable_generation: Generation,
    /// Generation of in-flight writers.
    pub unstable_generation: Generation,
    /// Lowest page id the space check expects to be accounted for.
    pub min_tree_node_id: PageId,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            stable_generation: Generation::MIN,
            unstable_generation: Generation::MIN.next(),
            min_tree_node_id: PageId(0),
        }
    }
}

impl CheckOptions {
    /// Options treating `stable` as the newest completed generation.
    pub fn for_stable(stable: Generation) -> Self {
        Self {
            stable_generation: stable,
            unstable_generation: stable.next(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.unstable_generation <= self.stable_generation {
            return Err(TreeError::Invalid(
                "unstable generation must be newer than stable generation",
            ));
        }
        Ok(())
    }
}

/// Category of a structural defect.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    /// A key lies outside the range inherited from the parent.
    KeyOutOfRange,
    /// Keys are not strictly increasing.
    KeyOrder,
    /// Neither slot of a pointer pair can be trusted.
    PointerState,
    /// Both slots are trustworthy yet disagree.
    AmbiguousPointer,
    /// Key count exceeds the node's capacity.
    UnexpectedKeyCount,
    /// A node is newer than the pointer that led to it.
    GenerationOrder,
    /// The heir target's generation differs from the heir pointer's.
    HeirGeneration,
    /// Sibling pointers of neighbouring nodes do not agree.
    SiblingMismatch,
    /// The last node of a level still names a right sibling.
    UnterminatedChain,
    /// An internal node's child pointer names no page.
    MissingChild,
    /// A page id was accounted for twice.
    DuplicatePageId,
    /// A page id is past the last allocated id.
    PageIdBeyondLast,
    /// A page id is below the first tree node id.
    PageIdBelowMin,
    /// Allocated page ids that are neither live nor free.
    UnusedPages,
}

impl DefectKind {
    /// Snake-case name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            DefectKind::KeyOutOfRange => "key_out_of_range",
            DefectKind::KeyOrder => "key_order",
            DefectKind::PointerState => "pointer_state",
            DefectKind::AmbiguousPointer => "ambiguous_pointer",
            DefectKind::UnexpectedKeyCount => "unexpected_key_count",
            DefectKind::GenerationOrder => "generation_order",
            DefectKind::HeirGeneration => "heir_generation",
            DefectKind::SiblingMismatch => "sibling_mismatch",
            DefectKind::UnterminatedChain => "unterminated_chain",
            DefectKind::MissingChild => "missing_child",
            DefectKind::DuplicatePageId => "duplicate_page_id",
            DefectKind::PageIdBeyondLast => "page_id_beyond_last",
            DefectKind::PageIdBelowMin => "page_id_below_min",
            DefectKind::UnusedPages => "unused_pages",
        }
    }
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structural problem found by a check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Defect {
    /// Category.
    pub kind: DefectKind,
    /// Page the defect was found on, when it belongs to one.
    pub page: Option<PageId>,
    /// Tree level, root being zero, when known.
    pub level: Option<usize>,
    /// Human-readable description.
    pub message: String,
}

impl Defect {
    fn on_page(kind: DefectKind, page: PageId, level: usize, message: String) -> Self {
        Self {
            kind,
            page: Some(page),
            level: Some(level),
            message,
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(page) = self.page {
            write!(f, " page {page}")?;
        }
        if let Some(level) = self.level {
            write!(f, " level {level}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Counters gathered across checks run by one checker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    /// Nodes visited per level, root first.
    pub nodes_per_level: Vec<u64>,
    /// Leaf nodes visited.
    pub leaves: u64,
    /// Internal nodes visited.
    pub internal_nodes: u64,
    /// Heir pointers followed.
    pub heirs_followed: u64,
    /// Torn reads that had to be replayed.
    pub retries: u64,
    /// Tree pages marked by the space check.
    pub live_pages: u64,
    /// Free-list ids consumed by the space check.
    pub free_ids: u64,
}

/// Everything a read block needs besides the cursor.
struct FieldReader<'r, L: Layout> {
    layout: &'r L,
    shape: &'r NodeShape,
    stable: Generation,
    unstable: Generation,
}

struct NodeRead {
    tree_node: bool,
    kind: Option<NodeKind>,
    key_count: usize,
    generation: Generation,
    left: Pointer,
    right: Pointer,
    heir: Pointer,
    descend: bool,
}

impl<'r, L: Layout> FieldReader<'r, L> {
    fn new(layout: &'r L, shape: &'r NodeShape, options: &CheckOptions) -> Self {
        Self {
            layout,
            shape,
            stable: options.stable_generation,
            unstable: options.unstable_generation,
        }
    }

    fn pointer(
        &self,
        c: &mut PageCursor<'_>,
        field: PointerField,
        kind: Option<NodeKind>,
        level: usize,
        pending: &mut Vec<Defect>,
    ) -> Pointer {
        let pair = PointerPair::read(c, field.offset(self.shape));
        let page = c.current_page_id();
        let kind_name = kind.map_or("unknown", NodeKind::name);
        if !pair.has_ok_slot(self.stable, self.unstable) {
            pending.push(Defect::on_page(
                DefectKind::PointerState,
                page,
                level,
                format!(
                    "GSPP state found that was not ok in {field} field in {kind_name} node with id {page}: {}",
                    pair.describe(self.stable, self.unstable)
                ),
            ));
            return Pointer::Corrupt(PairFault::NoValidSlot);
        }
        let resolved = pair.resolve(self.stable, self.unstable);
        if let Pointer::Corrupt(fault) = resolved {
            pending.push(Defect::on_page(
                DefectKind::AmbiguousPointer,
                page,
                level,
                format!(
                    "GSPP slots disagree ({fault:?}) in {field} field in {kind_name} node with id {page}: {}",
                    pair.describe(self.stable, self.unstable)
                ),
            ));
        }
        resolved
    }

    fn key(&self, c: &mut PageCursor<'_>, pos: usize) -> L::Key {
        let mut buf = vec![0u8; self.shape.key_size()];
        c.get_bytes(self.shape.key_offset(pos), &mut buf);
        self.layout.read_key(&buf)
    }

    fn node(
        &self,
        c: &mut PageCursor<'_>,
        range: &KeyRange<'_, L>,
        level: usize,
        pending: &mut Vec<Defect>,
    ) -> NodeRead {
        let mut read = NodeRead {
            tree_node: page::is_tree_node(c),
            kind: page::kind(c),
            key_count: page::key_count(c),
            generation: page::generation(c),
            left: Pointer::NoNode,
            right: Pointer::NoNode,
            heir: Pointer::NoNode,
            descend: false,
        };
        let Some(kind) = read.kind.filter(|_| read.tree_node) else {
            return read;
        };
        read.left = self.pointer(c, PointerField::LeftSibling, Some(kind), level, pending);
        read.right = self.pointer(c, PointerField::RightSibling, Some(kind), level, pending);
        read.heir = self.pointer(c, PointerField::Heir, Some(kind), level, pending);

        let max = self.shape.max_keys(kind);
        if read.key_count > max {
            let page = c.current_page_id();
            pending.push(Defect::on_page(
                DefectKind::UnexpectedKeyCount,
                page,
                level,
                format!(
                    "Unexpected keyCount:{} in {} node {page}, capacity {max}",
                    read.key_count,
                    kind.name()
                ),
            ));
            return read;
        }
        self.key_order(c, range, read.key_count, level, pending);
        read.descend = true;
        read
    }

    fn key_order(
        &self,
        c: &mut PageCursor<'_>,
        range: &KeyRange<'_, L>,
        key_count: usize,
        level: usize,
        pending: &mut Vec<Defect>,
    ) {
        let page = c.current_page_id();
        let mut prev: Option<L::Key> = None;
        for pos in 0..key_count {
            let key = self.key(c, pos);
            if !range.in_range(&key) {
                pending.push(Defect::on_page(
                    DefectKind::KeyOutOfRange,
                    page,
                    level,
                    format!(
                        "Expected range for this node is\n{range}\nbut found {} in position {pos}, with key count {key_count}",
                        self.layout.render(&key)
                    ),
                ));
            }
            if let Some(prev) = &prev {
                if self.layout.compare(prev, &key) != std::cmp::Ordering::Less {
                    pending.push(Defect::on_page(
                        DefectKind::KeyOrder,
                        page,
                        level,
                        format!(
                            "non-unique/misordered key {} at position {pos} after {}",
                            self.layout.render(&key),
                            self.layout.render(prev)
                        ),
                    ));
                }
            }
            prev = Some(key);
        }
    }
}

/// Walks a tree over a [`Pager`] and accumulates [`Defect`]s.
///
/// One checker can run several checks; defects and stats accumulate across
/// them and each entry point reports whether it added any defect.
pub struct ConsistencyChecker<'p, L: Layout> {
    cursor: PageCursor<'p>,
    layout: &'p L,
    shape: NodeShape,
    options: CheckOptions,
    rightmost: Vec<RightmostInChain>,
    defects: Vec<Defect>,
    stats: CheckStats,
}

impl<'p, L: Layout> ConsistencyChecker<'p, L> {
    /// Creates a checker for trees written with `layout`.
    pub fn new(pager: &'p Pager, layout: &'p L, options: CheckOptions) -> Result<Self> {
        options.validate()?;
        let shape = NodeShape::new(pager.page_size(), layout.key_size(), layout.value_size())?;
        Ok(Self {
            cursor: pager.cursor(),
            layout,
            shape,
            options,
            rightmost: Vec::new(),
            defects: Vec::new(),
            stats: CheckStats::default(),
        })
    }

    /// Options the checker runs with.
    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Defects recorded so far.
    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    /// Removes and returns the recorded defects.
    pub fn take_defects(&mut self) -> Vec<Defect> {
        std::mem::take(&mut self.defects)
    }

    /// Counters gathered so far.
    pub fn stats(&self) -> &CheckStats {
        &self.stats
    }

    fn record(&mut self, defect: Defect) {
        warn!(
            kind = defect.kind.as_str(),
            page = ?defect.page,
            level = ?defect.level,
            "{}",
            defect.message
        );
        self.defects.push(defect);
    }

    fn record_all(&mut self, defects: Vec<Defect>) {
        for defect in defects {
            self.record(defect);
        }
    }

    /// Checks the tree rooted at `root`, whose pointer promised `expected`.
    ///
    /// Returns `Ok(true)` when this call recorded no defect. Errors mean the
    /// walk could not finish.
    pub fn check(&mut self, root: PageId, expected: Generation) -> Result<bool> {
        let before = self.defects.len();
        info!(root = root.0, expected = expected.0, "consistency check started");
        self.cursor.go_to(root, "root")?;
        self.rightmost.clear();
        let range = KeyRange::open(self.layout);
        self.check_subtree(&range, expected, 0)?;

        let mut unterminated = Vec::new();
        for (level, tracker) in self.rightmost.iter().enumerate() {
            tracker.assert_last(level, &mut unterminated);
        }
        self.record_all(unterminated);
        self.stats.retries = self.cursor.retries();

        let found = self.defects.len() - before;
        info!(
            root = root.0,
            levels = self.rightmost.len(),
            defects = found,
            "consistency check finished"
        );
        Ok(found == 0)
    }

    fn check_subtree(
        &mut self,
        range: &KeyRange<'_, L>,
        expected: Generation,
        level: usize,
    ) -> Result<()> {
        let page = self.cursor.current_page_id();
        let mut pending = Vec::new();
        let reader = FieldReader::new(self.layout, &self.shape, &self.options);
        let node = self.cursor.consistent_read(|c| {
            pending.clear();
            reader.node(c, range, level, &mut pending)
        })?;
        let kind = match (node.tree_node, node.kind) {
            (true, Some(kind)) => kind,
            _ => {
                return Err(TreeError::NotATreeNode {
                    page,
                    level,
                    range: range.to_string(),
                })
            }
        };
        self.record_all(pending);
        debug!(
            page = page.0,
            level,
            kind = kind.name(),
            keys = node.key_count,
            generation = node.generation.0,
            "node visited"
        );

        if self.stats.nodes_per_level.len() <= level {
            self.stats.nodes_per_level.resize(level + 1, 0);
        }
        self.stats.nodes_per_level[level] += 1;
        match kind {
            NodeKind::Leaf => self.stats.leaves += 1,
            NodeKind::Internal => self.stats.internal_nodes += 1,
        }

        if node.generation > expected {
            self.record(Defect::on_page(
                DefectKind::GenerationOrder,
                page,
                level,
                format!(
                    "Expected node:{page} gen:{} to be ≤ pointer gen:{expected}",
                    node.generation
                ),
            ));
        }
        self.assert_siblings(page, node.generation, &node.left, &node.right, level);
        if let Pointer::Node { page: heir, generation } = node.heir {
            self.follow_heir(page, heir, generation, level)?;
        }
        if kind == NodeKind::Internal && node.descend {
            self.check_children(page, range, node.key_count, level)?;
        }
        Ok(())
    }

    fn assert_siblings(
        &mut self,
        page: PageId,
        generation: Generation,
        left: &Pointer,
        right: &Pointer,
        level: usize,
    ) {
        if self.rightmost.len() <= level {
            self.rightmost.resize_with(level + 1, RightmostInChain::default);
        }
        let mut found = Vec::new();
        self.rightmost[level].assert_next(page, generation, left, right, level, &mut found);
        self.record_all(found);
    }

    fn follow_heir(
        &mut self,
        origin: PageId,
        heir: PageId,
        promised: Generation,
        level: usize,
    ) -> Result<()> {
        warn!(
            page = origin.0,
            heir = heir.0,
            "landed on an old generation node that has an heir"
        );
        self.stats.heirs_followed += 1;
        self.cursor.go_to(heir, "heir")?;
        let observed = self.cursor.consistent_read(page::generation);
        let back = self.cursor.go_to(origin, "back");
        let observed = observed?;
        back?;
        if observed != promised {
            self.record(Defect::on_page(
                DefectKind::HeirGeneration,
                origin,
                level,
                format!(
                    "heir {heir} has generation {observed} but the heir pointer promised {promised}"
                ),
            ));
        }
        Ok(())
    }

    fn check_children(
        &mut self,
        parent: PageId,
        range: &KeyRange<'_, L>,
        key_count: usize,
        level: usize,
    ) -> Result<()> {
        let mut prev: Option<L::Key> = None;
        for pos in 0..=key_count {
            let mut pending = Vec::new();
            let reader = FieldReader::new(self.layout, &self.shape, &self.options);
            let (child, separator) = self.cursor.consistent_read(|c| {
                pending.clear();
                let child = reader.pointer(
                    c,
                    PointerField::Child(pos),
                    Some(NodeKind::Internal),
                    level,
                    &mut pending,
                );
                let separator = (pos < key_count).then(|| reader.key(c, pos));
                (child, separator)
            })?;
            self.record_all(pending);
            {
                let lower = prev.as_ref().map(|p| range.restrict_left(p));
                let base = lower.as_ref().unwrap_or(range);
                let upper = separator.as_ref().map(|s| base.restrict_right(s));
                let child_range = upper.as_ref().unwrap_or(base);
                match child {
                    Pointer::Node { page, generation } => {
                        self.cursor.go_to(page, "child")?;
                        self.check_subtree(child_range, generation, level + 1)?;
                        self.ensure_on(page)?;
                        self.cursor.go_to(parent, "parent")?;
                    }
                    Pointer::NoNode => self.record(Defect::on_page(
                        DefectKind::MissingChild,
                        parent,
                        level,
                        format!("child at position {pos} of internal node {parent} is empty"),
                    )),
                    Pointer::Corrupt(_) => {}
                }
            }
            prev = separator;
        }
        Ok(())
    }

    /// A finished subtree walk must leave the cursor on the node it entered.
    fn ensure_on(&self, expected: PageId) -> Result<()> {
        let actual = self.cursor.current_page_id();
        if actual != expected {
            return Err(TreeError::CursorMisnavigation { expected, actual });
        }
        Ok(())
    }

    /// Fails unless the cursor sits on a leaf or internal node.
    fn assert_on_tree_node(&mut self, level: usize) -> Result<NodeKind> {
        let page = self.cursor.current_page_id();
        let (tree_node, kind) = self
            .cursor
            .consistent_read(|c| (page::is_tree_node(c), page::kind(c)))?;
        match (tree_node, kind) {
            (true, Some(kind)) => Ok(kind),
            _ => Err(TreeError::NotATreeNode {
                page,
                level,
                range: KeyRange::open(self.layout).to_string(),
            }),
        }
    }
}
