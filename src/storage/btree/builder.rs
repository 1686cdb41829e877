use std::collections::VecDeque;

use tracing::debug;

use super::gspp::write_pointer;
use super::layout::Layout;
use super::page::{self, NodeKind, NodeShape, PointerField};
use crate::primitives::pager::Pager;
use crate::types::{Generation, PageId, Result, TreeError};

/// Bulk loader producing a balanced tree with complete sibling chains.
///
/// Every node and pointer is stamped with one generation. Pointers are
/// written the way an in-flight writer of that generation writes them, so
/// they read back as stable once checks run with that generation as the
/// stable boundary.
pub struct TreeBuilder<'a, L: Layout> {
    pager: &'a Pager,
    layout: &'a L,
    shape: NodeShape,
    generation: Generation,
    leaf_fill: usize,
    internal_fill: usize,
    reserved: VecDeque<PageId>,
}

/// Pages written by [`TreeBuilder::build`].
#[derive(Clone, Debug)]
pub struct BuiltTree {
    /// Root page.
    pub root: PageId,
    /// Generation every node and pointer was written at.
    pub root_generation: Generation,
    /// Pages per level, root level first, each level left to right.
    pub levels: Vec<Vec<PageId>>,
    /// Highest page id allocated in the store after the build.
    pub last_id: PageId,
}

impl BuiltTree {
    /// Number of levels.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    /// Leaf pages, left to right.
    pub fn leaves(&self) -> &[PageId] {
        self.levels.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every page of the tree.
    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.levels.iter().flatten().copied()
    }
}

impl<'a, L: Layout> TreeBuilder<'a, L> {
    /// Builder writing full nodes at [`Generation::MIN`].
    pub fn new(pager: &'a Pager, layout: &'a L) -> Result<Self> {
        let shape = NodeShape::new(pager.page_size(), layout.key_size(), layout.value_size())?;
        Ok(Self {
            pager,
            layout,
            shape,
            generation: Generation::MIN,
            leaf_fill: shape.leaf_max_keys(),
            internal_fill: shape.internal_max_keys() + 1,
            reserved: VecDeque::new(),
        })
    }

    /// Node geometry of the tree being built.
    pub fn shape(&self) -> NodeShape {
        self.shape
    }

    /// Generation stamped on nodes and pointers.
    pub fn generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// Keys per leaf, clamped to the leaf capacity.
    pub fn leaf_fill(mut self, keys: usize) -> Self {
        self.leaf_fill = keys.clamp(1, self.shape.leaf_max_keys());
        self
    }

    /// Children per internal node, clamped to the internal capacity.
    pub fn internal_fill(mut self, children: usize) -> Self {
        self.internal_fill = children.clamp(2, self.shape.internal_max_keys() + 1);
        self
    }

    /// Uses already allocated `ids`, in order, before allocating new pages.
    pub fn reuse_pages(mut self, ids: impl IntoIterator<Item = PageId>) -> Self {
        self.reserved.extend(ids);
        self
    }

    fn next_page(&mut self) -> PageId {
        self.reserved
            .pop_front()
            .unwrap_or_else(|| self.pager.allocate_page())
    }

    /// Writes one complete node, overwriting whatever `id` held.
    ///
    /// Internal nodes take `keys.len() + 1` children; leaves take none and get
    /// values derived from each key's position.
    pub fn write_node(
        &self,
        id: PageId,
        kind: NodeKind,
        keys: &[L::Key],
        children: &[PageId],
        left: Option<PageId>,
        right: Option<PageId>,
    ) -> Result<()> {
        if keys.len() > self.shape.max_keys(kind) {
            return Err(TreeError::Invalid("too many keys for node kind"));
        }
        if kind == NodeKind::Internal && children.len() != keys.len() + 1 {
            return Err(TreeError::Invalid("internal node needs one more child than keys"));
        }
        let stable = Generation(self.generation.0.saturating_sub(1));
        let unstable = self.generation;
        let mut encoded = vec![0u8; self.shape.key_size()];
        let mut value = vec![0u8; self.shape.value_size()];
        let mut page = self.pager.write(id)?;
        page::init_node(&mut page, kind, self.generation)?;
        for (pos, key) in keys.iter().enumerate() {
            self.layout.write_key(key, &mut encoded);
            page::put_key(&mut page, &self.shape, pos, &encoded)?;
            if kind == NodeKind::Leaf {
                let tag = (pos as u64).to_be_bytes();
                let width = value.len().min(tag.len());
                value[..width].copy_from_slice(&tag[tag.len() - width..]);
                page::put_value(&mut page, &self.shape, pos, &value)?;
            }
        }
        page::set_key_count(&mut page, keys.len())?;
        for (pos, child) in children.iter().enumerate() {
            let offset = PointerField::Child(pos).offset(&self.shape);
            write_pointer(&mut page, offset, Some(*child), stable, unstable)?;
        }
        let left_at = PointerField::LeftSibling.offset(&self.shape);
        let right_at = PointerField::RightSibling.offset(&self.shape);
        write_pointer(&mut page, left_at, left, stable, unstable)?;
        write_pointer(&mut page, right_at, right, stable, unstable)
    }

    /// Builds a tree over `keys`, which must be strictly increasing.
    pub fn build(mut self, keys: &[L::Key]) -> Result<BuiltTree> {
        if self.generation < Generation::MIN || self.generation >= Generation::MAX {
            return Err(TreeError::Invalid("builder generation out of range"));
        }
        let ordered = keys.windows(2).all(|pair| {
            self.layout.compare(&pair[0], &pair[1]) == std::cmp::Ordering::Less
        });
        if !ordered {
            return Err(TreeError::Invalid("keys must be strictly increasing"));
        }

        let chunks: Vec<&[L::Key]> = if keys.is_empty() {
            vec![&[]]
        } else {
            keys.chunks(self.leaf_fill).collect()
        };
        let ids: Vec<PageId> = chunks.iter().map(|_| self.next_page()).collect();
        let mut entries = Vec::with_capacity(ids.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let left = idx.checked_sub(1).map(|i| ids[i]);
            let right = ids.get(idx + 1).copied();
            self.write_node(ids[idx], NodeKind::Leaf, chunk, &[], left, right)?;
            entries.push((ids[idx], chunk.first().cloned()));
        }
        let mut levels = vec![ids];

        while entries.len() > 1 {
            let groups = group_children(entries.len(), self.internal_fill, self.shape.internal_max_keys() + 1);
            let ids: Vec<PageId> = groups.iter().map(|_| self.next_page()).collect();
            let mut next = Vec::with_capacity(ids.len());
            for (idx, group) in groups.iter().enumerate() {
                let members = &entries[group.clone()];
                let children: Vec<PageId> = members.iter().map(|(page, _)| *page).collect();
                let separators: Vec<L::Key> = members[1..]
                    .iter()
                    .filter_map(|(_, first)| first.clone())
                    .collect();
                let left = idx.checked_sub(1).map(|i| ids[i]);
                let right = ids.get(idx + 1).copied();
                self.write_node(ids[idx], NodeKind::Internal, &separators, &children, left, right)?;
                next.push((ids[idx], members[0].1.clone()));
            }
            levels.push(ids);
            entries = next;
        }
        levels.reverse();

        let root = entries[0].0;
        let last_id = self
            .pager
            .last_page_id()
            .ok_or(TreeError::Invalid("store has no pages"))?;
        debug!(root = root.0, height = levels.len(), keys = keys.len(), "tree built");
        Ok(BuiltTree {
            root,
            root_generation: self.generation,
            levels,
            last_id,
        })
    }
}

/// Splits `n` children into runs of `fill`, folding a lone trailing child
/// into the previous run when that run has room.
fn group_children(n: usize, fill: usize, max: usize) -> Vec<std::ops::Range<usize>> {
    let mut groups: Vec<std::ops::Range<usize>> = (0..n)
        .step_by(fill)
        .map(|start| start..(start + fill).min(n))
        .collect();
    if groups.len() > 1 && groups[groups.len() - 1].len() == 1 {
        let last = groups.len() - 1;
        if groups[last - 1].len() < max {
            groups[last - 1].end = n;
            groups.pop();
        } else {
            groups[last - 1].end -= 1;
            groups[last].start -= 1;
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::PagerOptions;
    use crate::storage::btree::layout::U64Layout;

    #[test]
    fn grouping_avoids_single_child_nodes() {
        assert_eq!(group_children(6, 2, 5), vec![0..2, 2..4, 4..6]);
        assert_eq!(group_children(3, 2, 5), vec![0..3]);
        assert_eq!(group_children(7, 3, 3), vec![0..3, 3..5, 5..7]);
        assert_eq!(group_children(1, 4, 5), vec![0..1]);
    }

    #[test]
    fn builds_three_level_tree() -> Result<()> {
        let pager = Pager::new(PagerOptions {
            page_size: 256,
            initial_capacity: 16,
        })?;
        let layout = U64Layout::default();
        let keys: Vec<u64> = (1..=12).map(|k| k * 10).collect();
        let tree = TreeBuilder::new(&pager, &layout)?
            .leaf_fill(2)
            .internal_fill(2)
            .build(&keys)?;
        assert_eq!(tree.height(), 3);
        assert_eq!(tree.levels[0], vec![tree.root]);
        assert_eq!(tree.levels[1].len(), 3);
        assert_eq!(tree.leaves().len(), 6);
        assert_eq!(tree.pages().count(), 10);
        assert_eq!(tree.last_id, PageId(9));
        Ok(())
    }

    #[test]
    fn rejects_unsorted_keys() -> Result<()> {
        let pager = Pager::new(PagerOptions::default())?;
        let layout = U64Layout::default();
        let err = TreeBuilder::new(&pager, &layout)?
            .build(&[3, 3])
            .err()
            .expect("duplicate keys");
        assert!(matches!(err, TreeError::Invalid(_)));
        Ok(())
    }
}
