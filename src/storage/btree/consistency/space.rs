use tracing::{debug, info};

use super::{ConsistencyChecker, Defect, DefectKind, FieldReader};
use crate::storage::btree::gspp::Pointer;
use crate::storage::btree::layout::Layout;
use crate::storage::btree::page::{self, NodeKind, PointerField};
use crate::types::{PageId, Result, TreeError};

/// Highest id the seen-page bitmap accepts.
const MAX_ACCOUNTABLE_ID: u64 = i32::MAX as u64 - 1;

/// One bit per page id in `[0, last]`.
struct SeenPages {
    words: Vec<u64>,
    last: u64,
}

impl SeenPages {
    fn new(last: PageId) -> Result<Self> {
        if last.0 > MAX_ACCOUNTABLE_ID {
            return Err(TreeError::IdSpaceTooLarge { last_id: last.0 });
        }
        let bits = last.0 as usize + 1;
        Ok(Self {
            words: vec![0; bits.div_ceil(64)],
            last: last.0,
        })
    }

    /// Sets the bit; false if it was already set.
    fn insert(&mut self, id: PageId) -> bool {
        let idx = id.0 as usize;
        let mask = 1u64 << (idx % 64);
        let word = &mut self.words[idx / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    fn contains(&self, id: u64) -> bool {
        self.words[id as usize / 64] & (1u64 << (id % 64)) != 0
    }

    fn missing(&self, from: PageId) -> Vec<u64> {
        (from.0..=self.last).filter(|id| !self.contains(*id)).collect()
    }
}

impl<'p, L: Layout> ConsistencyChecker<'p, L> {
    /// Proves every page id up to `last_id` is used exactly once.
    ///
    /// `free_ids` must yield the free-list pages and the ids they hold; it is
    /// consumed before the tree is walked. The tree is walked level by level
    /// through right-sibling chains starting from `root`. Returns `Ok(true)`
    /// when this call recorded no defect.
    pub fn check_space(
        &mut self,
        root: PageId,
        last_id: PageId,
        free_ids: impl IntoIterator<Item = PageId>,
    ) -> Result<bool> {
        let before = self.defects.len();
        let mut seen = SeenPages::new(last_id)?;
        info!(root = root.0, last_id = last_id.0, "space check started");

        for id in free_ids {
            self.stats.free_ids += 1;
            self.mark(&mut seen, id, None);
        }

        self.cursor.go_to(root, "root")?;
        let mut level = 0;
        loop {
            let leftmost = self.cursor.current_page_id();
            self.assert_on_tree_node(level)?;
            if !self.mark(&mut seen, leftmost, Some(level)) {
                break;
            }
            self.traverse_right_siblings(&mut seen, level)?;
            self.cursor.go_to(leftmost, "back")?;
            if !self.go_to_leftmost_child(level)? {
                break;
            }
            level += 1;
        }

        let missing = seen.missing(self.options.min_tree_node_id);
        if !missing.is_empty() {
            let listed: Vec<String> = missing.iter().map(u64::to_string).collect();
            self.record(Defect {
                kind: DefectKind::UnusedPages,
                page: None,
                level: None,
                message: format!(
                    "There are {} unused pages in the store: [{}]",
                    missing.len(),
                    listed.join(",")
                ),
            });
        }
        self.stats.retries = self.cursor.retries();

        let found = self.defects.len() - before;
        info!(
            live = self.stats.live_pages,
            free = self.stats.free_ids,
            defects = found,
            "space check finished"
        );
        Ok(found == 0)
    }

    /// Marks `id`; false when the walk must not go through it.
    fn mark(&mut self, seen: &mut SeenPages, id: PageId, level: Option<usize>) -> bool {
        let defect = |kind, message| Defect {
            kind,
            page: Some(id),
            level,
            message,
        };
        if id.0 > seen.last {
            self.record(defect(
                DefectKind::PageIdBeyondLast,
                format!("Unexpectedly high id {id} seen when last id is {}", seen.last),
            ));
            return false;
        }
        if id < self.options.min_tree_node_id {
            self.record(defect(
                DefectKind::PageIdBelowMin,
                format!(
                    "id {id} is below the first tree node id {}",
                    self.options.min_tree_node_id
                ),
            ));
        }
        if !seen.insert(id) {
            self.record(defect(DefectKind::DuplicatePageId, format!("{id} already seen")));
            return false;
        }
        if level.is_some() {
            self.stats.live_pages += 1;
        }
        true
    }

    fn traverse_right_siblings(&mut self, seen: &mut SeenPages, level: usize) -> Result<()> {
        loop {
            let mut pending = Vec::new();
            let reader = FieldReader::new(self.layout, &self.shape, &self.options);
            let right = self.cursor.consistent_read(|c| {
                pending.clear();
                let kind = page::kind(c);
                reader.pointer(c, PointerField::RightSibling, kind, level, &mut pending)
            })?;
            self.record_all(pending);
            let Pointer::Node { page: next, .. } = right else {
                return Ok(());
            };
            if !self.mark(seen, next, Some(level)) {
                return Ok(());
            }
            self.cursor.go_to(next, "right sibling")?;
        }
    }

    fn go_to_leftmost_child(&mut self, level: usize) -> Result<bool> {
        let parent = self.cursor.current_page_id();
        let mut pending = Vec::new();
        let reader = FieldReader::new(self.layout, &self.shape, &self.options);
        let (kind, child) = self.cursor.consistent_read(|c| {
            pending.clear();
            let kind = page::kind(c);
            let child = (kind == Some(NodeKind::Internal)).then(|| {
                reader.pointer(c, PointerField::Child(0), kind, level, &mut pending)
            });
            (kind, child)
        })?;
        self.record_all(pending);
        match child {
            Some(Pointer::Node { page, .. }) => {
                debug!(level = level + 1, leftmost = page.0, "descending to next level");
                self.cursor.go_to(page, "child")?;
                Ok(true)
            }
            Some(Pointer::NoNode) => {
                self.record(Defect::on_page(
                    DefectKind::MissingChild,
                    parent,
                    level,
                    format!("child at position 0 of internal node {parent} is empty"),
                ));
                Ok(false)
            }
            Some(Pointer::Corrupt(_)) => Ok(false),
            None => {
                debug!(level, ?kind, "reached leaf level");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_tracks_duplicates_and_gaps() -> Result<()> {
        let mut seen = SeenPages::new(PageId(130))?;
        assert!(seen.insert(PageId(0)));
        assert!(seen.insert(PageId(64)));
        assert!(!seen.insert(PageId(64)));
        assert!(seen.insert(PageId(130)));
        let missing = seen.missing(PageId(60));
        assert_eq!(missing.len(), 130 - 60 + 1 - 2);
        assert_eq!(missing[0], 60);
        assert!(!missing.contains(&64));
        Ok(())
    }

    #[test]
    fn oversized_id_space_is_fatal() {
        let err = SeenPages::new(PageId(u64::MAX)).err().expect("too large");
        assert!(matches!(err, TreeError::IdSpaceTooLarge { .. }));
        assert!(SeenPages::new(PageId(MAX_ACCOUNTABLE_ID + 1)).is_err());
    }
}
