use tracing::{debug, trace};

use crate::primitives::pager::{PageCursor, Pager};
use crate::types::page::{PageKind, PAGE_KIND_OFFSET};
use crate::types::{PageId, Result, TreeError};

const NEXT_OFFSET: usize = 8;
const COUNT_OFFSET: usize = 16;
const ENTRIES_OFFSET: usize = 24;
const ENTRY_LEN: usize = 8;
const NO_PAGE: u64 = u64::MAX;

/// Chain of pages recording released page ids.
///
/// Each free-list page starts with the [`PageKind::FreeList`] tag, then a
/// `next:u64` link, an `count:u32` entry count and `count` page ids. New
/// pages are pushed at the head.
pub struct FreeList<'a> {
    pager: &'a Pager,
    head: Option<PageId>,
}

/// Ids held by entries per free-list page for `page_size` byte pages.
pub fn free_page_capacity(page_size: usize) -> usize {
    page_size.saturating_sub(ENTRIES_OFFSET) / ENTRY_LEN
}

struct FreePage {
    next: Option<PageId>,
    entries: Vec<PageId>,
}

fn read_free_page(cursor: &mut PageCursor<'_>, capacity: usize) -> Result<FreePage> {
    let (tag, next, entries) = cursor.consistent_read(|c| {
        let tag = c.get_u8(PAGE_KIND_OFFSET);
        let next = c.get_u64(NEXT_OFFSET);
        let count = (c.get_u32(COUNT_OFFSET) as usize).min(capacity);
        let entries: Vec<PageId> = (0..count)
            .map(|i| PageId(c.get_u64(ENTRIES_OFFSET + i * ENTRY_LEN)))
            .collect();
        (tag, next, entries)
    })?;
    if tag != PageKind::FreeList.as_u8() {
        return Err(TreeError::Corruption("free-list chain reached a non free-list page"));
    }
    Ok(FreePage {
        next: (next != NO_PAGE).then_some(PageId(next)),
        entries,
    })
}

impl<'a> FreeList<'a> {
    /// Opens the chain starting at `head`.
    pub fn open(pager: &'a Pager, head: Option<PageId>) -> Self {
        Self { pager, head }
    }

    /// First page of the chain.
    pub fn head(&self) -> Option<PageId> {
        self.head
    }

    /// Records `ids` as free, growing the chain as needed.
    pub fn release(&mut self, ids: &[PageId]) -> Result<()> {
        let capacity = free_page_capacity(self.pager.page_size());
        if capacity == 0 {
            return Err(TreeError::Invalid("page too small for free-list entries"));
        }
        let mut pending = ids;
        while !pending.is_empty() {
            let used = match self.head {
                Some(head) => {
                    let mut cursor = self.pager.cursor();
                    cursor.go_to(head, "free list head")?;
                    read_free_page(&mut cursor, capacity)?.entries.len()
                }
                None => capacity,
            };
            if used == capacity {
                let page = self.pager.allocate_page();
                let mut write = self.pager.write(page)?;
                write.clear()?;
                write.put_u8(PAGE_KIND_OFFSET, PageKind::FreeList.as_u8())?;
                write.put_u64(NEXT_OFFSET, self.head.map(|p| p.0).unwrap_or(NO_PAGE))?;
                write.put_u32(COUNT_OFFSET, 0)?;
                trace!(page = page.0, "free-list page added");
                self.head = Some(page);
                continue;
            }
            let Some(head) = self.head else {
                return Err(TreeError::Invalid("free list has no head page"));
            };
            let take = pending.len().min(capacity - used);
            let mut write = self.pager.write(head)?;
            for (i, id) in pending[..take].iter().enumerate() {
                write.put_u64(ENTRIES_OFFSET + (used + i) * ENTRY_LEN, id.0)?;
            }
            write.put_u32(COUNT_OFFSET, (used + take) as u32)?;
            pending = &pending[take..];
        }
        debug!(released = ids.len(), head = ?self.head, "pages released");
        Ok(())
    }

    /// Every free-list page followed by the ids it records, head first.
    pub fn ids(&self) -> Result<Vec<PageId>> {
        let capacity = free_page_capacity(self.pager.page_size());
        let mut cursor = self.pager.cursor();
        let mut out = Vec::new();
        let mut next = self.head;
        let mut hops = 0u64;
        while let Some(page) = next {
            hops += 1;
            if hops > self.pager.page_count() {
                return Err(TreeError::Corruption("free-list chain loops"));
            }
            cursor.go_to(page, "free list")?;
            let free = read_free_page(&mut cursor, capacity)?;
            out.push(page);
            out.extend(free.entries);
            next = free.next;
        }
        Ok(out)
    }
}
