use std::sync::Arc;

use tracing::trace;

use super::frame::Frame;
use super::pager::Pager;
use crate::types::{PageId, Result, TreeError};

/// Optimistic read cursor over a [`Pager`].
///
/// Reads never lock the page. Callers group the reads of one page into a
/// block and call [`PageCursor::should_retry`] afterwards; a `true` answer
/// means a writer touched the page during the block and every value read in
/// it must be discarded. Out-of-range offsets do not fail immediately: they
/// return zero and latch a flag that [`PageCursor::check_out_of_bounds`]
/// turns into an error once the block is known to be consistent.
pub struct PageCursor<'a> {
    pager: &'a Pager,
    current: Option<(PageId, Arc<Frame>)>,
    epoch: u64,
    out_of_bounds: Option<usize>,
    retries: u64,
}

impl<'a> PageCursor<'a> {
    pub(crate) fn new(pager: &'a Pager) -> Self {
        Self {
            pager,
            current: None,
            epoch: 0,
            out_of_bounds: None,
            retries: 0,
        }
    }

    /// Moves the cursor to `id`; `reason` only shows up in traces.
    ///
    /// On error the cursor stays where it was.
    pub fn go_to(&mut self, id: PageId, reason: &str) -> Result<()> {
        let frame = self.pager.frame(id)?;
        trace!(page = id.0, reason, "cursor navigation");
        self.epoch = frame.stable_epoch();
        self.current = Some((id, frame));
        self.out_of_bounds = None;
        Ok(())
    }

    /// Page the cursor is pinned to.
    ///
    /// # Panics
    ///
    /// Panics if the cursor was never positioned.
    pub fn current_page_id(&self) -> PageId {
        self.current
            .as_ref()
            .map(|(id, _)| *id)
            .expect("cursor is not positioned on a page")
    }

    /// Size of the pages this cursor reads.
    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    /// Times a read block had to be replayed since the cursor was created.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Reports whether the last read block saw a torn page.
    ///
    /// When it did, the cursor re-arms for a fresh attempt: the epoch is
    /// re-sampled and the out-of-bounds latch is cleared, since it may have
    /// been caused by garbage read mid-write.
    pub fn should_retry(&mut self) -> bool {
        let Some((_, frame)) = self.current.as_ref() else {
            return false;
        };
        if frame.validate(self.epoch) {
            return false;
        }
        self.epoch = frame.stable_epoch();
        self.out_of_bounds = None;
        self.retries += 1;
        true
    }

    /// Fails if any read since the last navigation or retry went past the page.
    pub fn check_out_of_bounds(&mut self) -> Result<()> {
        match self.out_of_bounds.take() {
            Some(offset) => Err(TreeError::CursorOutOfBounds {
                page: self.current_page_id(),
                offset,
            }),
            None => Ok(()),
        }
    }

    /// Runs `block` until it completes without observing a concurrent write,
    /// then verifies it stayed inside the page.
    pub fn consistent_read<T>(&mut self, mut block: impl FnMut(&mut Self) -> T) -> Result<T> {
        loop {
            let value = block(self);
            if !self.should_retry() {
                self.check_out_of_bounds()?;
                return Ok(value);
            }
        }
    }

    /// Copies `dst.len()` bytes from `offset`.
    pub fn get_bytes(&mut self, offset: usize, dst: &mut [u8]) {
        let Some((_, frame)) = self.current.as_ref() else {
            self.out_of_bounds.get_or_insert(offset);
            dst.fill(0);
            return;
        };
        match offset.checked_add(dst.len()) {
            Some(end) if end <= frame.len() => frame.read_into(offset, dst),
            _ => {
                self.out_of_bounds.get_or_insert(offset);
                dst.fill(0);
            }
        }
    }

    /// Reads one byte.
    pub fn get_u8(&mut self, offset: usize) -> u8 {
        let mut buf = [0u8; 1];
        self.get_bytes(offset, &mut buf);
        buf[0]
    }

    /// Reads a big-endian u16.
    pub fn get_u16(&mut self, offset: usize) -> u16 {
        let mut buf = [0u8; 2];
        self.get_bytes(offset, &mut buf);
        u16::from_be_bytes(buf)
    }

    /// Reads a big-endian u32.
    pub fn get_u32(&mut self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.get_bytes(offset, &mut buf);
        u32::from_be_bytes(buf)
    }

    /// Reads a big-endian u64.
    pub fn get_u64(&mut self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        self.get_bytes(offset, &mut buf);
        u64::from_be_bytes(buf)
    }
}
