use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::cursor::PageCursor;
use super::frame::{Frame, FrameWrite};
use crate::types::{PageId, Result, TreeError};

/// Smallest page the store accepts; anything smaller cannot hold a node header.
pub const MIN_PAGE_SIZE: u32 = 256;
/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Configuration options for the pager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerOptions {
    /// Size of each page in bytes; a multiple of 8 no smaller than [`MIN_PAGE_SIZE`].
    pub page_size: u32,
    /// Frames to reserve up front.
    pub initial_capacity: usize,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            initial_capacity: 64,
        }
    }
}

/// In-memory page store with lock-free readers.
///
/// Page ids are dense and start at zero. The frame table lock is only held
/// while resolving an id to its frame; reading page contents never blocks a
/// writer.
pub struct Pager {
    page_size: usize,
    frames: RwLock<Vec<Arc<Frame>>>,
}

/// Counters describing the store.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PagerStats {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Pages allocated so far.
    pub pages: u64,
}

impl fmt::Display for PagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pages of {} bytes", self.pages, self.page_size)
    }
}

impl Pager {
    /// Creates an empty store.
    pub fn new(options: PagerOptions) -> Result<Self> {
        if options.page_size < MIN_PAGE_SIZE {
            return Err(TreeError::Invalid("page size smaller than minimum"));
        }
        if options.page_size % 8 != 0 {
            return Err(TreeError::Invalid("page size must be a multiple of 8"));
        }
        debug!(page_size = options.page_size, "pager created");
        Ok(Self {
            page_size: options.page_size as usize,
            frames: RwLock::new(Vec::with_capacity(options.initial_capacity)),
        })
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocates a zeroed page at the end of the store.
    pub fn allocate_page(&self) -> PageId {
        let mut frames = self.frames.write();
        let id = PageId(frames.len() as u64);
        frames.push(Arc::new(Frame::new(self.page_size)));
        trace!(page = id.0, "page allocated");
        id
    }

    /// Number of pages allocated so far.
    pub fn page_count(&self) -> u64 {
        self.frames.read().len() as u64
    }

    /// Highest allocated page id, if any page exists.
    pub fn last_page_id(&self) -> Option<PageId> {
        self.page_count().checked_sub(1).map(PageId)
    }

    /// Returns a snapshot of pager statistics.
    pub fn stats(&self) -> PagerStats {
        PagerStats {
            page_size: self.page_size as u32,
            pages: self.page_count(),
        }
    }

    pub(crate) fn frame(&self, id: PageId) -> Result<Arc<Frame>> {
        let frames = self.frames.read();
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| frames.get(idx))
            .cloned()
            .ok_or(TreeError::PageOutOfRange {
                page: id,
                last: PageId((frames.len() as u64).saturating_sub(1)),
            })
    }

    /// Opens exclusive write access to `id`.
    ///
    /// Readers positioned on the page observe an epoch change and replay their
    /// reads once the returned guard drops.
    pub fn write(&self, id: PageId) -> Result<PageWrite> {
        let frame = self.frame(id)?;
        let inner = frame.begin_write();
        Ok(PageWrite {
            id,
            len: frame.len(),
            inner,
        })
    }

    /// Creates an unpositioned read cursor.
    pub fn cursor(&self) -> PageCursor<'_> {
        PageCursor::new(self)
    }

    /// Copies a consistent image of `id`.
    pub fn read_page(&self, id: PageId) -> Result<Vec<u8>> {
        let frame = self.frame(id)?;
        let mut buf = vec![0u8; self.page_size];
        loop {
            let epoch = frame.stable_epoch();
            frame.read_into(0, &mut buf);
            if frame.validate(epoch) {
                return Ok(buf);
            }
        }
    }
}

/// Exclusive write access to one page.
pub struct PageWrite {
    id: PageId,
    len: usize,
    inner: FrameWrite,
}

impl PageWrite {
    /// Page being written.
    pub fn id(&self) -> PageId {
        self.id
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(TreeError::CursorOutOfBounds {
                page: self.id,
                offset,
            }),
        }
    }

    /// Writes raw bytes at `offset`.
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        self.inner.write(offset, src);
        Ok(())
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.put_bytes(offset, &[value])
    }

    /// Writes a big-endian u16.
    pub fn put_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.put_bytes(offset, &value.to_be_bytes())
    }

    /// Writes a big-endian u32.
    pub fn put_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.put_bytes(offset, &value.to_be_bytes())
    }

    /// Writes a big-endian u64.
    pub fn put_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.put_bytes(offset, &value.to_be_bytes())
    }

    /// Reads back bytes from the page being written.
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        self.inner.read(offset, dst);
        Ok(())
    }

    /// Zeroes the whole page.
    pub fn clear(&mut self) -> Result<()> {
        let zeros = vec![0u8; self.len];
        self.put_bytes(0, &zeros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pager() -> Pager {
        Pager::new(PagerOptions {
            page_size: MIN_PAGE_SIZE,
            initial_capacity: 4,
        })
        .expect("pager")
    }

    #[test]
    fn rejects_unusable_page_sizes() {
        let err = Pager::new(PagerOptions {
            page_size: 64,
            initial_capacity: 0,
        })
        .err()
        .expect("too small");
        assert!(matches!(err, TreeError::Invalid(_)));
        let err = Pager::new(PagerOptions {
            page_size: 260,
            initial_capacity: 0,
        })
        .err()
        .expect("unaligned");
        assert!(matches!(err, TreeError::Invalid(_)));
    }

    #[test]
    fn allocation_is_dense_from_zero() {
        let pager = small_pager();
        assert_eq!(pager.last_page_id(), None);
        assert_eq!(pager.allocate_page(), PageId(0));
        assert_eq!(pager.allocate_page(), PageId(1));
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.last_page_id(), Some(PageId(1)));
        assert_eq!(pager.stats().to_string(), "2 pages of 256 bytes");
    }

    #[test]
    fn writes_are_visible_to_page_reads() -> Result<()> {
        let pager = small_pager();
        let id = pager.allocate_page();
        {
            let mut write = pager.write(id)?;
            write.put_u64(8, 0xDEAD_BEEF)?;
            let mut back = [0u8; 8];
            write.get_bytes(8, &mut back)?;
            assert_eq!(u64::from_be_bytes(back), 0xDEAD_BEEF);
        }
        let image = pager.read_page(id)?;
        assert_eq!(&image[8..16], &0xDEAD_BEEFu64.to_be_bytes());
        Ok(())
    }

    #[test]
    fn out_of_range_access_is_fatal() {
        let pager = small_pager();
        let id = pager.allocate_page();
        let err = pager.write(PageId(3)).err().expect("missing page");
        assert!(matches!(err, TreeError::PageOutOfRange { .. }));
        let mut write = pager.write(id).expect("write");
        let err = write.put_u64(252, 1).unwrap_err();
        assert!(matches!(
            err,
            TreeError::CursorOutOfBounds { offset: 252, .. }
        ));
    }
}
