use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

const WORD: usize = core::mem::size_of::<u64>();
const SPINS_BEFORE_YIELD: u32 = 64;

/// One page worth of memory.
///
/// Bytes live in atomic words so readers never take a lock. Writers are
/// serialised by `writer` and bracket every mutation with two epoch bumps:
/// an odd epoch means a write is in flight, and any epoch change between the
/// start and end of a read means the reader may have seen a torn page.
pub struct Frame {
    epoch: AtomicU64,
    words: Box<[AtomicU64]>,
    len: usize,
    writer: Arc<Mutex<()>>,
}

impl Frame {
    pub fn new(page_size: usize) -> Self {
        let words = (0..page_size.div_ceil(WORD))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            epoch: AtomicU64::new(0),
            words,
            len: page_size,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Waits for any in-flight write to finish and returns the even epoch.
    pub fn stable_epoch(&self) -> u64 {
        let mut spins = 0u32;
        loop {
            let epoch = self.epoch.load(Ordering::Acquire);
            if epoch & 1 == 0 {
                return epoch;
            }
            spins += 1;
            if spins >= SPINS_BEFORE_YIELD {
                spins = 0;
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// True when no write started or finished since `epoch` was sampled.
    pub fn validate(&self, epoch: u64) -> bool {
        fence(Ordering::Acquire);
        self.epoch.load(Ordering::Relaxed) == epoch
    }

    /// Reads one byte; `offset` must be within the page.
    pub fn read_byte(&self, offset: usize) -> u8 {
        let word = self.words[offset / WORD].load(Ordering::Relaxed);
        (word >> ((offset % WORD) * 8)) as u8
    }

    /// Copies `dst.len()` bytes starting at `offset`.
    pub fn read_into(&self, offset: usize, dst: &mut [u8]) {
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.read_byte(offset + i);
        }
    }

    /// Starts a write; the epoch stays odd until the guard drops.
    pub fn begin_write(self: &Arc<Self>) -> FrameWrite {
        let lock = self.writer.lock_arc();
        self.epoch.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        FrameWrite {
            frame: Arc::clone(self),
            _lock: lock,
        }
    }

    fn write_byte(&self, offset: usize, value: u8) {
        let slot = &self.words[offset / WORD];
        let shift = (offset % WORD) * 8;
        let word = slot.load(Ordering::Relaxed);
        let updated = (word & !(0xFFu64 << shift)) | ((value as u64) << shift);
        slot.store(updated, Ordering::Relaxed);
    }
}

/// Exclusive write access to one frame.
pub struct FrameWrite {
    frame: Arc<Frame>,
    _lock: ArcMutexGuard<RawMutex, ()>,
}

impl FrameWrite {
    pub fn write(&mut self, offset: usize, src: &[u8]) {
        for (i, byte) in src.iter().enumerate() {
            self.frame.write_byte(offset + i, *byte);
        }
    }

    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.frame.read_into(offset, dst);
    }
}

impl Drop for FrameWrite {
    fn drop(&mut self) {
        self.frame.epoch.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip_across_word_boundaries() {
        let frame = Arc::new(Frame::new(32));
        {
            let mut write = frame.begin_write();
            write.write(5, &[1, 2, 3, 4, 5, 6, 7]);
        }
        let mut out = [0u8; 7];
        frame.read_into(5, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(frame.read_byte(4), 0);
        assert_eq!(frame.read_byte(12), 0);
    }

    #[test]
    fn epoch_changes_invalidate_readers() {
        let frame = Arc::new(Frame::new(16));
        let epoch = frame.stable_epoch();
        assert!(frame.validate(epoch));
        {
            let mut write = frame.begin_write();
            write.write(0, &[9]);
            assert!(!frame.validate(epoch));
        }
        assert!(!frame.validate(epoch));
        let next = frame.stable_epoch();
        assert_eq!(next, epoch + 2);
        assert!(frame.validate(next));
    }
}
