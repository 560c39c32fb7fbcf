//! Bitmap allocator for physical 4 KiB frames.
//!
//! One bit per frame, 32 frames per word. A set bit means the frame is owned by
//! some page entry. Allocation always hands out the lowest free frame.

use kernel_memory_addresses::FrameIndex;
use kernel_vmem::FrameAlloc;
use kernel_vmem::info::PAGE_SIZE;

/// Errors raised when setting up the frame bitmap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("no free physical frames left")]
    Exhausted,
    #[error("bitmap of {words} words cannot track {frames} frames")]
    BitmapTooSmall { words: usize, frames: usize },
}

/// Bitset over a fixed range of physical frames starting at frame 0.
pub struct BitmapFrameAlloc<'a> {
    words: &'a mut [u32],
    frame_count: usize,
}

impl<'a> BitmapFrameAlloc<'a> {
    /// Number of frames covering physical memory `[0, memory_end)`.
    #[inline]
    #[must_use]
    pub const fn frames_for(memory_end: usize) -> usize {
        memory_end / PAGE_SIZE
    }

    /// Number of bitmap words needed for `frame_count` frames.
    #[inline]
    #[must_use]
    pub const fn words_for(frame_count: usize) -> usize {
        frame_count.div_ceil(u32::BITS as usize)
    }

    /// Track `frame_count` frames in `words`, all initially free.
    ///
    /// # Errors
    /// [`FrameError::BitmapTooSmall`] if `words` has fewer bits than frames.
    pub fn new(words: &'a mut [u32], frame_count: usize) -> Result<Self, FrameError> {
        if words.len() < Self::words_for(frame_count) {
            return Err(FrameError::BitmapTooSmall {
                words: words.len(),
                frames: frame_count,
            });
        }

        words.fill(0);
        Ok(Self { words, frame_count })
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Number of frames currently claimed.
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Like [`FrameAlloc::allocate`], with exhaustion as an error.
    ///
    /// # Errors
    /// [`FrameError::Exhausted`] when every frame is in use.
    pub fn try_allocate(&mut self) -> Result<FrameIndex, FrameError> {
        self.allocate().ok_or(FrameError::Exhausted)
    }

    #[inline]
    fn in_range(&self, frame: FrameIndex) -> bool {
        frame.as_usize() < self.frame_count
    }

    #[inline]
    fn set(&mut self, frame: FrameIndex) {
        self.words[frame.word()] |= 1 << frame.bit();
    }

    #[inline]
    fn clear(&mut self, frame: FrameIndex) {
        self.words[frame.word()] &= !(1 << frame.bit());
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    fn allocate(&mut self) -> Option<FrameIndex> {
        let (word_index, word) = self
            .words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u32::MAX)?;

        let index = word_index * u32::BITS as usize + word.trailing_ones() as usize;
        if index >= self.frame_count {
            return None;
        }

        let frame = FrameIndex::new(u32::try_from(index).ok()?);
        self.set(frame);
        Some(frame)
    }

    fn free(&mut self, frame: FrameIndex) {
        if self.in_range(frame) {
            self.clear(frame);
        } else {
            log::warn!("ignoring free of untracked frame {frame}");
        }
    }

    fn is_used(&self, frame: FrameIndex) -> bool {
        self.in_range(frame) && self.words[frame.word()] & (1 << frame.bit()) != 0
    }

    fn reserve(&mut self, frame: FrameIndex) -> bool {
        if !self.in_range(frame) || self.is_used(frame) {
            return false;
        }
        self.set(frame);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_frame() {
        let mut words = [0u32; 2];
        let mut frames = BitmapFrameAlloc::new(&mut words, 64).unwrap();

        assert_eq!(frames.allocate(), Some(FrameIndex::new(0)));
        assert_eq!(frames.allocate(), Some(FrameIndex::new(1)));
        assert_eq!(frames.allocate(), Some(FrameIndex::new(2)));

        frames.free(FrameIndex::new(1));
        assert!(!frames.is_used(FrameIndex::new(1)));
        assert_eq!(frames.allocate(), Some(FrameIndex::new(1)));
        assert_eq!(frames.used_count(), 3);
    }

    #[test]
    fn skips_full_words() {
        let mut words = [0u32; 3];
        let mut frames = BitmapFrameAlloc::new(&mut words, 96).unwrap();
        for _ in 0..40 {
            frames.allocate().unwrap();
        }
        frames.free(FrameIndex::new(70));
        assert_eq!(frames.allocate(), Some(FrameIndex::new(40)));
    }

    #[test]
    fn full_bitmap_reports_exhaustion_on_first_call() {
        let mut words = [0u32; 4];
        let mut frames = BitmapFrameAlloc::new(&mut words, 128).unwrap();
        for i in 0..128 {
            assert!(frames.reserve(FrameIndex::new(i)));
        }

        assert_eq!(frames.allocate(), None);
        assert_eq!(frames.try_allocate(), Err(FrameError::Exhausted));
        assert_eq!(frames.used_count(), 128);
    }

    #[test]
    fn frames_past_the_end_are_never_handed_out() {
        let mut words = [0u32; 1];
        let mut frames = BitmapFrameAlloc::new(&mut words, 3).unwrap();
        for _ in 0..3 {
            frames.allocate().unwrap();
        }
        assert_eq!(frames.allocate(), None);
        assert!(!frames.reserve(FrameIndex::new(3)));
        assert!(!frames.is_used(FrameIndex::new(31)));
    }

    #[test]
    fn reserve_claims_exactly_once() {
        let mut words = [0u32; 1];
        let mut frames = BitmapFrameAlloc::new(&mut words, 32).unwrap();
        assert!(frames.reserve(FrameIndex::new(0)));
        assert!(!frames.reserve(FrameIndex::new(0)));
        assert_eq!(frames.allocate(), Some(FrameIndex::new(1)));
    }

    #[test]
    fn rejects_undersized_bitmap() {
        let mut words = [0u32; 1];
        assert_eq!(
            BitmapFrameAlloc::new(&mut words, 33).err(),
            Some(FrameError::BitmapTooSmall {
                words: 1,
                frames: 33
            })
        );
    }

    #[test]
    fn matches_reference_model() {
        const FRAMES: usize = 200;
        let mut words = [0u32; FRAMES.div_ceil(32)];
        let mut frames = BitmapFrameAlloc::new(&mut words, FRAMES).unwrap();
        let mut model = [false; FRAMES];

        // xorshift keeps the sequence reproducible
        let mut state = 0x2545_F491_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for _ in 0..5_000 {
            let roll = next();
            if roll % 3 == 0 {
                let frame = (next() as usize) % FRAMES;
                model[frame] = false;
                frames.free(FrameIndex::new(u32::try_from(frame).unwrap()));
            } else {
                let expected = model.iter().position(|u| !*u);
                let got = frames.allocate().map(FrameIndex::as_usize);
                assert_eq!(got, expected);
                if let Some(i) = expected {
                    model[i] = true;
                }
            }

            assert_eq!(frames.used_count(), model.iter().filter(|u| **u).count());
        }

        for (i, used) in model.iter().enumerate() {
            assert_eq!(frames.is_used(FrameIndex::new(u32::try_from(i).unwrap())), *used);
        }
    }
}
