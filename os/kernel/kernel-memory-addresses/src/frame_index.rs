use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;

/// Number of a physical 4 KiB frame, i.e. `physical_address / 4096`.
///
/// This is the value stored in bits 12‒31 of a page entry and the bit number
/// used by the frame bitmap.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameIndex(u32);

impl FrameIndex {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Physical address of the first byte of this frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    /// Index of the 32-bit bitmap word holding this frame's bit.
    #[inline]
    #[must_use]
    pub const fn word(self) -> usize {
        (self.0 / u32::BITS) as usize
    }

    /// Bit position of this frame within its bitmap word.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u32 {
        self.0 % u32::BITS
    }
}

impl fmt::Debug for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x})", self.0)
    }
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
