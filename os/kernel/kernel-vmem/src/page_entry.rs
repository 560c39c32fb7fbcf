use crate::{FrameAlloc, VmemError};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameIndex, PhysicalAddress};

/// A single 32-bit page table entry: one virtual-to-physical translation.
///
/// ### Bit layout
///
/// | Bits  | Name        | Meaning |
/// |-------|-------------|---------|
/// | 0     | `present`   | Translation is valid |
/// | 1     | `writable`  | Writes allowed if set |
/// | 2     | `user`      | Ring 3 may access the page if set |
/// | 3     | `accessed`  | Set by the CPU on any access |
/// | 4     | `dirty`     | Set by the CPU on the first write |
/// | 5–11  | unused      | Kept zero |
/// | 12–31 | `frame`     | Physical frame index |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntry;
/// # use kernel_memory_addresses::FrameIndex;
/// let e = PageEntry::new()
///     .with_present(true)
///     .with_writable(true)
///     .with_frame_bits(0x123);
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// assert_eq!(e.frame(), FrameIndex::new(0x123));
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntry {
    /// Present (bit 0).
    ///
    /// Clear means any access faults. A present entry owns the frame in
    /// [`frame`](Self::frame).
    pub present: bool,

    /// Read/Write (bit 1).
    ///
    /// Read-only when clear. Supervisor writes ignore this bit unless CR0.WP
    /// is set.
    pub writable: bool,

    /// User/Supervisor (bit 2).
    ///
    /// Clear restricts the page to ring 0.
    pub user: bool,

    /// Accessed (bit 3).
    pub accessed: bool,

    /// Dirty (bit 4).
    pub dirty: bool,

    /// Bits 5–11, unused by this kernel.
    #[bits(7)]
    pub unused: u8,

    /// Bits 12–31: physical frame index.
    #[bits(20)]
    pub frame_bits: u32,
}

impl PageEntry {
    /// The physical frame this entry points at.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> FrameIndex {
        FrameIndex::new(self.frame_bits())
    }

    /// Physical address of the first byte of the mapped frame.
    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        self.frame().base()
    }

    /// Whether a frame is bound to this page.
    #[inline]
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.present()
    }

    /// Point this entry at `frame` with the given access rights.
    #[inline]
    pub fn bind_to(&mut self, frame: FrameIndex, kernel_only: bool, writable: bool) {
        self.set_present(true);
        self.set_writable(writable);
        self.set_user(!kernel_only);
        self.set_frame_bits(frame.as_u32());
    }

    /// Bind a freshly allocated frame to this page.
    ///
    /// Does nothing if the page is already bound.
    ///
    /// # Errors
    /// [`VmemError::OutOfFrames`] if the frame allocator is exhausted.
    pub fn bind_frame<F: FrameAlloc + ?Sized>(
        &mut self,
        frames: &mut F,
        kernel_only: bool,
        writable: bool,
    ) -> Result<(), VmemError> {
        if self.is_bound() {
            return Ok(());
        }

        let frame = frames.allocate().ok_or(VmemError::OutOfFrames)?;
        self.bind_to(frame, kernel_only, writable);
        log::trace!("bound frame {frame} (kernel_only={kernel_only}, writable={writable})");
        Ok(())
    }

    /// Bind exactly `frame` to this page, e.g. for identity mappings.
    ///
    /// Does nothing if the page is already bound to `frame`.
    ///
    /// # Errors
    /// - [`VmemError::FrameInUse`] if `frame` is owned by another page.
    /// - [`VmemError::AlreadyBound`] if this page is bound to a different frame.
    pub fn bind_exact_frame<F: FrameAlloc + ?Sized>(
        &mut self,
        frames: &mut F,
        frame: FrameIndex,
        kernel_only: bool,
        writable: bool,
    ) -> Result<(), VmemError> {
        if self.is_bound() {
            return if self.frame() == frame {
                Ok(())
            } else {
                Err(VmemError::AlreadyBound(self.frame()))
            };
        }

        if !frames.reserve(frame) {
            return Err(VmemError::FrameInUse(frame));
        }
        self.bind_to(frame, kernel_only, writable);
        Ok(())
    }

    /// Release the bound frame, if any, and clear the entry's frame field.
    ///
    /// Returns the released frame.
    pub fn unbind_frame<F: FrameAlloc + ?Sized>(&mut self, frames: &mut F) -> Option<FrameIndex> {
        if !self.is_bound() {
            return None;
        }

        let frame = self.frame();
        frames.free(frame);
        self.set_frame_bits(0);
        self.set_present(false);
        Some(frame)
    }

    /// Copy the access and status flags of `other`, keeping this entry's frame.
    #[inline]
    pub fn copy_flags_from(&mut self, other: &Self) {
        self.set_present(other.present());
        self.set_writable(other.writable());
        self.set_user(other.user());
        self.set_accessed(other.accessed());
        self.set_dirty(other.dirty());
    }
}

/// A single 32-bit page directory entry, pointing at one page table.
///
/// This is the hardware-facing half of a [`PageDirectory`](crate::PageDirectory)
/// slot: the CPU walks these, the kernel walks the parallel pointer array.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Present (bit 0).
    pub present: bool,

    /// Read/Write (bit 1) for the whole 4 MiB range.
    pub writable: bool,

    /// User/Supervisor (bit 2) for the whole 4 MiB range.
    pub user: bool,

    /// Page-level write-through (bit 3).
    pub write_through: bool,

    /// Page-level cache disable (bit 4).
    pub cache_disable: bool,

    /// Accessed (bit 5).
    pub accessed: bool,

    /// Bit 6, ignored for table pointers.
    #[bits(1)]
    __: u8,

    /// Page size (bit 7). Always 0: this kernel uses 4 KiB pages only.
    pub large_page: bool,

    /// Bits 8–11, available to software.
    #[bits(4)]
    pub available: u8,

    /// Bits 12–31: physical frame of the page table.
    #[bits(20)]
    table_frame: u32,
}

impl DirectoryEntry {
    /// An entry pointing at a table at `table_phys`, present, writable and
    /// user-accessible. Access is narrowed per page in the table itself.
    #[inline]
    #[must_use]
    pub const fn for_table(table_phys: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_table_frame(table_phys.frame().as_u32())
    }

    /// Physical address of the referenced page table.
    #[inline]
    #[must_use]
    pub const fn table_address(&self) -> PhysicalAddress {
        FrameIndex::new(self.table_frame()).base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::VecFrames;

    #[test]
    fn page_entry_layout_matches_hardware() {
        let e = PageEntry::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_accessed(true)
            .with_dirty(true)
            .with_frame_bits(0xF_FFFF);
        assert_eq!(e.into_bits(), 0xFFFF_F01F);

        let e = PageEntry::from_bits(0x0000_5004);
        assert!(!e.present());
        assert!(e.user());
        assert_eq!(e.frame(), FrameIndex::new(5));
    }

    #[test]
    fn directory_entry_for_table_sets_present_rw_user() {
        let e = DirectoryEntry::for_table(PhysicalAddress::new(0x0020_3000));
        assert_eq!(e.into_bits(), 0x0020_3007);
        assert_eq!(e.table_address(), PhysicalAddress::new(0x0020_3000));
    }

    #[test]
    fn bind_frame_sets_flags_and_is_idempotent() {
        let mut frames = VecFrames::new(4);
        let mut page = PageEntry::new();

        page.bind_frame(&mut frames, true, true).unwrap();
        assert!(page.present());
        assert!(page.writable());
        assert!(!page.user());
        assert_eq!(page.frame(), FrameIndex::new(0));

        // second bind keeps the existing frame
        page.bind_frame(&mut frames, false, false).unwrap();
        assert_eq!(page.frame(), FrameIndex::new(0));
        assert!(!page.user());
        assert_eq!(frames.used(), 1);

        let mut user_page = PageEntry::new();
        user_page.bind_frame(&mut frames, false, false).unwrap();
        assert!(user_page.user());
        assert!(!user_page.writable());
        assert_eq!(user_page.frame(), FrameIndex::new(1));
    }

    #[test]
    fn unbind_frame_releases_and_clears() {
        let mut frames = VecFrames::new(2);
        let mut page = PageEntry::new();
        page.bind_frame(&mut frames, true, true).unwrap();

        assert_eq!(page.unbind_frame(&mut frames), Some(FrameIndex::new(0)));
        assert!(!page.present());
        assert_eq!(page.frame_bits(), 0);
        assert!(!frames.is_used(FrameIndex::new(0)));

        assert_eq!(page.unbind_frame(&mut frames), None);
    }

    #[test]
    fn bind_reports_exhaustion() {
        let mut frames = VecFrames::new(1);
        let mut a = PageEntry::new();
        let mut b = PageEntry::new();
        a.bind_frame(&mut frames, true, true).unwrap();
        assert_eq!(
            b.bind_frame(&mut frames, true, true),
            Err(VmemError::OutOfFrames)
        );
        assert!(!b.present());
    }

    #[test]
    fn bind_exact_frame_rejects_owned_frames() {
        let mut frames = VecFrames::new(8);
        let mut a = PageEntry::new();
        a.bind_exact_frame(&mut frames, FrameIndex::new(3), true, false)
            .unwrap();
        assert_eq!(a.frame(), FrameIndex::new(3));

        let mut b = PageEntry::new();
        assert_eq!(
            b.bind_exact_frame(&mut frames, FrameIndex::new(3), true, false),
            Err(VmemError::FrameInUse(FrameIndex::new(3)))
        );
    }
}
